// Presentation layer - command facade over the application services
pub mod commands;
pub mod errors;

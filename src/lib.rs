pub mod app;
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use app::AppState;

pub mod logging;
pub mod paths;
pub mod persistence;
pub mod repositories;

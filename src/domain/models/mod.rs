pub mod backup;
pub mod plant;

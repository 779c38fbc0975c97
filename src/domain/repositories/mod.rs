pub mod attachment_repository;
pub mod plant_repository;

pub mod sqlite_plant_repository;

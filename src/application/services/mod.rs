pub mod archive_merger;
pub mod backup_service;
pub mod dataset_reader;

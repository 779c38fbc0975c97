pub mod attachment_store;
pub mod backup_archive;
pub mod backup_jobs;
pub mod settings;
pub mod sqlite_connection;

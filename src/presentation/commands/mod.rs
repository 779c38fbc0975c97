pub mod backup_commands;
pub mod helpers;

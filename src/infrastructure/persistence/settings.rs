use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::errors::DomainError;
use crate::infrastructure::logging::logger;

/// Tunables for the backup pipeline, read from `settings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Jobs allowed to run at once across export and import
    pub max_concurrent_jobs: usize,
    pub copy_buffer_bytes: usize,
    pub max_archive_entries: usize,
    pub max_entry_bytes: u64,
    pub max_total_bytes: u64,
    pub log_filter: String,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            copy_buffer_bytes: 64 * 1024,
            max_archive_entries: 100_000,
            max_entry_bytes: 1024 * 1024 * 1024,
            max_total_bytes: 8 * 1024 * 1024 * 1024,
            log_filter: "info".to_string(),
        }
    }
}

impl BackupSettings {
    /// Clamp values that would stall the pipeline
    fn normalized(mut self) -> Self {
        self.max_concurrent_jobs = self.max_concurrent_jobs.max(1);
        self.copy_buffer_bytes = self.copy_buffer_bytes.max(4 * 1024);
        self
    }
}

/// Load settings; a missing file yields defaults.
pub async fn load_backup_settings(path: &Path) -> Result<BackupSettings, DomainError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            logger::debug(&format!("No settings file at {:?}, using defaults", path));
            return Ok(BackupSettings::default());
        }
        Err(error) => {
            return Err(DomainError::InternalError(format!(
                "Failed to read settings file: {}",
                error
            )));
        }
    };

    let settings: BackupSettings = serde_json::from_str(&contents).map_err(|error| {
        logger::error(&format!("Failed to parse settings file {:?}: {}", path, error));
        DomainError::InvalidData(format!("Invalid settings JSON: {}", error))
    })?;

    Ok(settings.normalized())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "plantkeeper-settings-{}-{}",
            rand::random::<u64>(),
            name
        ))
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let settings = load_backup_settings(&temp_file("absent.json"))
            .await
            .expect("defaults");
        assert_eq!(settings, BackupSettings::default());
    }

    #[tokio::test]
    async fn partial_file_keeps_remaining_defaults() {
        let path = temp_file("partial.json");
        std::fs::write(&path, r#"{ "max_concurrent_jobs": 0, "log_filter": "debug" }"#)
            .expect("write settings");

        let settings = load_backup_settings(&path).await.expect("load settings");
        assert_eq!(settings.max_concurrent_jobs, 1);
        assert_eq!(settings.log_filter, "debug");
        assert_eq!(settings.max_archive_entries, 100_000);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn malformed_file_is_invalid_data() {
        let path = temp_file("broken.json");
        std::fs::write(&path, "{ not json").expect("write settings");

        let error = load_backup_settings(&path).await.expect_err("malformed");
        assert!(matches!(error, DomainError::InvalidData(_)));

        let _ = std::fs::remove_file(&path);
    }
}

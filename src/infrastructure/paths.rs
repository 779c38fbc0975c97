use std::path::{Path, PathBuf};

use crate::domain::errors::DomainError;

pub const DATA_DIR_ENV: &str = "PLANTKEEPER_DATA_DIR";
const APP_DIR_NAME: &str = "plantkeeper";

/// Resolve the application data root.
///
/// `PLANTKEEPER_DATA_DIR` takes precedence; otherwise the platform data
/// directory is used.
pub fn resolve_data_root() -> Result<PathBuf, DomainError> {
    if let Some(value) = std::env::var_os(DATA_DIR_ENV) {
        if !value.is_empty() {
            let path = PathBuf::from(value);
            tracing::debug!("Using data root from {}: {:?}", DATA_DIR_ENV, path);
            return Ok(path);
        }
    }

    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| {
            DomainError::InternalError("Unable to determine platform data directory".to_string())
        })
}

/// Fixed layout below the data root.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_root: PathBuf,
    pub database: PathBuf,
    pub photos_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub settings_file: PathBuf,
}

impl AppPaths {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        let data_root = data_root.into();
        Self {
            database: data_root.join("plantkeeper.db"),
            photos_dir: data_root.join("photos"),
            staging_dir: data_root.join(".backup-staging"),
            logs_dir: data_root.join("logs"),
            settings_file: data_root.join("settings.json"),
            data_root,
        }
    }

    /// Create every directory of the layout
    pub fn ensure_directories(&self) -> Result<(), DomainError> {
        for dir in [
            &self.data_root,
            &self.photos_dir,
            &self.staging_dir,
            &self.logs_dir,
        ] {
            create_dir(dir)?;
        }
        Ok(())
    }
}

fn create_dir(path: &Path) -> Result<(), DomainError> {
    std::fs::create_dir_all(path).map_err(|error| {
        DomainError::InternalError(format!(
            "Failed to create directory {}: {}",
            path.display(),
            error
        ))
    })
}

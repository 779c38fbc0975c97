use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::domain::errors::DomainError;

/// Exclusively named scratch directory, removed recursively on drop.
#[derive(Debug)]
pub struct StagingDirectory {
    path: PathBuf,
}

impl StagingDirectory {
    /// Create `<root>/<prefix>-<UTC timestamp>-<uuid>`.
    pub fn create(root: &Path, prefix: &str) -> Result<Self, DomainError> {
        let name = format!(
            "{}-{}-{}",
            prefix,
            Utc::now().format("%Y%m%dT%H%M%SZ"),
            uuid::Uuid::new_v4().simple()
        );
        let path = root.join(name);

        fs::create_dir_all(root)
            .map_err(|error| io_error("Failed to create staging root", error))?;
        // create_dir (not create_dir_all) so a name collision is an error.
        fs::create_dir(&path)
            .map_err(|error| io_error("Failed to create staging directory", error))?;

        tracing::debug!("Created staging directory {:?}", path);
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for StagingDirectory {
    fn drop(&mut self) {
        cleanup_directory_sync(&self.path);
    }
}

pub fn cleanup_directory_sync(path: &Path) {
    if let Err(error) = fs::remove_dir_all(path) {
        if error.kind() != io::ErrorKind::NotFound {
            tracing::warn!("Failed to clean up directory {}: {}", path.display(), error);
        }
    }
}

pub fn remove_file_if_exists(path: &Path) {
    if let Err(error) = fs::remove_file(path) {
        if error.kind() != io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove file {}: {}", path.display(), error);
        }
    }
}

pub(crate) fn io_error(context: &str, error: impl std::fmt::Display) -> DomainError {
    DomainError::ArchiveIo(format!("{}: {}", context, error))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("plantkeeper-staging-{}", rand::random::<u64>()))
    }

    #[test]
    fn staging_directory_is_removed_on_drop() {
        let root = temp_root();
        let staged_path;
        {
            let staging = StagingDirectory::create(&root, "export").expect("create staging");
            staged_path = staging.path().to_path_buf();
            fs::write(staging.join("data"), b"Version,2").expect("write staged file");
            fs::create_dir(staging.join("nested")).expect("create nested dir");
            assert!(staged_path.is_dir());
        }

        assert!(!staged_path.exists());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn staging_names_are_unique() {
        let root = temp_root();
        let first = StagingDirectory::create(&root, "import").expect("first");
        let second = StagingDirectory::create(&root, "import").expect("second");

        assert_ne!(first.path(), second.path());
        let name = first
            .path()
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        assert!(name.starts_with("import-"));

        drop(first);
        drop(second);
        let _ = fs::remove_dir_all(&root);
    }
}

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::domain::errors::DomainError;
use crate::domain::repositories::attachment_repository::{
    AllocatedAttachment, AttachmentResolver, AttachmentStorage,
};

const FILE_URI_PREFIX: &str = "file://";

/// Photo storage on the local file system.
///
/// References are plain paths or `file://` URIs. Relative references are
/// resolved against the photos directory. Allocated files are always created
/// inside the photos directory and referenced by absolute path.
pub struct LocalAttachmentStore {
    photos_dir: PathBuf,
}

impl LocalAttachmentStore {
    pub fn new(photos_dir: impl Into<PathBuf>) -> Self {
        Self {
            photos_dir: photos_dir.into(),
        }
    }

    pub fn photos_dir(&self) -> &Path {
        &self.photos_dir
    }

    fn resolve(&self, reference: &str) -> PathBuf {
        let raw = reference
            .strip_prefix(FILE_URI_PREFIX)
            .unwrap_or(reference);
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.photos_dir.join(path)
        }
    }
}

impl AttachmentResolver for LocalAttachmentStore {
    fn open(&self, reference: &str) -> Result<Box<dyn Read + Send>, DomainError> {
        let path = self.resolve(reference);
        let file = File::open(&path).map_err(|error| {
            if error.kind() == io::ErrorKind::NotFound {
                DomainError::NotFound(format!("Attachment not found: {}", path.display()))
            } else {
                DomainError::ArchiveIo(format!(
                    "Failed to open attachment {}: {}",
                    path.display(),
                    error
                ))
            }
        })?;
        Ok(Box::new(file))
    }
}

impl AttachmentStorage for LocalAttachmentStore {
    fn allocate(&self, file_name: &str) -> Result<AllocatedAttachment, DomainError> {
        fs::create_dir_all(&self.photos_dir).map_err(|error| {
            DomainError::ArchiveIo(format!("Failed to create photos directory: {}", error))
        })?;

        let path = self
            .photos_dir
            .join(format!("{}-{}", uuid::Uuid::new_v4().simple(), file_name));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|error| {
                DomainError::ArchiveIo(format!(
                    "Failed to create photo file {}: {}",
                    path.display(),
                    error
                ))
            })?;

        Ok(AllocatedAttachment {
            reference: path.to_string_lossy().to_string(),
            writer: Box::new(file) as Box<dyn Write + Send>,
        })
    }

    fn discard(&self, reference: &str) {
        let path = self.resolve(reference);
        if !path.starts_with(&self.photos_dir) {
            tracing::warn!("Refusing to discard attachment outside photos dir: {:?}", path);
            return;
        }

        if let Err(error) = fs::remove_file(&path) {
            if error.kind() != io::ErrorKind::NotFound {
                tracing::warn!("Failed to discard attachment {:?}: {}", path, error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (LocalAttachmentStore, PathBuf) {
        let root = std::env::temp_dir().join(format!(
            "plantkeeper-attachments-{}",
            rand::random::<u64>()
        ));
        (LocalAttachmentStore::new(root.join("photos")), root)
    }

    #[test]
    fn allocated_attachment_can_be_reopened_and_discarded() {
        let (store, root) = temp_store();

        let mut allocated = store.allocate("leaf.jpg").expect("allocate");
        allocated.writer.write_all(b"jpeg bytes").expect("write");
        drop(allocated.writer);

        let mut contents = Vec::new();
        store
            .open(&allocated.reference)
            .expect("open")
            .read_to_end(&mut contents)
            .expect("read");
        assert_eq!(contents, b"jpeg bytes");
        assert!(allocated.reference.ends_with("-leaf.jpg"));

        store.discard(&allocated.reference);
        assert!(!Path::new(&allocated.reference).exists());

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn file_uri_and_relative_references_resolve() {
        let (store, root) = temp_store();
        fs::create_dir_all(store.photos_dir()).expect("create photos dir");
        let path = store.photos_dir().join("ficus.png");
        fs::write(&path, b"png").expect("write photo");

        assert!(store.open("ficus.png").is_ok());
        assert!(store.open(&format!("file://{}", path.display())).is_ok());
        assert!(matches!(
            store.open("missing.png"),
            Err(DomainError::NotFound(_))
        ));

        let _ = fs::remove_dir_all(&root);
    }
}

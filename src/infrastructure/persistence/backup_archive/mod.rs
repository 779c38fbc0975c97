pub mod format;
pub mod reader;
pub mod staging;
pub mod writer;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::models::backup::{BackupWarning, DatasetSnapshot};
use format::FormatVersion;
use staging::StagingDirectory;

pub use reader::{ArchiveReadOptions, read_archive};
pub use writer::{ArchiveWriteOptions, write_archive};

/// Parsed archive, owned by one import.
///
/// Row identifiers are archive ids, not store ids. Attachment columns hold
/// entry names that resolve through [`ImportModel::attachment_path`]. The
/// extracted attachments live in a staging directory that is removed when
/// the model is dropped.
#[derive(Debug)]
pub struct ImportModel {
    pub version: FormatVersion,
    pub rows: DatasetSnapshot,
    pub warnings: Vec<BackupWarning>,
    attachments: HashMap<String, PathBuf>,
    staging: Option<StagingDirectory>,
}

impl ImportModel {
    pub(crate) fn new(
        version: FormatVersion,
        rows: DatasetSnapshot,
        warnings: Vec<BackupWarning>,
        attachments: HashMap<String, PathBuf>,
        staging: Option<StagingDirectory>,
    ) -> Self {
        Self {
            version,
            rows,
            warnings,
            attachments,
            staging,
        }
    }

    /// Extracted file for an attachment entry name
    pub fn attachment_path(&self, entry_name: &str) -> Option<&Path> {
        self.attachments.get(entry_name).map(PathBuf::as_path)
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    pub fn staging_path(&self) -> Option<&Path> {
        self.staging.as_ref().map(StagingDirectory::path)
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::domain::errors::DomainError;
use crate::domain::models::plant::{
    DiaryEntry, Measurement, Plant, PlantCalibration, PlantPhoto, Reminder, SpeciesTarget,
};

/// Which part of the dataset an export covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "plant_id", rename_all = "snake_case")]
pub enum ExportScope {
    #[default]
    All,
    ForPlant(i64),
}

/// How an archive is applied to the live store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Clear the dataset tables, then write the archive.
    Replace,
    /// Reconcile plants by name and add everything else.
    #[default]
    Merge,
}

/// Entity kinds in archive document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Plants,
    PlantPhotos,
    PlantCalibrations,
    SpeciesTargets,
    Measurements,
    DiaryEntries,
    Reminders,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Plants,
        EntityKind::PlantPhotos,
        EntityKind::PlantCalibrations,
        EntityKind::SpeciesTargets,
        EntityKind::Measurements,
        EntityKind::DiaryEntries,
        EntityKind::Reminders,
    ];

    /// Literal section name used in the archive text entry.
    pub fn section_name(&self) -> &'static str {
        match self {
            EntityKind::Plants => "Plants",
            EntityKind::PlantPhotos => "PlantPhotos",
            EntityKind::PlantCalibrations => "PlantCalibrations",
            EntityKind::SpeciesTargets => "SpeciesTargets",
            EntityKind::Measurements => "Measurements",
            EntityKind::DiaryEntries => "DiaryEntries",
            EntityKind::Reminders => "Reminders",
        }
    }

    pub fn from_section_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.section_name() == name)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.section_name())
    }
}

/// Transient, fully materialized copy of the dataset for one export.
#[derive(Debug, Clone, Default)]
pub struct DatasetSnapshot {
    pub plants: Vec<Plant>,
    pub photos: Vec<PlantPhoto>,
    pub calibrations: Vec<PlantCalibration>,
    pub species_targets: Vec<SpeciesTarget>,
    pub measurements: Vec<Measurement>,
    pub diary_entries: Vec<DiaryEntry>,
    pub reminders: Vec<Reminder>,
}

impl DatasetSnapshot {
    pub fn count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Plants => self.plants.len(),
            EntityKind::PlantPhotos => self.photos.len(),
            EntityKind::PlantCalibrations => self.calibrations.len(),
            EntityKind::SpeciesTargets => self.species_targets.len(),
            EntityKind::Measurements => self.measurements.len(),
            EntityKind::DiaryEntries => self.diary_entries.len(),
            EntityKind::Reminders => self.reminders.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Malformed row or unresolvable plant reference.
    Row,
    /// Attachment could not be read, staged or restaged.
    Attachment,
    /// Unknown section skipped in a newer archive.
    Section,
    /// One entity group failed to commit during merge.
    GroupFailure,
}

/// A non-fatal problem recorded while exporting or importing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupWarning {
    pub kind: WarningKind,
    pub entity: Option<EntityKind>,
    pub message: String,
}

impl BackupWarning {
    pub fn row(entity: EntityKind, message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::Row,
            entity: Some(entity),
            message: message.into(),
        }
    }

    pub fn attachment(entity: EntityKind, message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::Attachment,
            entity: Some(entity),
            message: message.into(),
        }
    }

    pub fn section(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::Section,
            entity: None,
            message: message.into(),
        }
    }

    pub fn group_failure(entity: EntityKind, message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::GroupFailure,
            entity: Some(entity),
            message: message.into(),
        }
    }
}

impl fmt::Display for BackupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entity {
            Some(entity) => write!(f, "[{}] {}", entity, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Per entity kind outcome of a merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub inserted: usize,
    /// Plants reused because a live plant had the same name.
    pub matched: usize,
    pub updated: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeResult {
    pub counts: BTreeMap<EntityKind, EntityCounts>,
    pub warnings: Vec<BackupWarning>,
    /// At least one entity group failed to commit.
    pub partial: bool,
}

impl MergeResult {
    pub fn counts_for(&self, kind: EntityKind) -> EntityCounts {
        self.counts.get(&kind).copied().unwrap_or_default()
    }

    pub fn counts_mut(&mut self, kind: EntityKind) -> &mut EntityCounts {
        self.counts.entry(kind).or_default()
    }

    /// One line listing every entity kind, including untouched ones.
    pub fn summary(&self) -> String {
        let parts = describe_counts(&self.counts);
        let status = if self.partial {
            "Import partially completed"
        } else {
            "Import completed"
        };
        format!("{} ({} warnings). {}", status, self.warnings.len(), parts)
    }
}

fn describe_counts(counts: &BTreeMap<EntityKind, EntityCounts>) -> String {
    EntityKind::ALL
        .iter()
        .map(|kind| {
            let counts = counts.get(kind).copied().unwrap_or_default();
            format!(
                "{}: {} inserted, {} matched, {} updated, {} skipped",
                kind, counts.inserted, counts.matched, counts.updated, counts.skipped
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone)]
pub struct ExportResult {
    pub archive_path: PathBuf,
    pub counts: BTreeMap<EntityKind, usize>,
    pub attachments: usize,
    pub warnings: Vec<BackupWarning>,
}

impl ExportResult {
    pub fn summary(&self) -> String {
        let parts = EntityKind::ALL
            .iter()
            .map(|kind| format!("{}: {}", kind, self.counts.get(kind).copied().unwrap_or(0)))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Exported to {} ({} attachments, {} warnings). {}",
            self.archive_path.display(),
            self.attachments,
            self.warnings.len(),
            parts
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ArchiveFormat,
    ArchiveIo,
    NotFound,
    InvalidData,
    Storage,
    Internal,
}

/// Cloneable error carried in job outcomes and status snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&DomainError> for BackupFailure {
    fn from(error: &DomainError) -> Self {
        let kind = match error {
            DomainError::ArchiveFormat(_) => FailureKind::ArchiveFormat,
            DomainError::ArchiveIo(_) => FailureKind::ArchiveIo,
            DomainError::NotFound(_) => FailureKind::NotFound,
            DomainError::InvalidData(_) => FailureKind::InvalidData,
            DomainError::Storage(_) => FailureKind::Storage,
            DomainError::InternalError(_) => FailureKind::Internal,
        };

        Self {
            kind,
            message: error.to_string(),
        }
    }
}

impl fmt::Display for BackupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStage {
    Queued,
    Preparing,
    Serializing,
    Packaging,
    Reading,
    Merging,
    Completed,
}

impl BackupStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStage::Queued => "queued",
            BackupStage::Preparing => "preparing",
            BackupStage::Serializing => "serializing",
            BackupStage::Packaging => "packaging",
            BackupStage::Reading => "reading",
            BackupStage::Merging => "merging",
            BackupStage::Completed => "completed",
        }
    }
}

/// Coarse progress milestone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupProgress {
    pub stage: BackupStage,
    pub percent: f32,
    pub message: String,
}

impl BackupProgress {
    pub fn new(stage: BackupStage, percent: f32, message: impl Into<String>) -> Self {
        Self {
            stage,
            percent: percent.clamp(0.0, 100.0),
            message: message.into(),
        }
    }
}

/// Terminal value of an export or import job, delivered exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupOutcome {
    pub success: bool,
    pub error: Option<BackupFailure>,
    pub warnings: Vec<BackupWarning>,
    pub summary: String,
    pub counts: BTreeMap<EntityKind, EntityCounts>,
}

impl BackupOutcome {
    pub fn exported(result: &ExportResult) -> Self {
        let counts = result
            .counts
            .iter()
            .map(|(kind, count)| {
                (
                    *kind,
                    EntityCounts {
                        inserted: *count,
                        ..EntityCounts::default()
                    },
                )
            })
            .collect();

        Self {
            success: true,
            error: None,
            warnings: result.warnings.clone(),
            summary: result.summary(),
            counts,
        }
    }

    pub fn imported(result: MergeResult) -> Self {
        let summary = result.summary();
        Self {
            success: true,
            error: None,
            warnings: result.warnings,
            summary,
            counts: result.counts,
        }
    }

    pub fn failed(operation: &str, failure: BackupFailure, warnings: Vec<BackupWarning>) -> Self {
        let mut counts = BTreeMap::new();
        for kind in EntityKind::ALL {
            counts.insert(kind, EntityCounts::default());
        }

        Self {
            success: false,
            summary: format!(
                "{} failed: {}. {}",
                operation,
                failure.message,
                describe_counts(&counts)
            ),
            error: Some(failure),
            warnings,
            counts,
        }
    }
}

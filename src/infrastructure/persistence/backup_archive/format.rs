use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::domain::errors::DomainError;
use crate::domain::models::backup::EntityKind;
use crate::infrastructure::persistence::settings::BackupSettings;

/// Name of the text entry holding every section.
pub const DATA_ENTRY_NAME: &str = "data";
pub const VERSION_KEY: &str = "Version";

pub const CURRENT_VERSION: FormatVersion = FormatVersion { major: 2, minor: 0 };
const OLDEST_MAJOR: u32 = 1;

const MAX_COMPRESSION_RATIO: u64 = 500;
const COMPRESSION_RATIO_MIN_BYTES: u64 = 1024 * 1024;

const FALLBACK_FILE_NAME: &str = "attachment";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FormatVersion {
    pub major: u32,
    pub minor: u32,
}

impl FormatVersion {
    /// Parse `2` or `2.1`. Unsupported majors are an archive format error.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let raw = raw.trim();
        let (major, minor) = match raw.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (raw, "0"),
        };

        let parse_part = |part: &str| {
            part.parse::<u32>().map_err(|_| {
                DomainError::ArchiveFormat(format!("Unreadable archive version: {:?}", raw))
            })
        };
        let version = Self {
            major: parse_part(major)?,
            minor: parse_part(minor)?,
        };

        if version.major < OLDEST_MAJOR || version.major > CURRENT_VERSION.major {
            return Err(DomainError::ArchiveFormat(format!(
                "Unsupported archive version {} (supported: {} to {})",
                version, OLDEST_MAJOR, CURRENT_VERSION.major
            )));
        }

        Ok(version)
    }

    /// Written by a newer release of the current major.
    pub fn is_newer_minor(&self) -> bool {
        self.major == CURRENT_VERSION.major && self.minor > CURRENT_VERSION.minor
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minor == 0 {
            write!(f, "{}", self.major)
        } else {
            write!(f, "{}.{}", self.major, self.minor)
        }
    }
}

const PLANT_COLUMNS: &[&str] = &[
    "id",
    "name",
    "description",
    "species_key",
    "location",
    "acquired_at",
    "photo",
];
const PLANT_PHOTO_COLUMNS: &[&str] = &["id", "plant_id", "photo", "created_at"];
const PLANT_CALIBRATION_COLUMNS: &[&str] = &["plant_id", "ambient_factor", "camera_factor"];
const SPECIES_TARGET_COLUMNS: &[&str] = &[
    "species_key",
    "seedling_flux_min",
    "seedling_flux_max",
    "seedling_dli_min",
    "seedling_dli_max",
    "vegetative_flux_min",
    "vegetative_flux_max",
    "vegetative_dli_min",
    "vegetative_dli_max",
    "flowering_flux_min",
    "flowering_flux_max",
    "flowering_dli_min",
    "flowering_dli_max",
];
const MEASUREMENT_COLUMNS: &[&str] = &["id", "plant_id", "measured_at", "raw_average", "flux"];
const DIARY_ENTRY_COLUMNS: &[&str] = &["id", "plant_id", "created_at", "entry_type", "note", "photo"];
const REMINDER_COLUMNS: &[&str] = &["id", "plant_id", "trigger_at", "message"];

/// Columns that version 1 archives may lack.
const OPTIONAL_COLUMNS: &[&str] = &["description", "location", "photo"];

/// Header row written for a section
pub fn columns(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Plants => PLANT_COLUMNS,
        EntityKind::PlantPhotos => PLANT_PHOTO_COLUMNS,
        EntityKind::PlantCalibrations => PLANT_CALIBRATION_COLUMNS,
        EntityKind::SpeciesTargets => SPECIES_TARGET_COLUMNS,
        EntityKind::Measurements => MEASUREMENT_COLUMNS,
        EntityKind::DiaryEntries => DIARY_ENTRY_COLUMNS,
        EntityKind::Reminders => REMINDER_COLUMNS,
    }
}

/// Columns a reader cannot do without
pub fn required_columns(kind: EntityKind) -> impl Iterator<Item = &'static str> {
    let optional: &[&str] = match kind {
        // The photo column is the whole point of a photo row.
        EntityKind::PlantPhotos => &[],
        _ => OPTIONAL_COLUMNS,
    };
    columns(kind)
        .iter()
        .copied()
        .filter(move |column| !optional.contains(column))
}

/// Section headers are a single capitalized word.
pub fn looks_like_section_header(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_uppercase())
        && value.len() > 1
        && chars.all(|c| c.is_ascii_alphabetic())
}

/// Locale independent; round trips through `str::parse::<f64>`.
pub fn format_float(value: f64) -> String {
    value.to_string()
}

/// Keep `[A-Za-z0-9._-]` of the last path segment, replace the rest.
pub fn sanitize_file_name(reference: &str) -> String {
    let last_segment = reference
        .rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty())
        .unwrap_or("");
    let last_segment = last_segment
        .split(['?', '#'])
        .next()
        .unwrap_or(last_segment);

    let sanitized = last_segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();

    if sanitized.trim_matches(|c| c == '.' || c == '_').is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        sanitized
    }
}

/// Entry prefix for attachments owned by a kind
pub fn attachment_prefix(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::PlantPhotos => "photo",
        EntityKind::DiaryEntries => "diary",
        _ => "plant",
    }
}

pub fn attachment_entry_name(kind: EntityKind, archive_id: i64, reference: &str) -> String {
    format!(
        "{}_{}_{}",
        attachment_prefix(kind),
        archive_id,
        sanitize_file_name(reference)
    )
}

/// Safety limits applied to every container entry.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveLimits {
    pub max_entries: usize,
    pub max_entry_bytes: u64,
    pub max_total_bytes: u64,
}

impl From<&BackupSettings> for ArchiveLimits {
    fn from(settings: &BackupSettings) -> Self {
        Self {
            max_entries: settings.max_archive_entries,
            max_entry_bytes: settings.max_entry_bytes,
            max_total_bytes: settings.max_total_bytes,
        }
    }
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self::from(&BackupSettings::default())
    }
}

pub fn validate_zip_entry_limits(
    limits: &ArchiveLimits,
    entry_name: &str,
    uncompressed_size: u64,
    compressed_size: u64,
    total_uncompressed_bytes: &mut u64,
) -> Result<(), DomainError> {
    if uncompressed_size > limits.max_entry_bytes {
        return Err(DomainError::ArchiveFormat(format!(
            "Archive entry is too large (>{} bytes): {}",
            limits.max_entry_bytes, entry_name
        )));
    }

    if compressed_size > 0
        && uncompressed_size > COMPRESSION_RATIO_MIN_BYTES
        && uncompressed_size / compressed_size > MAX_COMPRESSION_RATIO
    {
        return Err(DomainError::ArchiveFormat(format!(
            "Archive entry compression ratio is suspicious: {}",
            entry_name
        )));
    }

    *total_uncompressed_bytes = total_uncompressed_bytes.saturating_add(uncompressed_size);
    if *total_uncompressed_bytes > limits.max_total_bytes {
        return Err(DomainError::ArchiveFormat(format!(
            "Archive uncompressed size exceeds limit (>{} bytes)",
            limits.max_total_bytes
        )));
    }

    Ok(())
}

/// Reject absolute and parent-relative entry names.
pub fn sanitize_zip_entry_path(raw_path: &str) -> Result<PathBuf, DomainError> {
    let mut sanitized = PathBuf::new();

    for component in Path::new(raw_path).components() {
        match component {
            Component::Normal(segment) => sanitized.push(segment),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(DomainError::ArchiveFormat(format!(
                    "Invalid archive entry path: {}",
                    raw_path
                )));
            }
        }
    }

    if sanitized.as_os_str().is_empty() {
        return Err(DomainError::ArchiveFormat(format!(
            "Empty archive entry path: {:?}",
            raw_path
        )));
    }

    Ok(sanitized)
}

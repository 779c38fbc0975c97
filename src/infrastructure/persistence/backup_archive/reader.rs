use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use csv::StringRecord;
use zip::ZipArchive;

use crate::domain::errors::DomainError;
use crate::domain::models::backup::{BackupStage, BackupWarning, DatasetSnapshot, EntityKind};
use crate::domain::models::plant::{
    DiaryEntry, GrowthStage, Measurement, Plant, PlantCalibration, PlantPhoto, Reminder,
    SpeciesTarget,
};
use crate::infrastructure::persistence::backup_archive::ImportModel;
use crate::infrastructure::persistence::backup_archive::format::{
    ArchiveLimits, DATA_ENTRY_NAME, FormatVersion, VERSION_KEY, columns, looks_like_section_header,
    required_columns, sanitize_zip_entry_path, validate_zip_entry_limits,
};
use crate::infrastructure::persistence::backup_archive::staging::{StagingDirectory, io_error};
use crate::infrastructure::persistence::backup_archive::writer::copy_stream;

pub struct ArchiveReadOptions<'a> {
    /// Parent of the per-import staging directory
    pub staging_root: &'a Path,
    pub limits: ArchiveLimits,
    pub copy_buffer_bytes: usize,
}

/// Text entry parsed into typed rows.
#[derive(Debug)]
pub struct ParsedDocument {
    pub version: FormatVersion,
    pub rows: DatasetSnapshot,
    pub warnings: Vec<BackupWarning>,
}

/// Open `source`, validate it and parse every section.
///
/// Blocking. Never touches the live store.
pub fn read_archive(
    source: &Path,
    options: &ArchiveReadOptions<'_>,
    report_progress: &mut dyn FnMut(BackupStage, f32, &str),
) -> Result<ImportModel, DomainError> {
    report_progress(BackupStage::Reading, 5.0, "Opening archive");

    let file = File::open(source).map_err(|error| {
        io_error(&format!("Failed to open archive file {}", source.display()), error)
    })?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|error| {
        DomainError::ArchiveFormat(format!("Unreadable archive container: {}", error))
    })?;

    if archive.len() > options.limits.max_entries {
        return Err(DomainError::ArchiveFormat(format!(
            "Archive has too many entries (>{})",
            options.limits.max_entries
        )));
    }

    let entries = scan_entries(&mut archive, &options.limits)?;
    let data_index = entries.get(DATA_ENTRY_NAME).copied().ok_or_else(|| {
        DomainError::ArchiveFormat(format!("Archive has no {:?} entry", DATA_ENTRY_NAME))
    })?;

    report_progress(BackupStage::Reading, 15.0, "Parsing archive text");
    let text = read_data_entry(&mut archive, data_index, options.limits.max_entry_bytes)?;
    let document = parse_document(&text)?;

    let referenced = referenced_attachments(&document.rows);
    if referenced.is_empty() {
        return Ok(ImportModel::new(
            document.version,
            document.rows,
            document.warnings,
            HashMap::new(),
            None,
        ));
    }

    report_progress(BackupStage::Reading, 25.0, "Extracting attachments");
    let staging = StagingDirectory::create(options.staging_root, "import")?;
    let mut copy_buffer = vec![0u8; options.copy_buffer_bytes.max(1)];
    let mut attachments = HashMap::new();
    for name in referenced {
        let Some(index) = entries.get(&name).copied() else {
            // The merger reports the missing file against its row.
            tracing::debug!("Archive references missing attachment {}", name);
            continue;
        };

        let target = staging.join(&name);
        extract_entry(
            &mut archive,
            index,
            &target,
            options.limits.max_entry_bytes,
            &mut copy_buffer,
        )?;
        attachments.insert(name, target);
    }

    Ok(ImportModel::new(
        document.version,
        document.rows,
        document.warnings,
        attachments,
        Some(staging),
    ))
}

/// Validate every entry and index file entries by normalized name.
fn scan_entries<R: Read + io::Seek>(
    archive: &mut ZipArchive<R>,
    limits: &ArchiveLimits,
) -> Result<HashMap<String, usize>, DomainError> {
    let mut total_uncompressed_bytes = 0u64;
    let mut entries = HashMap::with_capacity(archive.len());

    for index in 0..archive.len() {
        let entry = archive.by_index(index).map_err(|error| {
            DomainError::ArchiveFormat(format!("Failed to read archive entry: {}", error))
        })?;
        let raw_name = entry.name().to_string();
        let sanitized = sanitize_zip_entry_path(&raw_name)?;

        validate_zip_entry_limits(
            limits,
            &raw_name,
            entry.size(),
            entry.compressed_size(),
            &mut total_uncompressed_bytes,
        )?;

        if entry.is_dir() {
            continue;
        }

        let normalized = sanitized
            .components()
            .map(|component| component.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");
        if entries.insert(normalized, index).is_some() {
            return Err(DomainError::ArchiveFormat(format!(
                "Duplicate archive entry: {}",
                raw_name
            )));
        }
    }

    Ok(entries)
}

fn read_data_entry<R: Read + io::Seek>(
    archive: &mut ZipArchive<R>,
    index: usize,
    max_bytes: u64,
) -> Result<String, DomainError> {
    let entry = archive.by_index(index).map_err(|error| {
        DomainError::ArchiveFormat(format!("Failed to open archive text: {}", error))
    })?;

    let mut bytes = Vec::new();
    entry
        .take(max_bytes.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|error| {
            DomainError::ArchiveFormat(format!("Failed to decompress archive text: {}", error))
        })?;
    if bytes.len() as u64 > max_bytes {
        return Err(DomainError::ArchiveFormat(format!(
            "Archive text exceeds limit (>{} bytes)",
            max_bytes
        )));
    }

    String::from_utf8(bytes)
        .map_err(|_| DomainError::ArchiveFormat("Archive text is not valid UTF-8".to_string()))
}

fn extract_entry<R: Read + io::Seek>(
    archive: &mut ZipArchive<R>,
    index: usize,
    target: &Path,
    max_bytes: u64,
    copy_buffer: &mut [u8],
) -> Result<(), DomainError> {
    let entry = archive.by_index(index).map_err(|error| {
        DomainError::ArchiveFormat(format!("Failed to open archive entry: {}", error))
    })?;

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .map_err(|error| io_error("Failed to create extraction directory", error))?;
    }

    let output = File::create(target)
        .map_err(|error| io_error("Failed to create extracted attachment", error))?;
    let mut writer = BufWriter::new(output);
    let mut limited = entry.take(max_bytes.saturating_add(1));
    let copied = copy_stream(
        &mut limited,
        &mut writer,
        copy_buffer,
        "Failed to decompress attachment",
        "Failed to write extracted attachment",
    )?;
    if copied > max_bytes {
        return Err(DomainError::ArchiveFormat(format!(
            "Archive entry exceeds limit (>{} bytes): {}",
            max_bytes,
            target.display()
        )));
    }

    writer
        .flush()
        .map_err(|error| io_error("Failed to flush extracted attachment", error))
}

fn referenced_attachments(rows: &DatasetSnapshot) -> BTreeSet<String> {
    let plant_photos = rows.plants.iter().filter_map(|plant| plant.photo_uri.clone());
    let photos = rows.photos.iter().map(|photo| photo.photo_uri.clone());
    let diary = rows
        .diary_entries
        .iter()
        .filter_map(|entry| entry.photo_uri.clone());

    plant_photos
        .chain(photos)
        .chain(diary)
        .filter(|name| !name.is_empty())
        .collect()
}

enum SectionState {
    Preamble,
    AwaitingHeader(EntityKind),
    Rows(EntityKind, ColumnMap),
    Skipping,
}

/// Parse the archive text entry.
///
/// Fails on a missing or unsupported version and on unknown sections at or
/// below the reader's version. Malformed rows become warnings.
pub fn parse_document(text: &str) -> Result<ParsedDocument, DomainError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut records = reader.records();

    let version_record = loop {
        match records.next() {
            None => {
                return Err(DomainError::ArchiveFormat(
                    "Archive text is empty".to_string(),
                ));
            }
            Some(record) => {
                let record = record.map_err(record_error)?;
                if !is_blank(&record) {
                    break record;
                }
            }
        }
    };
    if version_record.len() < 2 || &version_record[0] != VERSION_KEY {
        return Err(DomainError::ArchiveFormat(
            "Archive text does not start with a version header".to_string(),
        ));
    }
    let version = FormatVersion::parse(&version_record[1])?;

    let mut rows = DatasetSnapshot::default();
    let mut warnings = Vec::new();
    let mut state = SectionState::Preamble;

    for record in records {
        let record = record.map_err(record_error)?;
        if is_blank(&record) {
            continue;
        }
        let line = record.position().map(|position| position.line()).unwrap_or(0);

        if record.len() == 1 && looks_like_section_header(&record[0]) {
            let name = &record[0];
            state = match EntityKind::from_section_name(name) {
                Some(kind) => SectionState::AwaitingHeader(kind),
                None if version.is_newer_minor() => {
                    tracing::warn!("Skipping unknown archive section {}", name);
                    warnings.push(BackupWarning::section(format!(
                        "Skipped unknown section {} from archive version {}",
                        name, version
                    )));
                    SectionState::Skipping
                }
                None => {
                    return Err(DomainError::ArchiveFormat(format!(
                        "Unrecognized section header {:?} at line {}",
                        name, line
                    )));
                }
            };
            continue;
        }

        let next_state = match &state {
            SectionState::Preamble => {
                return Err(DomainError::ArchiveFormat(format!(
                    "Row outside of any section at line {}",
                    line
                )));
            }
            SectionState::AwaitingHeader(kind) => Some(SectionState::Rows(
                *kind,
                ColumnMap::from_header(*kind, &record)?,
            )),
            SectionState::Rows(kind, map) => {
                if let Err(message) = parse_row(*kind, map, &record, &mut rows) {
                    warnings.push(BackupWarning::row(
                        *kind,
                        format!("Skipped row at line {}: {}", line, message),
                    ));
                }
                None
            }
            SectionState::Skipping => None,
        };
        if let Some(next_state) = next_state {
            state = next_state;
        }
    }

    Ok(ParsedDocument {
        version,
        rows,
        warnings,
    })
}

fn is_blank(record: &StringRecord) -> bool {
    record.is_empty() || (record.len() == 1 && record[0].trim().is_empty())
}

fn record_error(error: csv::Error) -> DomainError {
    DomainError::ArchiveFormat(format!("Malformed archive text: {}", error))
}

/// Column name to index for one section.
struct ColumnMap {
    indices: HashMap<String, usize>,
    width: usize,
}

impl ColumnMap {
    fn from_header(kind: EntityKind, header: &StringRecord) -> Result<Self, DomainError> {
        let indices = header
            .iter()
            .enumerate()
            .map(|(index, name)| (name.trim().to_string(), index))
            .collect::<HashMap<_, _>>();

        if let Some(missing) = required_columns(kind).find(|column| !indices.contains_key(*column))
        {
            return Err(DomainError::ArchiveFormat(format!(
                "Section {} is missing required column {:?} (expected {})",
                kind,
                missing,
                columns(kind).join(",")
            )));
        }

        Ok(Self {
            indices,
            width: header.len(),
        })
    }
}

struct RowFields<'r> {
    map: &'r ColumnMap,
    record: &'r StringRecord,
}

impl RowFields<'_> {
    /// Raw value; absent optional columns read as empty.
    fn text(&self, column: &str) -> String {
        self.map
            .indices
            .get(column)
            .and_then(|index| self.record.get(*index))
            .unwrap_or_default()
            .to_string()
    }

    fn optional(&self, column: &str) -> Option<String> {
        Some(self.text(column)).filter(|value| !value.is_empty())
    }

    fn int(&self, column: &str) -> Result<i64, String> {
        let value = self.text(column);
        value
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("{} is not an integer: {:?}", column, value))
    }

    fn float(&self, column: &str) -> Result<f64, String> {
        let value = self.text(column);
        value
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("{} is not a number: {:?}", column, value))
    }
}

fn parse_row(
    kind: EntityKind,
    map: &ColumnMap,
    record: &StringRecord,
    rows: &mut DatasetSnapshot,
) -> Result<(), String> {
    if record.len() != map.width {
        return Err(format!(
            "expected {} columns, found {}",
            map.width,
            record.len()
        ));
    }

    let fields = RowFields { map, record };
    match kind {
        EntityKind::Plants => {
            let name = fields.text("name");
            if name.trim().is_empty() {
                return Err("plant name is empty".to_string());
            }
            rows.plants.push(Plant {
                id: fields.int("id")?,
                name,
                description: fields.text("description"),
                species_key: fields.text("species_key"),
                location: fields.text("location"),
                acquired_at: fields.int("acquired_at")?,
                photo_uri: fields.optional("photo"),
            });
        }
        EntityKind::PlantPhotos => rows.photos.push(PlantPhoto {
            id: fields.int("id")?,
            plant_id: fields.int("plant_id")?,
            photo_uri: fields.text("photo"),
            created_at: fields.int("created_at")?,
        }),
        EntityKind::PlantCalibrations => rows.calibrations.push(PlantCalibration {
            plant_id: fields.int("plant_id")?,
            ambient_factor: fields.float("ambient_factor")?,
            camera_factor: fields.float("camera_factor")?,
        }),
        EntityKind::SpeciesTargets => {
            let species_key = fields.text("species_key");
            if species_key.trim().is_empty() {
                return Err("species key is empty".to_string());
            }
            let mut target = SpeciesTarget::new(species_key);
            for stage in GrowthStage::ALL {
                let prefix = stage.as_str();
                let range = target.range_mut(stage);
                range.flux_min = fields.float(&format!("{}_flux_min", prefix))?;
                range.flux_max = fields.float(&format!("{}_flux_max", prefix))?;
                range.dli_min = fields.float(&format!("{}_dli_min", prefix))?;
                range.dli_max = fields.float(&format!("{}_dli_max", prefix))?;
            }
            rows.species_targets.push(target);
        }
        EntityKind::Measurements => rows.measurements.push(Measurement {
            id: fields.int("id")?,
            plant_id: fields.int("plant_id")?,
            measured_at: fields.int("measured_at")?,
            raw_average: fields.float("raw_average")?,
            flux: fields.float("flux")?,
        }),
        EntityKind::DiaryEntries => rows.diary_entries.push(DiaryEntry {
            id: fields.int("id")?,
            plant_id: fields.int("plant_id")?,
            created_at: fields.int("created_at")?,
            entry_type: fields.text("entry_type"),
            note: fields.text("note"),
            photo_uri: fields.optional("photo"),
        }),
        EntityKind::Reminders => rows.reminders.push(Reminder {
            id: fields.int("id")?,
            plant_id: fields.int("plant_id")?,
            trigger_at: fields.int("trigger_at")?,
            message: fields.text("message"),
        }),
    }

    Ok(())
}

#[cfg(test)]
mod tests;

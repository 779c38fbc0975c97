use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::domain::errors::DomainError;
use crate::domain::models::backup::{
    BackupStage, BackupWarning, DatasetSnapshot, EntityKind, ExportResult,
};
use crate::domain::models::plant::GrowthStage;
use crate::domain::repositories::attachment_repository::AttachmentResolver;
use crate::infrastructure::persistence::backup_archive::format::{
    CURRENT_VERSION, DATA_ENTRY_NAME, VERSION_KEY, attachment_entry_name, columns, format_float,
};
use crate::infrastructure::persistence::backup_archive::staging::{
    StagingDirectory, io_error, remove_file_if_exists,
};

const FILE_IO_BUFFER_BYTES: usize = 256 * 1024;
const PARTIAL_SUFFIX: &str = "partial";

pub struct ArchiveWriteOptions<'a> {
    /// Parent of the per-export staging directory
    pub staging_root: &'a Path,
    pub copy_buffer_bytes: usize,
}

/// A section serialized to rows, before packaging.
struct SectionRows {
    kind: EntityKind,
    rows: Vec<Vec<String>>,
}

/// Serialize `snapshot` and package it at `sink`.
///
/// Blocking; run it on the blocking pool. The staging directory is removed
/// on every exit path, and `sink` only appears once the container is
/// complete.
pub fn write_archive(
    snapshot: &DatasetSnapshot,
    sink: &Path,
    options: &ArchiveWriteOptions<'_>,
    resolver: &dyn AttachmentResolver,
    report_progress: &mut dyn FnMut(BackupStage, f32, &str),
) -> Result<ExportResult, DomainError> {
    report_progress(BackupStage::Preparing, 5.0, "Preparing export");

    let staging = StagingDirectory::create(options.staging_root, "export")?;
    let mut copy_buffer = vec![0u8; options.copy_buffer_bytes.max(1)];
    let mut stager = AttachmentStager {
        staging: &staging,
        resolver,
        copy_buffer: &mut copy_buffer,
        staged: Vec::new(),
        warnings: Vec::new(),
    };

    let sections = build_sections(snapshot, &mut stager)?;
    let staged = std::mem::take(&mut stager.staged);
    let warnings = std::mem::take(&mut stager.warnings);

    report_progress(BackupStage::Serializing, 35.0, "Serializing dataset");
    let document = render_document(&sections)?;
    let data_path = staging.join(DATA_ENTRY_NAME);
    fs::write(&data_path, document.as_bytes())
        .map_err(|error| io_error("Failed to stage archive text", error))?;

    report_progress(BackupStage::Packaging, 60.0, "Packaging archive");
    let mut entries = Vec::with_capacity(staged.len() + 1);
    entries.push((DATA_ENTRY_NAME.to_string(), data_path));
    entries.extend(staged);
    package_archive(sink, &entries, &mut copy_buffer)?;

    let mut counts = BTreeMap::new();
    for section in &sections {
        counts.insert(section.kind, section.rows.len());
    }

    let attachments = entries.len() - 1;
    for warning in &warnings {
        tracing::warn!("Export warning: {}", warning);
    }

    report_progress(BackupStage::Completed, 100.0, "Export completed");
    Ok(ExportResult {
        archive_path: sink.to_path_buf(),
        counts,
        attachments,
        warnings,
    })
}

struct AttachmentStager<'a> {
    staging: &'a StagingDirectory,
    resolver: &'a dyn AttachmentResolver,
    copy_buffer: &'a mut Vec<u8>,
    staged: Vec<(String, PathBuf)>,
    warnings: Vec<BackupWarning>,
}

impl AttachmentStager<'_> {
    /// Stage one attachment and return its entry name, or an empty string
    /// when the reference is empty or cannot be opened.
    fn stage(
        &mut self,
        kind: EntityKind,
        archive_id: i64,
        reference: Option<&str>,
    ) -> Result<String, DomainError> {
        let Some(reference) = reference.filter(|value| !value.trim().is_empty()) else {
            return Ok(String::new());
        };

        let mut source = match self.resolver.open(reference) {
            Ok(source) => source,
            Err(error) => {
                self.warnings.push(BackupWarning::attachment(
                    kind,
                    format!(
                        "Attachment of record {} could not be opened ({}); exported without it",
                        archive_id, error
                    ),
                ));
                return Ok(String::new());
            }
        };

        let entry_name = attachment_entry_name(kind, archive_id, reference);
        let staged_path = self.staging.join(&entry_name);
        let file = File::create(&staged_path)
            .map_err(|error| io_error("Failed to create staged attachment", error))?;
        let mut writer = BufWriter::new(file);
        copy_stream(
            &mut source,
            &mut writer,
            self.copy_buffer,
            "Failed to read attachment",
            "Failed to stage attachment",
        )?;
        writer
            .flush()
            .map_err(|error| io_error("Failed to flush staged attachment", error))?;

        self.staged.push((entry_name.clone(), staged_path));
        Ok(entry_name)
    }
}

fn build_sections(
    snapshot: &DatasetSnapshot,
    stager: &mut AttachmentStager<'_>,
) -> Result<Vec<SectionRows>, DomainError> {
    // Plants arrive in name order; archive ids follow that order.
    let plant_ordinals: HashMap<i64, i64> = snapshot
        .plants
        .iter()
        .enumerate()
        .map(|(index, plant)| (plant.id, index as i64 + 1))
        .collect();
    let plant_ref = |kind: EntityKind,
                     plant_id: i64,
                     warnings: &mut Vec<BackupWarning>|
     -> Option<String> {
        match plant_ordinals.get(&plant_id) {
            Some(ordinal) => Some(ordinal.to_string()),
            None => {
                warnings.push(BackupWarning::row(
                    kind,
                    format!("Skipped row referencing plant {} outside the export", plant_id),
                ));
                None
            }
        }
    };

    let mut sections = Vec::with_capacity(EntityKind::ALL.len());

    let mut rows = Vec::with_capacity(snapshot.plants.len());
    for (index, plant) in snapshot.plants.iter().enumerate() {
        let archive_id = index as i64 + 1;
        let photo = stager.stage(EntityKind::Plants, archive_id, plant.photo_uri.as_deref())?;
        rows.push(vec![
            archive_id.to_string(),
            plant.name.clone(),
            plant.description.clone(),
            plant.species_key.clone(),
            plant.location.clone(),
            plant.acquired_at.to_string(),
            photo,
        ]);
    }
    sections.push(SectionRows {
        kind: EntityKind::Plants,
        rows,
    });

    let mut rows = Vec::with_capacity(snapshot.photos.len());
    for photo in &snapshot.photos {
        let Some(plant_id) = plant_ref(EntityKind::PlantPhotos, photo.plant_id, &mut stager.warnings)
        else {
            continue;
        };
        let archive_id = rows.len() as i64 + 1;
        let entry = stager.stage(EntityKind::PlantPhotos, archive_id, Some(&photo.photo_uri))?;
        rows.push(vec![
            archive_id.to_string(),
            plant_id,
            entry,
            photo.created_at.to_string(),
        ]);
    }
    sections.push(SectionRows {
        kind: EntityKind::PlantPhotos,
        rows,
    });

    let mut rows = Vec::with_capacity(snapshot.calibrations.len());
    for calibration in &snapshot.calibrations {
        let Some(plant_id) = plant_ref(
            EntityKind::PlantCalibrations,
            calibration.plant_id,
            &mut stager.warnings,
        ) else {
            continue;
        };
        rows.push(vec![
            plant_id,
            format_float(calibration.ambient_factor),
            format_float(calibration.camera_factor),
        ]);
    }
    sections.push(SectionRows {
        kind: EntityKind::PlantCalibrations,
        rows,
    });

    let rows = snapshot
        .species_targets
        .iter()
        .map(|target| {
            let mut row = Vec::with_capacity(1 + GrowthStage::ALL.len() * 4);
            row.push(target.species_key.clone());
            for stage in GrowthStage::ALL {
                let range = target.range(stage);
                row.push(format_float(range.flux_min));
                row.push(format_float(range.flux_max));
                row.push(format_float(range.dli_min));
                row.push(format_float(range.dli_max));
            }
            row
        })
        .collect();
    sections.push(SectionRows {
        kind: EntityKind::SpeciesTargets,
        rows,
    });

    let mut rows = Vec::with_capacity(snapshot.measurements.len());
    for measurement in &snapshot.measurements {
        let Some(plant_id) = plant_ref(
            EntityKind::Measurements,
            measurement.plant_id,
            &mut stager.warnings,
        ) else {
            continue;
        };
        rows.push(vec![
            (rows.len() + 1).to_string(),
            plant_id,
            measurement.measured_at.to_string(),
            format_float(measurement.raw_average),
            format_float(measurement.flux),
        ]);
    }
    sections.push(SectionRows {
        kind: EntityKind::Measurements,
        rows,
    });

    let mut rows = Vec::with_capacity(snapshot.diary_entries.len());
    for entry in &snapshot.diary_entries {
        let Some(plant_id) =
            plant_ref(EntityKind::DiaryEntries, entry.plant_id, &mut stager.warnings)
        else {
            continue;
        };
        let archive_id = rows.len() as i64 + 1;
        let photo = stager.stage(EntityKind::DiaryEntries, archive_id, entry.photo_uri.as_deref())?;
        rows.push(vec![
            archive_id.to_string(),
            plant_id,
            entry.created_at.to_string(),
            entry.entry_type.clone(),
            entry.note.clone(),
            photo,
        ]);
    }
    sections.push(SectionRows {
        kind: EntityKind::DiaryEntries,
        rows,
    });

    let mut rows = Vec::with_capacity(snapshot.reminders.len());
    for reminder in &snapshot.reminders {
        let Some(plant_id) =
            plant_ref(EntityKind::Reminders, reminder.plant_id, &mut stager.warnings)
        else {
            continue;
        };
        rows.push(vec![
            (rows.len() + 1).to_string(),
            plant_id,
            reminder.trigger_at.to_string(),
            reminder.message.clone(),
        ]);
    }
    sections.push(SectionRows {
        kind: EntityKind::Reminders,
        rows,
    });

    Ok(sections)
}

/// `Version,<N>`, a blank line, then every section followed by a blank line.
fn render_document(sections: &[SectionRows]) -> Result<String, DomainError> {
    let mut document = format!("{},{}\n\n", VERSION_KEY, CURRENT_VERSION);

    for section in sections {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());

        writer
            .write_record([section.kind.section_name()])
            .and_then(|_| writer.write_record(columns(section.kind)))
            .map_err(|error| serialize_error(section.kind, error))?;
        for row in &section.rows {
            writer
                .write_record(row)
                .map_err(|error| serialize_error(section.kind, error))?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|error| serialize_error(section.kind, error))?;
        let text = String::from_utf8(bytes).map_err(|error| serialize_error(section.kind, error))?;
        document.push_str(&text);
        document.push('\n');
    }

    Ok(document)
}

fn serialize_error(kind: EntityKind, error: impl std::fmt::Display) -> DomainError {
    DomainError::InternalError(format!("Failed to serialize {} section: {}", kind, error))
}

/// Write every entry into `<sink>.partial`, then rename it over `sink`.
fn package_archive(
    sink: &Path,
    entries: &[(String, PathBuf)],
    copy_buffer: &mut [u8],
) -> Result<(), DomainError> {
    if let Some(parent) = sink.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| io_error("Failed to create export output directory", error))?;
    }

    let partial_path = partial_path(sink);
    let result = write_container(&partial_path, entries, copy_buffer).and_then(|_| {
        fs::rename(&partial_path, sink)
            .map_err(|error| io_error("Failed to move archive into place", error))
    });

    if result.is_err() {
        remove_file_if_exists(&partial_path);
    }
    result
}

fn write_container(
    path: &Path,
    entries: &[(String, PathBuf)],
    copy_buffer: &mut [u8],
) -> Result<(), DomainError> {
    let file_options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    let output_file =
        File::create(path).map_err(|error| io_error("Failed to create export archive file", error))?;
    let buffered_output = BufWriter::with_capacity(FILE_IO_BUFFER_BYTES, output_file);
    let mut writer = ZipWriter::new(buffered_output);

    for (entry_name, source_path) in entries {
        writer
            .start_file(entry_name.as_str(), file_options)
            .map_err(|error| io_error("Failed to add file to archive", error))?;

        let mut source_file = File::open(source_path)
            .map_err(|error| io_error("Failed to open staged file", error))?;
        copy_stream(
            &mut source_file,
            &mut writer,
            copy_buffer,
            "Failed to read staged file",
            "Failed to write file to archive",
        )?;
    }

    let mut buffered_output = writer
        .finish()
        .map_err(|error| io_error("Failed to finalize export archive", error))?;
    buffered_output
        .flush()
        .map_err(|error| io_error("Failed to flush export archive", error))?;
    buffered_output
        .get_ref()
        .sync_all()
        .map_err(|error| io_error("Failed to sync export archive", error))?;

    Ok(())
}

pub(crate) fn partial_path(sink: &Path) -> PathBuf {
    let mut name = sink.as_os_str().to_os_string();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Copy through a bounded buffer.
pub(crate) fn copy_stream<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
    copy_buffer: &mut [u8],
    read_error_context: &str,
    write_error_context: &str,
) -> Result<u64, DomainError> {
    let mut copied = 0u64;
    loop {
        let bytes_read = reader
            .read(copy_buffer)
            .map_err(|error| io_error(read_error_context, error))?;
        if bytes_read == 0 {
            break;
        }

        writer
            .write_all(&copy_buffer[..bytes_read])
            .map_err(|error| io_error(write_error_context, error))?;
        copied += bytes_read as u64;
    }

    Ok(copied)
}

#[cfg(test)]
mod tests;

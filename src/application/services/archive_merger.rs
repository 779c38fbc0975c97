use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::errors::DomainError;
use crate::domain::models::backup::{
    BackupStage, BackupWarning, EntityKind, ExportScope, MergeMode, MergeResult,
};
use crate::domain::models::plant::{
    DiaryEntry, Measurement, Plant, PlantCalibration, PlantPhoto, Reminder, SpeciesTarget,
};
use crate::domain::repositories::attachment_repository::AttachmentStorage;
use crate::domain::repositories::plant_repository::PlantRepository;
use crate::infrastructure::logging::logger;
use crate::infrastructure::persistence::backup_archive::ImportModel;
use crate::infrastructure::persistence::backup_archive::writer::copy_stream;

pub type MergeProgress<'a> = dyn FnMut(BackupStage, f32, &str) + Send + 'a;

/// Applies a parsed archive to the live store.
///
/// Plants are reconciled by name and get a translation from archive id to
/// local id; every dependent row goes through that translation. Each entity
/// group commits atomically; a failing group becomes a warning and the
/// result is marked partial.
pub struct ArchiveMerger {
    repository: Arc<dyn PlantRepository>,
    storage: Arc<dyn AttachmentStorage>,
    copy_buffer_bytes: usize,
}

/// Per-import state shared by the entity groups.
struct MergeContext<'m> {
    model: &'m ImportModel,
    result: MergeResult,
    /// Archive plant id to local plant id
    translation: HashMap<i64, i64>,
    /// Local plants that existed before this import
    matched_plants: HashSet<i64>,
}

impl MergeContext<'_> {
    fn resolve_plant(&mut self, kind: EntityKind, row_id: i64, archive_plant_id: i64) -> Option<i64> {
        match self.translation.get(&archive_plant_id) {
            Some(local_id) => Some(*local_id),
            None => {
                self.result.counts_mut(kind).skipped += 1;
                self.result.warnings.push(BackupWarning::row(
                    kind,
                    format!(
                        "Dropped record {} referencing unknown plant {}",
                        row_id, archive_plant_id
                    ),
                ));
                None
            }
        }
    }
}

fn measurement_key(row: &Measurement) -> (i64, i64, u64, u64) {
    (
        row.plant_id,
        row.measured_at,
        row.raw_average.to_bits(),
        row.flux.to_bits(),
    )
}

fn diary_key(row: &DiaryEntry) -> (i64, i64, String, String) {
    (
        row.plant_id,
        row.created_at,
        row.entry_type.clone(),
        row.note.clone(),
    )
}

fn reminder_key(row: &Reminder) -> (i64, i64, String) {
    (row.plant_id, row.trigger_at, row.message.clone())
}

fn photo_key(row: &PlantPhoto) -> (i64, i64) {
    (row.plant_id, row.created_at)
}

impl ArchiveMerger {
    pub fn new(
        repository: Arc<dyn PlantRepository>,
        storage: Arc<dyn AttachmentStorage>,
        copy_buffer_bytes: usize,
    ) -> Self {
        Self {
            repository,
            storage,
            copy_buffer_bytes: copy_buffer_bytes.max(1),
        }
    }

    /// Merge `model` into the store.
    ///
    /// Only a failure to clear the store in `Replace` mode or to read the
    /// live plant names is fatal; group failures are reported in the result.
    pub async fn merge(
        &self,
        model: &ImportModel,
        mode: MergeMode,
        report_progress: &mut MergeProgress<'_>,
    ) -> Result<MergeResult, DomainError> {
        let mut context = MergeContext {
            model,
            result: MergeResult::default(),
            translation: HashMap::new(),
            matched_plants: HashSet::new(),
        };
        context.result.warnings.extend(model.warnings.iter().cloned());

        let existing_names = match mode {
            MergeMode::Replace => {
                report_progress(BackupStage::Merging, 5.0, "Clearing existing data");
                logger::info("Replace import: clearing dataset tables");
                self.repository.clear_all().await?;
                HashMap::new()
            }
            MergeMode::Merge => self.repository.plant_ids_by_name().await?,
        };

        let group_count = EntityKind::ALL.len() as f32;
        for (index, kind) in EntityKind::ALL.into_iter().enumerate() {
            let percent = 10.0 + 85.0 * index as f32 / group_count;
            report_progress(BackupStage::Merging, percent, &format!("Merging {}", kind));

            let outcome = match kind {
                EntityKind::Plants => self.merge_plants(&mut context, &existing_names).await,
                EntityKind::PlantPhotos => self.merge_photos(&mut context).await,
                EntityKind::PlantCalibrations => self.merge_calibrations(&mut context).await,
                EntityKind::SpeciesTargets => self.merge_species_targets(&mut context).await,
                EntityKind::Measurements => self.merge_measurements(&mut context).await,
                EntityKind::DiaryEntries => self.merge_diary_entries(&mut context).await,
                EntityKind::Reminders => self.merge_reminders(&mut context).await,
            };

            if let Err(failure) = outcome {
                self.record_group_failure(&mut context.result, kind, failure)
                    .await;
            }
        }

        report_progress(BackupStage::Merging, 95.0, "Merge finished");
        Ok(context.result)
    }

    async fn merge_plants(
        &self,
        context: &mut MergeContext<'_>,
        existing_names: &HashMap<String, i64>,
    ) -> Result<(), GroupFailure> {
        let model = context.model;
        let mut seen_archive_ids = HashSet::new();
        let mut first_by_name: HashMap<&str, i64> = HashMap::new();
        let mut aliases = Vec::new();
        let mut archive_ids = Vec::new();
        let mut plants = Vec::new();
        let mut restaged = Vec::new();

        for plant in &model.rows.plants {
            if !seen_archive_ids.insert(plant.id) {
                context.result.counts_mut(EntityKind::Plants).skipped += 1;
                context.result.warnings.push(BackupWarning::row(
                    EntityKind::Plants,
                    format!("Skipped plant {:?}: duplicate archive id {}", plant.name, plant.id),
                ));
                continue;
            }

            if let Some(local_id) = existing_names.get(&plant.name) {
                context.translation.insert(plant.id, *local_id);
                context.matched_plants.insert(*local_id);
                context.result.counts_mut(EntityKind::Plants).matched += 1;
                continue;
            }

            if let Some(first_id) = first_by_name.get(plant.name.as_str()) {
                aliases.push((plant.id, *first_id));
                context.result.counts_mut(EntityKind::Plants).skipped += 1;
                context.result.warnings.push(BackupWarning::row(
                    EntityKind::Plants,
                    format!(
                        "Plant {:?} appears more than once; its records join the first one",
                        plant.name
                    ),
                ));
                continue;
            }
            first_by_name.insert(plant.name.as_str(), plant.id);

            let photo_uri = self
                .restage_reference(
                    context,
                    EntityKind::Plants,
                    plant.id,
                    plant.photo_uri.as_deref(),
                    &mut restaged,
                )
                .await;
            archive_ids.push(plant.id);
            plants.push(Plant {
                id: 0,
                photo_uri,
                ..plant.clone()
            });
        }

        let local_ids = self
            .repository
            .insert_plants(plants)
            .await
            .map_err(|error| GroupFailure::new(error, restaged))?;

        context.result.counts_mut(EntityKind::Plants).inserted += local_ids.len();
        for (archive_id, local_id) in archive_ids.into_iter().zip(local_ids) {
            context.translation.insert(archive_id, local_id);
        }
        for (alias, first_id) in aliases {
            if let Some(local_id) = context.translation.get(&first_id).copied() {
                context.translation.insert(alias, local_id);
            }
        }

        Ok(())
    }

    async fn merge_photos(&self, context: &mut MergeContext<'_>) -> Result<(), GroupFailure> {
        let model = context.model;
        let existing: HashSet<(i64, i64)> = if context.matched_plants.is_empty() {
            HashSet::new()
        } else {
            self.repository
                .get_plant_photos(ExportScope::All)
                .await
                .map_err(GroupFailure::from)?
                .iter()
                .filter(|row| context.matched_plants.contains(&row.plant_id))
                .map(photo_key)
                .collect()
        };

        let mut photos = Vec::new();
        let mut restaged = Vec::new();
        for photo in &model.rows.photos {
            let Some(plant_id) = context.resolve_plant(EntityKind::PlantPhotos, photo.id, photo.plant_id)
            else {
                continue;
            };
            let mut row = PlantPhoto {
                id: 0,
                plant_id,
                ..photo.clone()
            };
            if existing.contains(&photo_key(&row)) {
                context.result.counts_mut(EntityKind::PlantPhotos).skipped += 1;
                continue;
            }

            if photo.photo_uri.is_empty() {
                context.result.warnings.push(BackupWarning::attachment(
                    EntityKind::PlantPhotos,
                    format!("Photo record {} carries no attachment", photo.id),
                ));
            }
            // A failed restage keeps the record with an empty reference.
            row.photo_uri = self
                .restage_reference(
                    context,
                    EntityKind::PlantPhotos,
                    photo.id,
                    Some(&photo.photo_uri),
                    &mut restaged,
                )
                .await
                .unwrap_or_default();
            photos.push(row);
        }

        let inserted = self
            .repository
            .insert_plant_photos(photos)
            .await
            .map_err(|error| GroupFailure::new(error, restaged))?;
        context.result.counts_mut(EntityKind::PlantPhotos).inserted += inserted;
        Ok(())
    }

    async fn merge_calibrations(&self, context: &mut MergeContext<'_>) -> Result<(), GroupFailure> {
        let model = context.model;
        let mut by_plant: HashMap<i64, usize> = HashMap::new();
        let mut calibrations: Vec<PlantCalibration> = Vec::new();

        for calibration in &model.rows.calibrations {
            let Some(plant_id) = context.resolve_plant(
                EntityKind::PlantCalibrations,
                calibration.plant_id,
                calibration.plant_id,
            ) else {
                continue;
            };
            let row = PlantCalibration {
                plant_id,
                ..calibration.clone()
            };
            match by_plant.get(&plant_id) {
                Some(index) => {
                    calibrations[*index] = row;
                    context.result.counts_mut(EntityKind::PlantCalibrations).skipped += 1;
                }
                None => {
                    by_plant.insert(plant_id, calibrations.len());
                    calibrations.push(row);
                }
            }
        }

        let count = self.repository.upsert_calibrations(calibrations).await?;
        let counts = context.result.counts_mut(EntityKind::PlantCalibrations);
        counts.inserted += count.inserted;
        counts.updated += count.updated;
        Ok(())
    }

    async fn merge_species_targets(
        &self,
        context: &mut MergeContext<'_>,
    ) -> Result<(), GroupFailure> {
        let model = context.model;
        let mut by_key: HashMap<&str, usize> = HashMap::new();
        let mut targets: Vec<SpeciesTarget> = Vec::new();

        // Last write wins inside the archive as well as against the store.
        for target in &model.rows.species_targets {
            match by_key.get(target.species_key.as_str()) {
                Some(index) => {
                    targets[*index] = target.clone();
                    context.result.counts_mut(EntityKind::SpeciesTargets).skipped += 1;
                }
                None => {
                    by_key.insert(target.species_key.as_str(), targets.len());
                    targets.push(target.clone());
                }
            }
        }

        let count = self.repository.upsert_species_targets(targets).await?;
        let counts = context.result.counts_mut(EntityKind::SpeciesTargets);
        counts.inserted += count.inserted;
        counts.updated += count.updated;
        Ok(())
    }

    async fn merge_measurements(&self, context: &mut MergeContext<'_>) -> Result<(), GroupFailure> {
        let model = context.model;
        let existing: HashSet<(i64, i64, u64, u64)> = if context.matched_plants.is_empty() {
            HashSet::new()
        } else {
            self.repository
                .get_measurements(ExportScope::All)
                .await?
                .iter()
                .filter(|row| context.matched_plants.contains(&row.plant_id))
                .map(measurement_key)
                .collect()
        };

        let mut measurements = Vec::new();
        for measurement in &model.rows.measurements {
            let Some(plant_id) =
                context.resolve_plant(EntityKind::Measurements, measurement.id, measurement.plant_id)
            else {
                continue;
            };
            let row = Measurement {
                id: 0,
                plant_id,
                ..measurement.clone()
            };
            if existing.contains(&measurement_key(&row)) {
                context.result.counts_mut(EntityKind::Measurements).skipped += 1;
                continue;
            }
            measurements.push(row);
        }

        let inserted = self.repository.insert_measurements(measurements).await?;
        context.result.counts_mut(EntityKind::Measurements).inserted += inserted;
        Ok(())
    }

    async fn merge_diary_entries(&self, context: &mut MergeContext<'_>) -> Result<(), GroupFailure> {
        let model = context.model;
        let existing: HashSet<(i64, i64, String, String)> = if context.matched_plants.is_empty() {
            HashSet::new()
        } else {
            self.repository
                .get_diary_entries(ExportScope::All)
                .await?
                .iter()
                .filter(|row| context.matched_plants.contains(&row.plant_id))
                .map(diary_key)
                .collect()
        };

        let mut entries = Vec::new();
        let mut restaged = Vec::new();
        for entry in &model.rows.diary_entries {
            let Some(plant_id) =
                context.resolve_plant(EntityKind::DiaryEntries, entry.id, entry.plant_id)
            else {
                continue;
            };
            let mut row = DiaryEntry {
                id: 0,
                plant_id,
                ..entry.clone()
            };
            if existing.contains(&diary_key(&row)) {
                context.result.counts_mut(EntityKind::DiaryEntries).skipped += 1;
                continue;
            }

            row.photo_uri = self
                .restage_reference(
                    context,
                    EntityKind::DiaryEntries,
                    entry.id,
                    entry.photo_uri.as_deref(),
                    &mut restaged,
                )
                .await;
            entries.push(row);
        }

        let inserted = self
            .repository
            .insert_diary_entries(entries)
            .await
            .map_err(|error| GroupFailure::new(error, restaged))?;
        context.result.counts_mut(EntityKind::DiaryEntries).inserted += inserted;
        Ok(())
    }

    async fn merge_reminders(&self, context: &mut MergeContext<'_>) -> Result<(), GroupFailure> {
        let model = context.model;
        let existing: HashSet<(i64, i64, String)> = if context.matched_plants.is_empty() {
            HashSet::new()
        } else {
            self.repository
                .get_reminders(ExportScope::All)
                .await?
                .iter()
                .filter(|row| context.matched_plants.contains(&row.plant_id))
                .map(reminder_key)
                .collect()
        };

        let mut reminders = Vec::new();
        for reminder in &model.rows.reminders {
            let Some(plant_id) =
                context.resolve_plant(EntityKind::Reminders, reminder.id, reminder.plant_id)
            else {
                continue;
            };
            let row = Reminder {
                id: 0,
                plant_id,
                ..reminder.clone()
            };
            if existing.contains(&reminder_key(&row)) {
                context.result.counts_mut(EntityKind::Reminders).skipped += 1;
                continue;
            }
            reminders.push(row);
        }

        let inserted = self.repository.insert_reminders(reminders).await?;
        context.result.counts_mut(EntityKind::Reminders).inserted += inserted;
        Ok(())
    }

    /// Copy an archive attachment into persistent storage.
    ///
    /// Returns the new reference, or `None` with a warning when the entry is
    /// missing or cannot be copied.
    async fn restage_reference(
        &self,
        context: &mut MergeContext<'_>,
        kind: EntityKind,
        row_id: i64,
        entry_name: Option<&str>,
        restaged: &mut Vec<String>,
    ) -> Option<String> {
        let entry_name = entry_name.filter(|name| !name.is_empty())?;
        let model = context.model;

        let Some(source) = model.attachment_path(entry_name) else {
            context.result.warnings.push(BackupWarning::attachment(
                kind,
                format!(
                    "Attachment {} of record {} is missing from the archive",
                    entry_name, row_id
                ),
            ));
            return None;
        };

        match self
            .copy_into_storage(source.to_path_buf(), entry_name.to_string())
            .await
        {
            Ok(reference) => {
                restaged.push(reference.clone());
                Some(reference)
            }
            Err(error) => {
                logger::warn(&format!("Failed to restage {}: {}", entry_name, error));
                context.result.warnings.push(BackupWarning::attachment(
                    kind,
                    format!(
                        "Attachment {} of record {} could not be restored: {}",
                        entry_name, row_id, error
                    ),
                ));
                None
            }
        }
    }

    async fn copy_into_storage(
        &self,
        source: PathBuf,
        file_name: String,
    ) -> Result<String, DomainError> {
        let storage = Arc::clone(&self.storage);
        let buffer_bytes = self.copy_buffer_bytes;

        tokio::task::spawn_blocking(move || {
            let mut input = File::open(&source).map_err(|error| {
                DomainError::ArchiveIo(format!("Failed to open staged attachment: {}", error))
            })?;
            let mut allocated = storage.allocate(&file_name)?;
            let mut copy_buffer = vec![0u8; buffer_bytes];

            let copied = copy_stream(
                &mut input,
                &mut allocated.writer,
                &mut copy_buffer,
                "Failed to read staged attachment",
                "Failed to write photo",
            )
            .and_then(|_| {
                allocated.writer.flush().map_err(|error| {
                    DomainError::ArchiveIo(format!("Failed to flush photo: {}", error))
                })
            });

            match copied {
                Ok(()) => Ok(allocated.reference),
                Err(error) => {
                    drop(allocated.writer);
                    storage.discard(&allocated.reference);
                    Err(error)
                }
            }
        })
        .await
        .map_err(|error| DomainError::InternalError(format!("Restage task failed: {}", error)))?
    }

    async fn record_group_failure(
        &self,
        result: &mut MergeResult,
        kind: EntityKind,
        failure: GroupFailure,
    ) {
        logger::error(&format!("Import of {} failed: {}", kind, failure.error));

        if !failure.restaged.is_empty() {
            let storage = Arc::clone(&self.storage);
            let restaged = failure.restaged;
            let discarded = tokio::task::spawn_blocking(move || {
                for reference in &restaged {
                    storage.discard(reference);
                }
            })
            .await;
            if let Err(error) = discarded {
                logger::warn(&format!("Failed to discard restaged attachments: {}", error));
            }
        }

        result.partial = true;
        result.warnings.push(BackupWarning::group_failure(
            kind,
            format!("{} were not imported: {}", kind, failure.error),
        ));
    }
}

/// A group write that failed, with the attachments it had already restaged.
struct GroupFailure {
    error: DomainError,
    restaged: Vec<String>,
}

impl GroupFailure {
    fn new(error: DomainError, restaged: Vec<String>) -> Self {
        Self { error, restaged }
    }
}

impl From<DomainError> for GroupFailure {
    fn from(error: DomainError) -> Self {
        Self::new(error, Vec::new())
    }
}

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::random;
use tokio::runtime::Handle;

use crate::application::services::archive_merger::ArchiveMerger;
use crate::application::services::dataset_reader::DatasetReader;
use crate::domain::models::backup::{
    BackupStage, EntityKind, ExportScope, FailureKind, MergeMode,
};
use crate::domain::models::plant::{
    DiaryEntry, Measurement, Plant, PlantCalibration, PlantPhoto, Reminder, SpeciesTarget,
};
use crate::domain::repositories::plant_repository::PlantRepository;
use crate::infrastructure::persistence::attachment_store::LocalAttachmentStore;
use crate::infrastructure::persistence::backup_jobs::BackupJobRegistry;
use crate::infrastructure::persistence::settings::BackupSettings;
use crate::infrastructure::repositories::sqlite_plant_repository::SqlitePlantRepository;

use super::{
    BackupRuntime, ExportCoordinator, ExportRequest, ImportCoordinator, ImportRequest,
    PipelineOptions,
};

/// One store with both coordinators wired the way the app does it.
struct Store {
    repository: Arc<SqlitePlantRepository>,
    photos_dir: PathBuf,
    exporter: ExportCoordinator,
    importer: ImportCoordinator,
    registry: Arc<BackupJobRegistry>,
}

impl Store {
    fn new(root: &std::path::Path, name: &str) -> Self {
        let repository = Arc::new(SqlitePlantRepository::in_memory().expect("open store"));
        let photos_dir = root.join(name).join("photos");
        let attachments = Arc::new(LocalAttachmentStore::new(photos_dir.clone()));
        let registry = Arc::new(BackupJobRegistry::new());
        let runtime = BackupRuntime::new(Handle::current(), 2, Arc::clone(&registry));
        let options = PipelineOptions::new(root.join("staging"), &BackupSettings::default());

        let exporter = ExportCoordinator::new(
            runtime.clone(),
            Arc::new(DatasetReader::new(repository.clone())),
            attachments.clone(),
            options.clone(),
        );
        let importer = ImportCoordinator::new(
            runtime,
            Arc::new(ArchiveMerger::new(
                repository.clone(),
                attachments,
                options.copy_buffer_bytes,
            )),
            options,
        );

        Self {
            repository,
            photos_dir,
            exporter,
            importer,
            registry,
        }
    }

    async fn plant_names(&self) -> Vec<String> {
        self.repository
            .get_plants(ExportScope::All)
            .await
            .expect("plants")
            .into_iter()
            .map(|plant| plant.name)
            .collect()
    }
}

struct TempRoot(PathBuf);

impl TempRoot {
    fn new() -> Self {
        let root = std::env::temp_dir().join(format!("plantkeeper-backup-{}", random::<u64>()));
        fs::create_dir_all(root.join("staging")).expect("create staging root");
        Self(root)
    }

    fn staging_is_empty(&self) -> bool {
        fs::read_dir(self.0.join("staging"))
            .expect("read staging root")
            .next()
            .is_none()
    }
}

impl Drop for TempRoot {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

/// One row of every kind, a plant photo, a diary photo, a gallery photo and
/// a gallery photo whose file is gone.
async fn seed(store: &Store) -> Vec<i64> {
    let repository = &store.repository;
    fs::create_dir_all(&store.photos_dir).expect("create photos dir");
    let leaf = store.photos_dir.join("leaf.jpg");
    let soil = store.photos_dir.join("soil.png");
    let bud = store.photos_dir.join("bud.jpg");
    fs::write(&leaf, b"leaf bytes").expect("write leaf");
    fs::write(&soil, b"soil bytes").expect("write soil");
    fs::write(&bud, b"bud bytes").expect("write bud");

    let mut monstera = Plant::new("Monstera", "monstera_deliciosa", 10);
    monstera.photo_uri = Some(leaf.display().to_string());
    let ids = repository
        .insert_plants(vec![monstera, Plant::new("Ficus", "ficus_lyrata", 20)])
        .await
        .expect("plants");
    repository
        .insert_plant_photos(vec![
            PlantPhoto {
                id: 0,
                plant_id: ids[0],
                photo_uri: store.photos_dir.join("gone.jpg").display().to_string(),
                created_at: 50,
            },
            PlantPhoto {
                id: 0,
                plant_id: ids[1],
                photo_uri: bud.display().to_string(),
                created_at: 60,
            },
        ])
        .await
        .expect("photos");
    repository
        .upsert_calibrations(vec![PlantCalibration {
            plant_id: ids[1],
            ambient_factor: 1.25,
            camera_factor: 0.75,
        }])
        .await
        .expect("calibrations");
    repository
        .upsert_species_targets(vec![SpeciesTarget::new("ficus_lyrata")])
        .await
        .expect("targets");
    repository
        .insert_measurements(vec![
            Measurement {
                id: 0,
                plant_id: ids[0],
                measured_at: 100,
                raw_average: 12.25,
                flux: 300.5,
            },
            Measurement {
                id: 0,
                plant_id: ids[1],
                measured_at: 200,
                raw_average: 0.1,
                flux: 1e-3,
            },
        ])
        .await
        .expect("measurements");
    repository
        .insert_diary_entries(vec![DiaryEntry {
            id: 0,
            plant_id: ids[1],
            created_at: 300,
            entry_type: "note".to_string(),
            note: "New leaf, \"finally\"".to_string(),
            photo_uri: Some(soil.display().to_string()),
        }])
        .await
        .expect("diary");
    repository
        .insert_reminders(vec![Reminder {
            id: 0,
            plant_id: ids[0],
            trigger_at: 400,
            message: "Water".to_string(),
        }])
        .await
        .expect("reminders");
    ids
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn export_then_import_reproduces_the_dataset() {
    let root = TempRoot::new();
    let source = Store::new(&root.0, "source");
    let target = Store::new(&root.0, "target");
    seed(&source).await;
    let archive = root.0.join("backup.zip");

    let mut job = source
        .exporter
        .export(ExportRequest {
            sink: archive.clone(),
            scope: ExportScope::All,
        })
        .expect("start export");
    let mut stages = Vec::new();
    while let Some(progress) = job.progress.recv().await {
        stages.push(progress.stage);
    }
    let exported = job.wait().await;
    assert!(exported.success, "{}", exported.summary);
    assert_eq!(stages.last(), Some(&BackupStage::Completed));
    assert!(archive.is_file());
    assert!(root.staging_is_empty());

    let imported = target
        .importer
        .import_data(ImportRequest {
            source: archive,
            mode: MergeMode::Merge,
        })
        .expect("start import")
        .wait()
        .await;
    assert!(imported.success, "{}", imported.summary);
    for kind in EntityKind::ALL {
        assert_eq!(
            imported.counts[&kind].inserted,
            exported.counts[&kind].inserted,
            "{kind}"
        );
        assert!(exported.counts[&kind].inserted > 0, "{kind} not seeded");
    }
    // The missing gallery file is reported once on each side.
    assert_eq!(exported.warnings.len(), 1);
    assert!(exported.warnings[0].message.contains("gone.jpg"));
    assert_eq!(imported.warnings.len(), 1);
    assert_eq!(imported.warnings[0].entity, Some(EntityKind::PlantPhotos));
    assert!(root.staging_is_empty());

    assert_eq!(source.plant_names().await, target.plant_names().await);
    let measurements = target
        .repository
        .get_measurements(ExportScope::All)
        .await
        .expect("measurements");
    let mut values = measurements
        .iter()
        .map(|measurement| (measurement.raw_average, measurement.flux))
        .collect::<Vec<_>>();
    values.sort_by(|a, b| a.0.total_cmp(&b.0));
    assert_eq!(values, vec![(0.1, 1e-3), (12.25, 300.5)]);

    let diary = target
        .repository
        .get_diary_entries(ExportScope::All)
        .await
        .expect("diary");
    assert_eq!(diary[0].note, "New leaf, \"finally\"");
    let diary_photo = diary[0].photo_uri.clone().expect("diary photo restaged");
    assert!(Path::new(&diary_photo).starts_with(&target.photos_dir));
    assert_eq!(fs::read(&diary_photo).expect("read diary photo"), b"soil bytes");

    let plants = target
        .repository
        .get_plants(ExportScope::All)
        .await
        .expect("plants");
    let monstera = plants
        .iter()
        .find(|plant| plant.name == "Monstera")
        .expect("monstera");
    let plant_photo = monstera.photo_uri.clone().expect("plant photo restaged");
    assert_eq!(fs::read(&plant_photo).expect("read plant photo"), b"leaf bytes");

    let mut gallery = target
        .repository
        .get_plant_photos(ExportScope::All)
        .await
        .expect("gallery");
    gallery.sort_by_key(|photo| photo.created_at);
    assert_eq!(gallery.len(), 2);
    assert_eq!(gallery[0].photo_uri, "");
    assert_eq!(fs::read(&gallery[1].photo_uri).expect("read gallery photo"), b"bud bytes");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn newer_major_version_is_rejected_without_writes() {
    let root = TempRoot::new();
    let store = Store::new(&root.0, "store");
    let archive = root.0.join("future.zip");
    {
        let file = fs::File::create(&archive).expect("create archive");
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("data", zip::write::SimpleFileOptions::default())
            .expect("start data");
        zip.write_all(b"Version,3\n\nPlants\nid,name,species\n1,Ficus,ficus_lyrata\n")
            .expect("write data");
        zip.finish().expect("finish archive");
    }

    let job = store
        .importer
        .import_data(ImportRequest {
            source: archive,
            mode: MergeMode::Replace,
        })
        .expect("start import");
    let job_id = job.job_id.clone();
    let outcome = job.wait().await;

    assert!(!outcome.success);
    assert_eq!(
        outcome.error.as_ref().map(|failure| failure.kind),
        Some(FailureKind::ArchiveFormat)
    );
    assert!(store.plant_names().await.is_empty());
    assert!(root.staging_is_empty());

    let status = store.registry.status(&job_id).expect("status");
    assert_eq!(status.state, "failed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_plant_export_carries_only_that_plant() {
    let root = TempRoot::new();
    let source = Store::new(&root.0, "source");
    let target = Store::new(&root.0, "target");
    let ids = seed(&source).await;
    let archive = root.0.join("ficus.zip");

    let exported = source
        .exporter
        .export(ExportRequest {
            sink: archive.clone(),
            scope: ExportScope::ForPlant(ids[1]),
        })
        .expect("start export")
        .wait()
        .await;
    assert!(exported.success, "{}", exported.summary);
    assert_eq!(exported.counts[&EntityKind::Plants].inserted, 1);
    assert_eq!(exported.counts[&EntityKind::Reminders].inserted, 0);

    target
        .importer
        .import_data(ImportRequest {
            source: archive,
            mode: MergeMode::Merge,
        })
        .expect("start import")
        .wait()
        .await;
    assert_eq!(target.plant_names().await, vec!["Ficus".to_string()]);
    assert_eq!(
        target
            .repository
            .get_species_targets(None)
            .await
            .expect("targets")
            .len(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_plant_export_fails_with_not_found() {
    let root = TempRoot::new();
    let store = Store::new(&root.0, "store");
    let sink = root.0.join("nothing.zip");

    let outcome = store
        .exporter
        .export(ExportRequest {
            sink: sink.clone(),
            scope: ExportScope::ForPlant(404),
        })
        .expect("start export")
        .wait()
        .await;

    assert!(!outcome.success);
    assert_eq!(
        outcome.error.map(|failure| failure.kind),
        Some(FailureKind::NotFound)
    );
    assert!(!sink.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn detached_job_still_completes_and_records_status() {
    let root = TempRoot::new();
    let store = Store::new(&root.0, "store");
    seed(&store).await;
    let archive = root.0.join("detached.zip");

    let job = store
        .exporter
        .export(ExportRequest {
            sink: archive.clone(),
            scope: ExportScope::All,
        })
        .expect("start export");
    let job_id = job.job_id.clone();
    drop(job);

    let mut state = String::new();
    for _ in 0..200 {
        state = store.registry.status(&job_id).expect("status").state;
        if state == "completed" || state == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    assert_eq!(state, "completed");
    assert!(archive.is_file());
    assert!(root.staging_is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_packaging_leaves_no_partial_output() {
    let root = TempRoot::new();
    let store = Store::new(&root.0, "store");
    seed(&store).await;
    let blocker = root.0.join("blocker");
    fs::write(&blocker, b"not a directory").expect("write blocker");
    let sink = blocker.join("backup.zip");

    let mut job = store
        .exporter
        .export(ExportRequest {
            sink: sink.clone(),
            scope: ExportScope::All,
        })
        .expect("start export");
    // Nobody listens for progress.
    job.progress.close();
    let outcome = job.wait().await;

    assert!(!outcome.success);
    assert_eq!(
        outcome.error.map(|failure| failure.kind),
        Some(FailureKind::ArchiveIo)
    );
    assert!(!sink.exists());
    assert!(root.staging_is_empty());
}

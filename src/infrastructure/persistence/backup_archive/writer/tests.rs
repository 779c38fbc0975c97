use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use rand::random;

use crate::domain::errors::DomainError;
use crate::domain::models::backup::{BackupStage, DatasetSnapshot, EntityKind, WarningKind};
use crate::domain::models::plant::{DiaryEntry, Measurement, Plant, SpeciesTarget};
use crate::infrastructure::persistence::attachment_store::LocalAttachmentStore;

use super::{ArchiveWriteOptions, partial_path, write_archive};

fn unique_temp_root() -> PathBuf {
    std::env::temp_dir().join(format!("plantkeeper-archive-writer-{}", random::<u64>()))
}

fn snapshot(photo_uri: Option<String>) -> DatasetSnapshot {
    let mut ficus = Plant::new("Ficus", "ficus_lyrata", 1_700_000_000_000);
    ficus.id = 41;
    ficus.location = "Living room, north window".to_string();
    ficus.photo_uri = photo_uri;

    let mut target = SpeciesTarget::new("ficus_lyrata");
    target.vegetative.flux_min = 150.5;
    target.vegetative.flux_max = 400.0;

    DatasetSnapshot {
        plants: vec![ficus],
        species_targets: vec![target],
        measurements: vec![
            Measurement {
                id: 7,
                plant_id: 41,
                measured_at: 1_700_000_100_000,
                raw_average: 88.25,
                flux: 212.5,
            },
            Measurement {
                id: 9,
                plant_id: 41,
                measured_at: 1_700_000_200_000,
                raw_average: 90.0,
                flux: 230.75,
            },
        ],
        diary_entries: vec![DiaryEntry {
            id: 3,
            plant_id: 41,
            created_at: 1_700_000_300_000,
            entry_type: "watering".to_string(),
            note: "Watered, \"well\" today\n".to_string(),
            photo_uri: None,
        }],
        ..DatasetSnapshot::default()
    }
}

fn read_entry(archive_path: &Path, name: &str) -> Vec<u8> {
    let file = fs::File::open(archive_path).expect("open archive");
    let mut archive = zip::ZipArchive::new(file).expect("read archive");
    let mut entry = archive.by_name(name).expect("entry present");
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).expect("read entry");
    bytes
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}

#[test]
fn export_packages_text_and_attachments_and_cleans_staging() {
    let root = unique_temp_root();
    let store = LocalAttachmentStore::new(root.join("photos"));
    fs::create_dir_all(store.photos_dir()).expect("create photos dir");
    fs::write(store.photos_dir().join("ficus leaf.jpg"), b"jpeg").expect("write photo");

    let staging_root = root.join("staging");
    let sink = root.join("out").join("backup.zip");
    let mut stages = Vec::new();
    let result = write_archive(
        &snapshot(Some("ficus leaf.jpg".to_string())),
        &sink,
        &ArchiveWriteOptions {
            staging_root: &staging_root,
            copy_buffer_bytes: 16,
        },
        &store,
        &mut |stage, _, _| stages.push(stage),
    )
    .expect("export");

    assert_eq!(result.archive_path, sink);
    assert_eq!(result.attachments, 1);
    assert!(result.warnings.is_empty());
    assert_eq!(result.counts.get(&EntityKind::Measurements), Some(&2));
    assert_eq!(
        stages,
        vec![
            BackupStage::Preparing,
            BackupStage::Serializing,
            BackupStage::Packaging,
            BackupStage::Completed,
        ]
    );

    let text = String::from_utf8(read_entry(&sink, "data")).expect("utf-8 text");
    assert!(text.starts_with("Version,2\n\nPlants\n"));
    assert!(text.contains("1,Ficus,,ficus_lyrata,\"Living room, north window\",1700000000000,plant_1_ficus_leaf.jpg"));
    assert!(text.contains("\"Watered, \"\"well\"\" today\n\""));
    assert!(!text.contains(",41,"), "store ids must not leak into the archive");
    assert_eq!(read_entry(&sink, "plant_1_ficus_leaf.jpg"), b"jpeg");

    assert!(is_empty_dir(&staging_root));
    assert!(!partial_path(&sink).exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn unreadable_attachment_is_exported_as_empty_reference() {
    let root = unique_temp_root();
    let store = LocalAttachmentStore::new(root.join("photos"));
    let sink = root.join("backup.zip");

    let result = write_archive(
        &snapshot(Some("gone.jpg".to_string())),
        &sink,
        &ArchiveWriteOptions {
            staging_root: &root.join("staging"),
            copy_buffer_bytes: 1024,
        },
        &store,
        &mut |_, _, _| {},
    )
    .expect("export succeeds without the photo");

    assert_eq!(result.attachments, 0);
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].kind, WarningKind::Attachment);
    assert_eq!(result.warnings[0].entity, Some(EntityKind::Plants));

    let text = String::from_utf8(read_entry(&sink, "data")).expect("utf-8 text");
    assert!(text.contains(",1700000000000,\n"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn failed_packaging_leaves_no_sink_and_no_staging() {
    let root = unique_temp_root();
    let store = LocalAttachmentStore::new(root.join("photos"));
    let staging_root = root.join("staging");

    // A directory squatting on the partial path makes File::create fail.
    let sink = root.join("backup.zip");
    fs::create_dir_all(partial_path(&sink)).expect("block partial path");

    let error = write_archive(
        &snapshot(None),
        &sink,
        &ArchiveWriteOptions {
            staging_root: &staging_root,
            copy_buffer_bytes: 1024,
        },
        &store,
        &mut |_, _, _| {},
    )
    .expect_err("export must fail");

    assert!(matches!(error, DomainError::ArchiveIo(_)));
    assert!(!sink.exists());
    assert!(is_empty_dir(&staging_root));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn identical_snapshots_produce_identical_archives() {
    let root = unique_temp_root();
    let store = LocalAttachmentStore::new(root.join("photos"));
    let options = ArchiveWriteOptions {
        staging_root: &root.join("staging"),
        copy_buffer_bytes: 1024,
    };

    let first = root.join("first.zip");
    let second = root.join("second.zip");
    write_archive(&snapshot(None), &first, &options, &store, &mut |_, _, _| {})
        .expect("first export");
    write_archive(&snapshot(None), &second, &options, &store, &mut |_, _, _| {})
        .expect("second export");

    assert_eq!(
        fs::read(&first).expect("read first"),
        fs::read(&second).expect("read second")
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn rows_for_plants_outside_the_snapshot_are_skipped_with_warning() {
    let root = unique_temp_root();
    let store = LocalAttachmentStore::new(root.join("photos"));
    let mut data = snapshot(None);
    data.measurements[1].plant_id = 999;

    let result = write_archive(
        &data,
        &root.join("backup.zip"),
        &ArchiveWriteOptions {
            staging_root: &root.join("staging"),
            copy_buffer_bytes: 1024,
        },
        &store,
        &mut |_, _, _| {},
    )
    .expect("export");

    assert_eq!(result.counts.get(&EntityKind::Measurements), Some(&1));
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].kind, WarningKind::Row);

    let _ = fs::remove_dir_all(&root);
}

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::random;
use zip::write::SimpleFileOptions;

use crate::domain::errors::DomainError;
use crate::domain::models::backup::{DatasetSnapshot, EntityKind, WarningKind};
use crate::domain::models::plant::{DiaryEntry, Plant};
use crate::infrastructure::persistence::attachment_store::LocalAttachmentStore;
use crate::infrastructure::persistence::backup_archive::format::ArchiveLimits;
use crate::infrastructure::persistence::backup_archive::writer::{
    ArchiveWriteOptions, write_archive,
};

use super::{ArchiveReadOptions, parse_document, read_archive};

const TRICKY_NOTE: &str = "Watered, \"well\" today\n";

fn unique_temp_root() -> PathBuf {
    std::env::temp_dir().join(format!("plantkeeper-archive-reader-{}", random::<u64>()))
}

fn build_zip(path: &Path, entries: &[(&str, &[u8])]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create zip parent");
    }
    let file = fs::File::create(path).expect("create zip");
    let mut writer = zip::ZipWriter::new(file);
    for (name, bytes) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start entry");
        writer.write_all(bytes).expect("write entry");
    }
    writer.finish().expect("finish zip");
}

fn read(path: &Path, staging_root: &Path) -> Result<super::ImportModel, DomainError> {
    read_archive(
        path,
        &ArchiveReadOptions {
            staging_root,
            limits: ArchiveLimits::default(),
            copy_buffer_bytes: 1024,
        },
        &mut |_, _, _| {},
    )
}

#[test]
fn escaped_values_survive_export_and_import() {
    let root = unique_temp_root();
    let store = LocalAttachmentStore::new(root.join("photos"));
    fs::create_dir_all(store.photos_dir()).expect("create photos dir");
    fs::write(store.photos_dir().join("soil.png"), b"png bytes").expect("write photo");

    let mut plant = Plant::new("Ficus \"Big\", the first", "ficus_lyrata", 5);
    plant.id = 12;
    let snapshot = DatasetSnapshot {
        plants: vec![plant],
        diary_entries: vec![DiaryEntry {
            id: 30,
            plant_id: 12,
            created_at: 6,
            entry_type: "watering".to_string(),
            note: TRICKY_NOTE.to_string(),
            photo_uri: Some("soil.png".to_string()),
        }],
        ..DatasetSnapshot::default()
    };

    let archive_path = root.join("backup.zip");
    write_archive(
        &snapshot,
        &archive_path,
        &ArchiveWriteOptions {
            staging_root: &root.join("staging"),
            copy_buffer_bytes: 1024,
        },
        &store,
        &mut |_, _, _| {},
    )
    .expect("export");

    let model = read(&archive_path, &root.join("staging")).expect("import model");
    assert!(model.warnings.is_empty());
    assert_eq!(model.rows.plants[0].name, "Ficus \"Big\", the first");
    assert_eq!(model.rows.plants[0].id, 1);

    let entry = &model.rows.diary_entries[0];
    assert_eq!(entry.note, TRICKY_NOTE);
    assert_eq!(entry.plant_id, 1);

    let photo_name = entry.photo_uri.clone().expect("photo entry name");
    let extracted = model
        .attachment_path(&photo_name)
        .expect("attachment extracted")
        .to_path_buf();
    assert_eq!(fs::read(&extracted).expect("read extracted"), b"png bytes");

    let staging_path = model.staging_path().expect("staging dir").to_path_buf();
    drop(model);
    assert!(!staging_path.exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn newer_major_version_is_rejected() {
    let error = parse_document("Version,3\n\nPlants\nid,name,species_key,acquired_at\n")
        .expect_err("unsupported major");
    assert!(matches!(error, DomainError::ArchiveFormat(_)));

    let error = parse_document("Plants\nid,name\n").expect_err("missing version");
    assert!(matches!(error, DomainError::ArchiveFormat(_)));
}

#[test]
fn version_one_archive_without_photo_columns_parses() {
    let text = "Version,1\n\n\
        Plants\n\
        id,name,species_key,acquired_at\n\
        1,Aloe,aloe_vera,100\n\n\
        Reminders\n\
        id,plant_id,trigger_at,message\n\
        1,1,200,Rotate pot\n";

    let document = parse_document(text).expect("v1 document");
    assert_eq!(document.version.major, 1);
    assert_eq!(document.rows.plants[0].name, "Aloe");
    assert_eq!(document.rows.plants[0].photo_uri, None);
    assert_eq!(document.rows.plants[0].description, "");
    assert_eq!(document.rows.reminders[0].message, "Rotate pot");
    assert!(document.rows.calibrations.is_empty());
}

#[test]
fn sections_are_order_tolerant() {
    let text = "Version,2\n\n\
        Measurements\n\
        id,plant_id,measured_at,raw_average,flux\n\
        1,1,10,1.5,2.5\n\n\
        Plants\n\
        id,name,description,species_key,location,acquired_at,photo\n\
        1,Ficus,,ficus_lyrata,,1,\n";

    let document = parse_document(text).expect("document");
    assert_eq!(document.rows.plants.len(), 1);
    assert_eq!(document.rows.measurements.len(), 1);
    assert_eq!(document.rows.measurements[0].flux, 2.5);
}

#[test]
fn unknown_section_is_skipped_only_in_newer_minor_archives() {
    let body = "\n\
        GrowthLogs\n\
        id,plant_id,height\n\
        1,1,30\n\n\
        Plants\n\
        id,name,description,species_key,location,acquired_at,photo\n\
        1,Ficus,,ficus_lyrata,,1,\n";

    let newer = parse_document(&format!("Version,2.1\n{}", body)).expect("newer minor");
    assert_eq!(newer.rows.plants.len(), 1);
    assert_eq!(newer.warnings.len(), 1);
    assert_eq!(newer.warnings[0].kind, WarningKind::Section);

    let error = parse_document(&format!("Version,2\n{}", body)).expect_err("same version");
    assert!(matches!(error, DomainError::ArchiveFormat(message) if message.contains("GrowthLogs")));
}

#[test]
fn malformed_rows_are_skipped_with_warnings() {
    let text = "Version,2\n\n\
        Measurements\n\
        id,plant_id,measured_at,raw_average,flux\n\
        1,1,10,1.5,2.5\n\
        2,1,20,1.5\n\
        3,1,thirty,1.5,2.5\n\
        4,1,40,1.5,2.5\n";

    let document = parse_document(text).expect("document");
    let ids = document
        .rows
        .measurements
        .iter()
        .map(|row| row.id)
        .collect::<Vec<_>>();
    assert_eq!(ids, vec![1, 4]);
    assert_eq!(document.warnings.len(), 2);
    assert!(document
        .warnings
        .iter()
        .all(|warning| warning.kind == WarningKind::Row
            && warning.entity == Some(EntityKind::Measurements)));
}

#[test]
fn single_word_lines_inside_a_section_read_as_section_headers() {
    let section = "Version,2\n\n\
        Reminders\n\
        id,plant_id,trigger_at,message\n\
        1,1,400,Water\n";

    // Not header shaped: an ordinary short row.
    let document = parse_document(&format!("{}repot\n", section)).expect("document");
    assert_eq!(document.rows.reminders.len(), 1);
    assert_eq!(document.warnings.len(), 1);
    assert_eq!(document.warnings[0].kind, WarningKind::Row);

    // Header shaped: indistinguishable from the start of an unknown section.
    let error = parse_document(&format!("{}Repot\n", section)).expect_err("unknown section");
    assert!(matches!(error, DomainError::ArchiveFormat(message) if message.contains("Repot")));

    let newer = parse_document(&format!("{}Repot\n", section.replace("Version,2", "Version,2.1")))
        .expect("newer minor");
    assert_eq!(newer.rows.reminders.len(), 1);
    assert_eq!(newer.warnings[0].kind, WarningKind::Section);
}

#[test]
fn missing_required_column_is_a_format_error() {
    let text = "Version,2\n\nPlants\nid,description,acquired_at\n1,x,1\n";
    assert!(matches!(
        parse_document(text),
        Err(DomainError::ArchiveFormat(_))
    ));
}

#[test]
fn traversal_entries_are_rejected() {
    let root = unique_temp_root();
    let archive_path = root.join("evil.zip");
    build_zip(
        &archive_path,
        &[
            ("data", b"Version,2\n".as_slice()),
            ("../escape.jpg", b"nope".as_slice()),
        ],
    );

    let error = read(&archive_path, &root.join("staging")).expect_err("unsafe entry");
    assert!(matches!(error, DomainError::ArchiveFormat(_)));
    assert!(!root.join("escape.jpg").exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn container_errors_are_classified() {
    let root = unique_temp_root();
    fs::create_dir_all(&root).expect("create root");

    let missing = read(&root.join("absent.zip"), &root.join("staging")).expect_err("missing");
    assert!(matches!(missing, DomainError::ArchiveIo(_)));

    let not_zip = root.join("notes.txt");
    fs::write(&not_zip, b"Version,2\n").expect("write text");
    let garbage = read(&not_zip, &root.join("staging")).expect_err("not a zip");
    assert!(matches!(garbage, DomainError::ArchiveFormat(_)));

    let no_data = root.join("no-data.zip");
    build_zip(&no_data, &[("plant_1_leaf.jpg", b"jpeg".as_slice())]);
    let error = read(&no_data, &root.join("staging")).expect_err("no data entry");
    assert!(matches!(error, DomainError::ArchiveFormat(_)));

    let bad_utf8 = root.join("bad-utf8.zip");
    build_zip(&bad_utf8, &[("data", [0xff, 0xfe, 0x00].as_slice())]);
    let error = read(&bad_utf8, &root.join("staging")).expect_err("invalid text");
    assert!(matches!(error, DomainError::ArchiveFormat(_)));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn archive_without_attachments_needs_no_staging() {
    let root = unique_temp_root();
    let archive_path = root.join("plain.zip");
    build_zip(
        &archive_path,
        &[(
            "data",
            b"Version,2\n\nPlants\nid,name,description,species_key,location,acquired_at,photo\n1,Ficus,,ficus_lyrata,,1,\n"
                .as_slice(),
        )],
    );

    let model = read(&archive_path, &root.join("staging")).expect("model");
    assert_eq!(model.rows.plants.len(), 1);
    assert!(model.staging_path().is_none());
    assert_eq!(model.attachment_count(), 0);

    let _ = fs::remove_dir_all(&root);
}

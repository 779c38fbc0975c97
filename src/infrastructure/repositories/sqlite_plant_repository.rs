use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::domain::errors::DomainError;
use crate::domain::models::backup::ExportScope;
use crate::domain::models::plant::{
    DiaryEntry, GrowthStage, LightRange, Measurement, Plant, PlantCalibration, PlantPhoto,
    Reminder, SpeciesTarget,
};
use crate::domain::repositories::plant_repository::{PlantRepository, UpsertCount};
use crate::infrastructure::persistence::sqlite_connection::{
    acquire_lock, configure_connection, storage_error,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS plants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    species_key TEXT NOT NULL DEFAULT '',
    location TEXT NOT NULL DEFAULT '',
    acquired_at INTEGER NOT NULL,
    photo_uri TEXT
);
CREATE INDEX IF NOT EXISTS idx_plants_name ON plants(name);

CREATE TABLE IF NOT EXISTS plant_photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    plant_id INTEGER NOT NULL REFERENCES plants(id) ON DELETE CASCADE,
    photo_uri TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS plant_calibrations (
    plant_id INTEGER PRIMARY KEY REFERENCES plants(id) ON DELETE CASCADE,
    ambient_factor REAL NOT NULL,
    camera_factor REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS species_targets (
    species_key TEXT PRIMARY KEY,
    seedling_flux_min REAL NOT NULL,
    seedling_flux_max REAL NOT NULL,
    seedling_dli_min REAL NOT NULL,
    seedling_dli_max REAL NOT NULL,
    vegetative_flux_min REAL NOT NULL,
    vegetative_flux_max REAL NOT NULL,
    vegetative_dli_min REAL NOT NULL,
    vegetative_dli_max REAL NOT NULL,
    flowering_flux_min REAL NOT NULL,
    flowering_flux_max REAL NOT NULL,
    flowering_dli_min REAL NOT NULL,
    flowering_dli_max REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS measurements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    plant_id INTEGER NOT NULL REFERENCES plants(id) ON DELETE CASCADE,
    measured_at INTEGER NOT NULL,
    raw_average REAL NOT NULL,
    flux REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_measurements_plant ON measurements(plant_id, measured_at);

CREATE TABLE IF NOT EXISTS diary_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    plant_id INTEGER NOT NULL REFERENCES plants(id) ON DELETE CASCADE,
    created_at INTEGER NOT NULL,
    entry_type TEXT NOT NULL,
    note TEXT NOT NULL,
    photo_uri TEXT
);
CREATE INDEX IF NOT EXISTS idx_diary_entries_plant ON diary_entries(plant_id, created_at);

CREATE TABLE IF NOT EXISTS reminders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    plant_id INTEGER NOT NULL REFERENCES plants(id) ON DELETE CASCADE,
    trigger_at INTEGER NOT NULL,
    message TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_reminders_plant ON reminders(plant_id, trigger_at);
";

const SPECIES_TARGET_COLUMNS: &str = "species_key,
    seedling_flux_min, seedling_flux_max, seedling_dli_min, seedling_dli_max,
    vegetative_flux_min, vegetative_flux_max, vegetative_dli_min, vegetative_dli_max,
    flowering_flux_min, flowering_flux_max, flowering_dli_min, flowering_dli_max";

/// SQLite-backed plant dataset.
///
/// `rusqlite::Connection` is not `Sync`, so it sits behind a mutex and every
/// call runs on the blocking pool. WAL and `busy_timeout` absorb contention
/// between concurrent jobs.
pub struct SqlitePlantRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePlantRepository {
    pub fn open(db_path: &Path) -> Result<Self, DomainError> {
        let conn = Connection::open(db_path)
            .map_err(|error| storage_error(&format!("open {}", db_path.display()), error))?;
        Self::initialize(conn)
    }

    /// In-memory database, mainly for tests
    pub fn in_memory() -> Result<Self, DomainError> {
        let conn = Connection::open_in_memory()
            .map_err(|error| storage_error("open in-memory database", error))?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self, DomainError> {
        configure_connection(&conn)?;
        conn.execute_batch(SCHEMA)
            .map_err(|error| storage_error("create dataset schema", error))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, operation: &'static str, task: F) -> Result<T, DomainError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = acquire_lock(&conn);
            task(&mut guard)
        })
        .await
        .map_err(|error| {
            DomainError::InternalError(format!("{} task failed: {}", operation, error))
        })?
        .map_err(|error| storage_error(operation, error))
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<(), DomainError> {
        acquire_lock(&self.conn)
            .execute_batch(sql)
            .map_err(|error| storage_error("execute batch", error))
    }
}

fn scope_plant_id(scope: ExportScope) -> Option<i64> {
    match scope {
        ExportScope::All => None,
        ExportScope::ForPlant(id) => Some(id),
    }
}

fn plant_from_row(row: &Row<'_>) -> rusqlite::Result<Plant> {
    Ok(Plant {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        species_key: row.get(3)?,
        location: row.get(4)?,
        acquired_at: row.get(5)?,
        photo_uri: row.get(6)?,
    })
}

fn light_range_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<LightRange> {
    Ok(LightRange {
        flux_min: row.get(offset)?,
        flux_max: row.get(offset + 1)?,
        dli_min: row.get(offset + 2)?,
        dli_max: row.get(offset + 3)?,
    })
}

fn species_target_from_row(row: &Row<'_>) -> rusqlite::Result<SpeciesTarget> {
    let mut target = SpeciesTarget::new(row.get::<_, String>(0)?);
    for (index, stage) in GrowthStage::ALL.iter().enumerate() {
        *target.range_mut(*stage) = light_range_from_row(row, 1 + index * 4)?;
    }
    Ok(target)
}

fn query_all<T, F>(
    conn: &Connection,
    sql: &str,
    plant_id: Option<i64>,
    map: F,
) -> rusqlite::Result<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut statement = conn.prepare(sql)?;
    let rows = statement.query_map(params![plant_id], map)?;
    rows.collect()
}

#[async_trait]
impl PlantRepository for SqlitePlantRepository {
    async fn get_plants(&self, scope: ExportScope) -> Result<Vec<Plant>, DomainError> {
        let plant_id = scope_plant_id(scope);
        self.run("read plants", move |conn| {
            query_all(
                conn,
                "SELECT id, name, description, species_key, location, acquired_at, photo_uri
                 FROM plants WHERE (?1 IS NULL OR id = ?1) ORDER BY name, id",
                plant_id,
                plant_from_row,
            )
        })
        .await
    }

    async fn get_plant_photos(&self, scope: ExportScope) -> Result<Vec<PlantPhoto>, DomainError> {
        let plant_id = scope_plant_id(scope);
        self.run("read plant photos", move |conn| {
            query_all(
                conn,
                "SELECT id, plant_id, photo_uri, created_at FROM plant_photos
                 WHERE (?1 IS NULL OR plant_id = ?1) ORDER BY plant_id, created_at, id",
                plant_id,
                |row| {
                    Ok(PlantPhoto {
                        id: row.get(0)?,
                        plant_id: row.get(1)?,
                        photo_uri: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
        })
        .await
    }

    async fn get_calibrations(
        &self,
        scope: ExportScope,
    ) -> Result<Vec<PlantCalibration>, DomainError> {
        let plant_id = scope_plant_id(scope);
        self.run("read calibrations", move |conn| {
            query_all(
                conn,
                "SELECT plant_id, ambient_factor, camera_factor FROM plant_calibrations
                 WHERE (?1 IS NULL OR plant_id = ?1) ORDER BY plant_id",
                plant_id,
                |row| {
                    Ok(PlantCalibration {
                        plant_id: row.get(0)?,
                        ambient_factor: row.get(1)?,
                        camera_factor: row.get(2)?,
                    })
                },
            )
        })
        .await
    }

    async fn get_measurements(
        &self,
        scope: ExportScope,
    ) -> Result<Vec<Measurement>, DomainError> {
        let plant_id = scope_plant_id(scope);
        self.run("read measurements", move |conn| {
            query_all(
                conn,
                "SELECT id, plant_id, measured_at, raw_average, flux FROM measurements
                 WHERE (?1 IS NULL OR plant_id = ?1) ORDER BY plant_id, measured_at, id",
                plant_id,
                |row| {
                    Ok(Measurement {
                        id: row.get(0)?,
                        plant_id: row.get(1)?,
                        measured_at: row.get(2)?,
                        raw_average: row.get(3)?,
                        flux: row.get(4)?,
                    })
                },
            )
        })
        .await
    }

    async fn get_diary_entries(
        &self,
        scope: ExportScope,
    ) -> Result<Vec<DiaryEntry>, DomainError> {
        let plant_id = scope_plant_id(scope);
        self.run("read diary entries", move |conn| {
            query_all(
                conn,
                "SELECT id, plant_id, created_at, entry_type, note, photo_uri FROM diary_entries
                 WHERE (?1 IS NULL OR plant_id = ?1) ORDER BY plant_id, created_at, id",
                plant_id,
                |row| {
                    Ok(DiaryEntry {
                        id: row.get(0)?,
                        plant_id: row.get(1)?,
                        created_at: row.get(2)?,
                        entry_type: row.get(3)?,
                        note: row.get(4)?,
                        photo_uri: row.get(5)?,
                    })
                },
            )
        })
        .await
    }

    async fn get_reminders(&self, scope: ExportScope) -> Result<Vec<Reminder>, DomainError> {
        let plant_id = scope_plant_id(scope);
        self.run("read reminders", move |conn| {
            query_all(
                conn,
                "SELECT id, plant_id, trigger_at, message FROM reminders
                 WHERE (?1 IS NULL OR plant_id = ?1) ORDER BY plant_id, trigger_at, id",
                plant_id,
                |row| {
                    Ok(Reminder {
                        id: row.get(0)?,
                        plant_id: row.get(1)?,
                        trigger_at: row.get(2)?,
                        message: row.get(3)?,
                    })
                },
            )
        })
        .await
    }

    async fn get_species_targets(
        &self,
        keys: Option<&[String]>,
    ) -> Result<Vec<SpeciesTarget>, DomainError> {
        let wanted: Option<HashSet<String>> = keys.map(|keys| keys.iter().cloned().collect());
        let targets = self
            .run("read species targets", |conn| {
                let sql = format!(
                    "SELECT {} FROM species_targets ORDER BY species_key",
                    SPECIES_TARGET_COLUMNS
                );
                let mut statement = conn.prepare(&sql)?;
                let rows = statement.query_map([], species_target_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;

        Ok(match wanted {
            Some(wanted) => targets
                .into_iter()
                .filter(|target| wanted.contains(&target.species_key))
                .collect(),
            None => targets,
        })
    }

    async fn plant_ids_by_name(&self) -> Result<HashMap<String, i64>, DomainError> {
        self.run("read plant names", |conn| {
            let mut statement = conn.prepare("SELECT name, MIN(id) FROM plants GROUP BY name")?;
            let rows = statement.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })
        .await
    }

    async fn clear_all(&self) -> Result<(), DomainError> {
        self.run("clear dataset", |conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(
                "DELETE FROM reminders;
                 DELETE FROM diary_entries;
                 DELETE FROM measurements;
                 DELETE FROM plant_calibrations;
                 DELETE FROM plant_photos;
                 DELETE FROM species_targets;
                 DELETE FROM plants;",
            )?;
            tx.commit()
        })
        .await
    }

    async fn insert_plants(&self, plants: Vec<Plant>) -> Result<Vec<i64>, DomainError> {
        self.run("insert plants", move |conn| {
            let tx = conn.transaction()?;
            let mut ids = Vec::with_capacity(plants.len());
            {
                let mut statement = tx.prepare(
                    "INSERT INTO plants (name, description, species_key, location, acquired_at, photo_uri)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for plant in &plants {
                    statement.execute(params![
                        plant.name,
                        plant.description,
                        plant.species_key,
                        plant.location,
                        plant.acquired_at,
                        plant.photo_uri,
                    ])?;
                    ids.push(tx.last_insert_rowid());
                }
            }
            tx.commit()?;
            Ok(ids)
        })
        .await
    }

    async fn insert_plant_photos(&self, photos: Vec<PlantPhoto>) -> Result<usize, DomainError> {
        self.run("insert plant photos", move |conn| {
            let tx = conn.transaction()?;
            {
                let mut statement = tx.prepare(
                    "INSERT INTO plant_photos (plant_id, photo_uri, created_at) VALUES (?1, ?2, ?3)",
                )?;
                for photo in &photos {
                    statement.execute(params![photo.plant_id, photo.photo_uri, photo.created_at])?;
                }
            }
            tx.commit()?;
            Ok(photos.len())
        })
        .await
    }

    async fn upsert_calibrations(
        &self,
        calibrations: Vec<PlantCalibration>,
    ) -> Result<UpsertCount, DomainError> {
        self.run("upsert calibrations", move |conn| {
            let tx = conn.transaction()?;
            let mut count = UpsertCount::default();
            {
                let mut exists = tx.prepare("SELECT 1 FROM plant_calibrations WHERE plant_id = ?1")?;
                let mut upsert = tx.prepare(
                    "INSERT INTO plant_calibrations (plant_id, ambient_factor, camera_factor)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(plant_id) DO UPDATE SET
                         ambient_factor = excluded.ambient_factor,
                         camera_factor = excluded.camera_factor",
                )?;
                for calibration in &calibrations {
                    let existed = exists
                        .query_row(params![calibration.plant_id], |_| Ok(()))
                        .optional()?
                        .is_some();
                    upsert.execute(params![
                        calibration.plant_id,
                        calibration.ambient_factor,
                        calibration.camera_factor,
                    ])?;
                    if existed {
                        count.updated += 1;
                    } else {
                        count.inserted += 1;
                    }
                }
            }
            tx.commit()?;
            Ok(count)
        })
        .await
    }

    async fn upsert_species_targets(
        &self,
        targets: Vec<SpeciesTarget>,
    ) -> Result<UpsertCount, DomainError> {
        self.run("upsert species targets", move |conn| {
            let tx = conn.transaction()?;
            let mut count = UpsertCount::default();
            {
                let mut exists = tx.prepare("SELECT 1 FROM species_targets WHERE species_key = ?1")?;
                let mut upsert = tx.prepare(&format!(
                    "INSERT OR REPLACE INTO species_targets ({}) VALUES
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    SPECIES_TARGET_COLUMNS
                ))?;
                for target in &targets {
                    let existed = exists
                        .query_row(params![target.species_key], |_| Ok(()))
                        .optional()?
                        .is_some();
                    let s = &target.seedling;
                    let v = &target.vegetative;
                    let f = &target.flowering;
                    upsert.execute(params![
                        target.species_key,
                        s.flux_min,
                        s.flux_max,
                        s.dli_min,
                        s.dli_max,
                        v.flux_min,
                        v.flux_max,
                        v.dli_min,
                        v.dli_max,
                        f.flux_min,
                        f.flux_max,
                        f.dli_min,
                        f.dli_max,
                    ])?;
                    if existed {
                        count.updated += 1;
                    } else {
                        count.inserted += 1;
                    }
                }
            }
            tx.commit()?;
            Ok(count)
        })
        .await
    }

    async fn insert_measurements(
        &self,
        measurements: Vec<Measurement>,
    ) -> Result<usize, DomainError> {
        self.run("insert measurements", move |conn| {
            let tx = conn.transaction()?;
            {
                let mut statement = tx.prepare(
                    "INSERT INTO measurements (plant_id, measured_at, raw_average, flux)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for measurement in &measurements {
                    statement.execute(params![
                        measurement.plant_id,
                        measurement.measured_at,
                        measurement.raw_average,
                        measurement.flux,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(measurements.len())
        })
        .await
    }

    async fn insert_diary_entries(&self, entries: Vec<DiaryEntry>) -> Result<usize, DomainError> {
        self.run("insert diary entries", move |conn| {
            let tx = conn.transaction()?;
            {
                let mut statement = tx.prepare(
                    "INSERT INTO diary_entries (plant_id, created_at, entry_type, note, photo_uri)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for entry in &entries {
                    statement.execute(params![
                        entry.plant_id,
                        entry.created_at,
                        entry.entry_type,
                        entry.note,
                        entry.photo_uri,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(entries.len())
        })
        .await
    }

    async fn insert_reminders(&self, reminders: Vec<Reminder>) -> Result<usize, DomainError> {
        self.run("insert reminders", move |conn| {
            let tx = conn.transaction()?;
            {
                let mut statement = tx.prepare(
                    "INSERT INTO reminders (plant_id, trigger_at, message) VALUES (?1, ?2, ?3)",
                )?;
                for reminder in &reminders {
                    statement.execute(params![
                        reminder.plant_id,
                        reminder.trigger_at,
                        reminder.message,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(reminders.len())
        })
        .await
    }
}

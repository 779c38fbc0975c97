use crate::domain::errors::DomainError;
use crate::domain::models::backup::ExportScope;
use crate::domain::models::plant::{
    DiaryEntry, Measurement, Plant, PlantCalibration, PlantPhoto, Reminder, SpeciesTarget,
};
use async_trait::async_trait;
use std::collections::HashMap;

/// Rows written versus rows that replaced an existing key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCount {
    pub inserted: usize,
    pub updated: usize,
}

/// Repository interface for the plant dataset.
///
/// Read methods return fully materialized rows. Every write method is one
/// atomic group: either all rows are committed or none are.
#[async_trait]
pub trait PlantRepository: Send + Sync {
    /// Get plants in scope, ordered by name
    async fn get_plants(&self, scope: ExportScope) -> Result<Vec<Plant>, DomainError>;

    async fn get_plant_photos(&self, scope: ExportScope) -> Result<Vec<PlantPhoto>, DomainError>;

    async fn get_calibrations(
        &self,
        scope: ExportScope,
    ) -> Result<Vec<PlantCalibration>, DomainError>;

    async fn get_measurements(&self, scope: ExportScope)
    -> Result<Vec<Measurement>, DomainError>;

    async fn get_diary_entries(&self, scope: ExportScope)
    -> Result<Vec<DiaryEntry>, DomainError>;

    async fn get_reminders(&self, scope: ExportScope) -> Result<Vec<Reminder>, DomainError>;

    /// Get species targets, optionally restricted to the given keys, ordered by key
    async fn get_species_targets(
        &self,
        keys: Option<&[String]>,
    ) -> Result<Vec<SpeciesTarget>, DomainError>;

    /// Map of plant name to local identifier. The lowest id wins for duplicate names.
    async fn plant_ids_by_name(&self) -> Result<HashMap<String, i64>, DomainError>;

    /// Delete every row of every dataset table
    async fn clear_all(&self) -> Result<(), DomainError>;

    /// Insert plants and return their newly assigned identifiers, in input order
    async fn insert_plants(&self, plants: Vec<Plant>) -> Result<Vec<i64>, DomainError>;

    async fn insert_plant_photos(&self, photos: Vec<PlantPhoto>) -> Result<usize, DomainError>;

    /// Insert or replace the calibration of each plant
    async fn upsert_calibrations(
        &self,
        calibrations: Vec<PlantCalibration>,
    ) -> Result<UpsertCount, DomainError>;

    /// Insert or replace targets by species key, last write wins
    async fn upsert_species_targets(
        &self,
        targets: Vec<SpeciesTarget>,
    ) -> Result<UpsertCount, DomainError>;

    async fn insert_measurements(
        &self,
        measurements: Vec<Measurement>,
    ) -> Result<usize, DomainError>;

    async fn insert_diary_entries(&self, entries: Vec<DiaryEntry>) -> Result<usize, DomainError>;

    async fn insert_reminders(&self, reminders: Vec<Reminder>) -> Result<usize, DomainError>;
}

use std::sync::Arc;

use crate::domain::errors::DomainError;
use crate::domain::models::backup::{DatasetSnapshot, ExportScope};
use crate::domain::repositories::plant_repository::PlantRepository;

/// Produces detached snapshots of the dataset for export.
pub struct DatasetReader {
    repository: Arc<dyn PlantRepository>,
}

impl DatasetReader {
    pub fn new(repository: Arc<dyn PlantRepository>) -> Self {
        Self { repository }
    }

    /// Read everything in `scope`.
    ///
    /// `ForPlant` carries the plant, its dependents and the species target
    /// of its species key; an unknown plant is `NotFound`.
    pub async fn read(&self, scope: ExportScope) -> Result<DatasetSnapshot, DomainError> {
        tracing::debug!("Reading dataset snapshot for {:?}", scope);

        let plants = self.repository.get_plants(scope).await?;
        if let ExportScope::ForPlant(plant_id) = scope {
            if plants.is_empty() {
                return Err(DomainError::NotFound(format!(
                    "Plant not found: {}",
                    plant_id
                )));
            }
        }

        let species_targets = match scope {
            ExportScope::All => self.repository.get_species_targets(None).await?,
            ExportScope::ForPlant(_) => {
                let keys = plants
                    .iter()
                    .map(|plant| plant.species_key.clone())
                    .filter(|key| !key.is_empty())
                    .collect::<Vec<_>>();
                if keys.is_empty() {
                    Vec::new()
                } else {
                    self.repository.get_species_targets(Some(&keys)).await?
                }
            }
        };

        let snapshot = DatasetSnapshot {
            plants,
            photos: self.repository.get_plant_photos(scope).await?,
            calibrations: self.repository.get_calibrations(scope).await?,
            species_targets,
            measurements: self.repository.get_measurements(scope).await?,
            diary_entries: self.repository.get_diary_entries(scope).await?,
            reminders: self.repository.get_reminders(scope).await?,
        };

        tracing::debug!(
            "Snapshot holds {} plants, {} measurements, {} diary entries",
            snapshot.plants.len(),
            snapshot.measurements.len(),
            snapshot.diary_entries.len()
        );
        Ok(snapshot)
    }
}

use serde::{Deserialize, Serialize};

/// A plant in the user's inventory. The name is the business key used to
/// match plants across independently numbered stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plant {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub species_key: String,
    pub location: String,
    /// Epoch milliseconds
    pub acquired_at: i64,
    pub photo_uri: Option<String>,
}

impl Plant {
    pub fn new(name: impl Into<String>, species_key: impl Into<String>, acquired_at: i64) -> Self {
        Self {
            id: 0,
            name: name.into(),
            description: String::new(),
            species_key: species_key.into(),
            location: String::new(),
            acquired_at,
            photo_uri: None,
        }
    }
}

/// A light reading taken for a plant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub id: i64,
    pub plant_id: i64,
    pub measured_at: i64,
    pub raw_average: f64,
    pub flux: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiaryEntry {
    pub id: i64,
    pub plant_id: i64,
    pub created_at: i64,
    /// Free-form type tag ("watering", "repotting", ...)
    pub entry_type: String,
    pub note: String,
    pub photo_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: i64,
    pub plant_id: i64,
    pub trigger_at: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantPhoto {
    pub id: i64,
    pub plant_id: i64,
    pub photo_uri: String,
    pub created_at: i64,
}

/// Per-plant sensor calibration. At most one per plant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantCalibration {
    pub plant_id: i64,
    pub ambient_factor: f64,
    pub camera_factor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthStage {
    Seedling,
    Vegetative,
    Flowering,
}

impl GrowthStage {
    pub const ALL: [GrowthStage; 3] = [
        GrowthStage::Seedling,
        GrowthStage::Vegetative,
        GrowthStage::Flowering,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GrowthStage::Seedling => "seedling",
            GrowthStage::Vegetative => "vegetative",
            GrowthStage::Flowering => "flowering",
        }
    }
}

/// Photon flux and daily light integral bounds for one growth stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LightRange {
    pub flux_min: f64,
    pub flux_max: f64,
    pub dli_min: f64,
    pub dli_max: f64,
}

/// Light targets for a species, keyed globally by `species_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesTarget {
    pub species_key: String,
    pub seedling: LightRange,
    pub vegetative: LightRange,
    pub flowering: LightRange,
}

impl SpeciesTarget {
    pub fn new(species_key: impl Into<String>) -> Self {
        Self {
            species_key: species_key.into(),
            seedling: LightRange::default(),
            vegetative: LightRange::default(),
            flowering: LightRange::default(),
        }
    }

    pub fn range(&self, stage: GrowthStage) -> &LightRange {
        match stage {
            GrowthStage::Seedling => &self.seedling,
            GrowthStage::Vegetative => &self.vegetative,
            GrowthStage::Flowering => &self.flowering,
        }
    }

    pub fn range_mut(&mut self, stage: GrowthStage) -> &mut LightRange {
        match stage {
            GrowthStage::Seedling => &mut self.seedling,
            GrowthStage::Vegetative => &mut self.vegetative,
            GrowthStage::Flowering => &mut self.flowering,
        }
    }
}

use std::path::Path;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::application::services::backup_service::{ExportCoordinator, ImportCoordinator};
use crate::domain::errors::DomainError;
use crate::domain::repositories::plant_repository::PlantRepository;
use crate::infrastructure::paths::{AppPaths, resolve_data_root};
use crate::infrastructure::persistence::backup_jobs::BackupJobRegistry;
use crate::infrastructure::persistence::settings::BackupSettings;

mod bootstrap;

pub struct AppState {
    pub paths: AppPaths,
    pub settings: BackupSettings,
    pub plant_repository: Arc<dyn PlantRepository>,
    pub export_coordinator: Arc<ExportCoordinator>,
    pub import_coordinator: Arc<ImportCoordinator>,
    pub job_registry: Arc<BackupJobRegistry>,
}

impl AppState {
    /// Build the application under `data_root`.
    ///
    /// Must be called from within a tokio runtime; background jobs are
    /// spawned on it.
    pub async fn new(data_root: &Path) -> Result<Self, DomainError> {
        let paths = bootstrap::initialize_paths(data_root).await?;
        let settings = bootstrap::load_settings(&paths).await?;

        tracing::info!("Initializing application with data root: {:?}", data_root);
        let services = bootstrap::build_services(Handle::current(), &paths, &settings)?;
        tracing::info!("Application initialized successfully");

        Ok(Self {
            paths,
            settings,
            plant_repository: services.plant_repository,
            export_coordinator: services.export_coordinator,
            import_coordinator: services.import_coordinator,
            job_registry: services.job_registry,
        })
    }

    /// Build the application under the resolved platform data root.
    pub async fn initialize() -> Result<Self, DomainError> {
        let data_root = resolve_data_root()?;
        Self::new(&data_root).await
    }
}

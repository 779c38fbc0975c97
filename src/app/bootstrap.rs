use std::path::Path;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::application::services::archive_merger::ArchiveMerger;
use crate::application::services::backup_service::{
    BackupRuntime, ExportCoordinator, ImportCoordinator, PipelineOptions,
};
use crate::application::services::dataset_reader::DatasetReader;
use crate::domain::errors::DomainError;
use crate::domain::repositories::attachment_repository::{AttachmentResolver, AttachmentStorage};
use crate::domain::repositories::plant_repository::PlantRepository;
use crate::infrastructure::logging::logger;
use crate::infrastructure::paths::AppPaths;
use crate::infrastructure::persistence::attachment_store::LocalAttachmentStore;
use crate::infrastructure::persistence::backup_jobs::BackupJobRegistry;
use crate::infrastructure::persistence::settings::{BackupSettings, load_backup_settings};
use crate::infrastructure::repositories::sqlite_plant_repository::SqlitePlantRepository;

pub(super) struct AppServices {
    pub plant_repository: Arc<dyn PlantRepository>,
    pub export_coordinator: Arc<ExportCoordinator>,
    pub import_coordinator: Arc<ImportCoordinator>,
    pub job_registry: Arc<BackupJobRegistry>,
}

struct AppRepositories {
    plant_repository: Arc<dyn PlantRepository>,
    attachment_resolver: Arc<dyn AttachmentResolver>,
    attachment_storage: Arc<dyn AttachmentStorage>,
}

pub(super) async fn initialize_paths(data_root: &Path) -> Result<AppPaths, DomainError> {
    let paths = AppPaths::new(data_root);
    paths.ensure_directories()?;
    Ok(paths)
}

pub(super) async fn load_settings(paths: &AppPaths) -> Result<BackupSettings, DomainError> {
    let settings = load_backup_settings(&paths.settings_file).await?;

    if let Err(error) = logger::init_logger(&paths.logs_dir, &settings.log_filter) {
        eprintln!("Failed to initialize logger: {}", error);
    }

    Ok(settings)
}

pub(super) fn build_services(
    handle: Handle,
    paths: &AppPaths,
    settings: &BackupSettings,
) -> Result<AppServices, DomainError> {
    let repositories = build_repositories(paths)?;

    let job_registry = Arc::new(BackupJobRegistry::new());
    let runtime = BackupRuntime::new(handle, settings.max_concurrent_jobs, job_registry.clone());
    let options = PipelineOptions::new(paths.staging_dir.clone(), settings);

    let dataset_reader = Arc::new(DatasetReader::new(repositories.plant_repository.clone()));
    let archive_merger = Arc::new(ArchiveMerger::new(
        repositories.plant_repository.clone(),
        repositories.attachment_storage.clone(),
        settings.copy_buffer_bytes,
    ));

    let export_coordinator = Arc::new(ExportCoordinator::new(
        runtime.clone(),
        dataset_reader,
        repositories.attachment_resolver.clone(),
        options.clone(),
    ));
    let import_coordinator = Arc::new(ImportCoordinator::new(runtime, archive_merger, options));

    Ok(AppServices {
        plant_repository: repositories.plant_repository,
        export_coordinator,
        import_coordinator,
        job_registry,
    })
}

fn build_repositories(paths: &AppPaths) -> Result<AppRepositories, DomainError> {
    let plant_repository: Arc<dyn PlantRepository> =
        Arc::new(SqlitePlantRepository::open(&paths.database)?);
    let attachment_store = Arc::new(LocalAttachmentStore::new(paths.photos_dir.clone()));

    Ok(AppRepositories {
        plant_repository,
        attachment_resolver: attachment_store.clone(),
        attachment_storage: attachment_store,
    })
}

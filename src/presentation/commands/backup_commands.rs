use crate::app::AppState;
use crate::application::services::backup_service::{ExportRequest, ImportRequest};
use crate::domain::models::backup::{ExportScope, MergeMode};
use crate::infrastructure::persistence::backup_jobs::BackupJobStatus;
use crate::presentation::commands::helpers::{log_command, map_domain_error, require_path};
use crate::presentation::errors::CommandError;

/// Start an export and return its job id. `plant_id` narrows the export to
/// one plant.
pub fn start_export_backup(
    state: &AppState,
    sink_path: String,
    plant_id: Option<i64>,
) -> Result<String, CommandError> {
    log_command(format!("start_export_backup {} plant={:?}", sink_path, plant_id));

    let sink = require_path("sink_path", &sink_path)?;
    let scope = plant_id.map_or(ExportScope::All, ExportScope::ForPlant);
    let job = state
        .export_coordinator
        .export(ExportRequest { sink, scope })
        .map_err(map_domain_error("Failed to start backup export"))?;

    Ok(job.job_id)
}

pub fn start_import_backup(
    state: &AppState,
    source_path: String,
    mode: MergeMode,
) -> Result<String, CommandError> {
    log_command(format!("start_import_backup {} mode={:?}", source_path, mode));

    let source = require_path("source_path", &source_path)?;
    if !source.is_file() {
        return Err(CommandError::NotFound(format!(
            "Backup archive not found: {}",
            source.display()
        )));
    }

    let job = state
        .import_coordinator
        .import_data(ImportRequest { source, mode })
        .map_err(map_domain_error("Failed to start backup import"))?;

    Ok(job.job_id)
}

pub fn get_backup_job_status(
    state: &AppState,
    job_id: String,
) -> Result<BackupJobStatus, CommandError> {
    log_command(format!("get_backup_job_status {}", job_id));

    state
        .job_registry
        .status(&job_id)
        .map_err(map_domain_error("Failed to get backup job status"))
}

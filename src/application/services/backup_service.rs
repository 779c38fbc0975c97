use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, mpsc, oneshot};

use crate::application::services::archive_merger::ArchiveMerger;
use crate::application::services::dataset_reader::DatasetReader;
use crate::domain::errors::DomainError;
use crate::domain::models::backup::{
    BackupFailure, BackupOutcome, BackupProgress, BackupStage, ExportScope, FailureKind,
    MergeMode,
};
use crate::domain::repositories::attachment_repository::AttachmentResolver;
use crate::infrastructure::logging::logger;
use crate::infrastructure::persistence::backup_archive::format::ArchiveLimits;
use crate::infrastructure::persistence::backup_archive::{
    ArchiveReadOptions, ArchiveWriteOptions, read_archive, write_archive,
};
use crate::infrastructure::persistence::backup_jobs::{
    BackupJobRegistry, KIND_EXPORT, KIND_IMPORT,
};
use crate::infrastructure::persistence::settings::BackupSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    pub sink: PathBuf,
    #[serde(default)]
    pub scope: ExportScope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    pub source: PathBuf,
    #[serde(default)]
    pub mode: MergeMode,
}

/// Handle to a running export or import.
///
/// Dropping the handle (or only its progress receiver) never affects the
/// job; the outcome is still recorded in the job registry.
pub struct BackupJob {
    pub job_id: String,
    pub progress: mpsc::UnboundedReceiver<BackupProgress>,
    outcome: oneshot::Receiver<BackupOutcome>,
}

impl BackupJob {
    /// Wait for the terminal outcome
    pub async fn wait(self) -> BackupOutcome {
        match self.outcome.await {
            Ok(outcome) => outcome,
            Err(_) => BackupOutcome::failed(
                "Backup job",
                BackupFailure {
                    kind: FailureKind::Internal,
                    message: "Job ended without reporting an outcome".to_string(),
                },
                Vec::new(),
            ),
        }
    }
}

/// Execution resources shared by both coordinators.
#[derive(Clone)]
pub struct BackupRuntime {
    handle: Handle,
    permits: Arc<Semaphore>,
    registry: Arc<BackupJobRegistry>,
}

impl BackupRuntime {
    pub fn new(handle: Handle, max_concurrent_jobs: usize, registry: Arc<BackupJobRegistry>) -> Self {
        Self {
            handle,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            registry,
        }
    }

    /// Register a job and run `work` under a pool permit.
    ///
    /// A supervisor task delivers exactly one outcome, including when the
    /// work panics.
    fn spawn_job<F, Fut>(&self, kind: &'static str, work: F) -> Result<BackupJob, DomainError>
    where
        F: FnOnce(ProgressSink) -> Fut + Send + 'static,
        Fut: Future<Output = BackupOutcome> + Send + 'static,
    {
        let job_id = self.registry.register(kind)?;
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let sink = ProgressSink {
            job_id: job_id.clone(),
            registry: Arc::clone(&self.registry),
            sender: progress_tx,
        };
        let permits = Arc::clone(&self.permits);
        let operation = operation_name(kind);
        let worker = self.handle.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return BackupOutcome::failed(
                        operation,
                        BackupFailure {
                            kind: FailureKind::Internal,
                            message: "Backup worker pool is closed".to_string(),
                        },
                        Vec::new(),
                    );
                }
            };
            work(sink).await
        });

        let registry = Arc::clone(&self.registry);
        let supervised_id = job_id.clone();
        self.handle.spawn(async move {
            let outcome = match worker.await {
                Ok(outcome) => outcome,
                Err(error) => {
                    logger::error(&format!("{} job {} aborted: {}", operation, supervised_id, error));
                    BackupOutcome::failed(
                        operation,
                        BackupFailure {
                            kind: FailureKind::Internal,
                            message: format!("{} task aborted: {}", operation, error),
                        },
                        Vec::new(),
                    )
                }
            };

            if let Err(error) = registry.finish(&supervised_id, &outcome) {
                logger::warn(&format!("Failed to record outcome of job {}: {}", supervised_id, error));
            }
            // The caller may have detached.
            let _ = outcome_tx.send(outcome);
        });

        Ok(BackupJob {
            job_id,
            progress: progress_rx,
            outcome: outcome_rx,
        })
    }
}

fn operation_name(kind: &str) -> &'static str {
    if kind == KIND_IMPORT { "Import" } else { "Export" }
}

/// Fans progress out to the job registry and the caller's receiver.
#[derive(Clone)]
struct ProgressSink {
    job_id: String,
    registry: Arc<BackupJobRegistry>,
    sender: mpsc::UnboundedSender<BackupProgress>,
}

impl ProgressSink {
    fn report(&self, stage: BackupStage, percent: f32, message: &str) {
        let progress = BackupProgress::new(stage, percent, message);
        if let Err(error) = self.registry.update_progress(&self.job_id, &progress) {
            tracing::debug!("Dropping progress for job {}: {}", self.job_id, error);
        }
        // A closed receiver only means nobody is listening.
        let _ = self.sender.send(progress);
    }
}

/// Staging and copy parameters for archive work.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub staging_root: PathBuf,
    pub copy_buffer_bytes: usize,
    pub limits: ArchiveLimits,
}

impl PipelineOptions {
    pub fn new(staging_root: PathBuf, settings: &BackupSettings) -> Self {
        Self {
            staging_root,
            copy_buffer_bytes: settings.copy_buffer_bytes,
            limits: ArchiveLimits::from(settings),
        }
    }
}

fn join_failure(context: &str, error: tokio::task::JoinError) -> DomainError {
    DomainError::InternalError(format!("{} task failed: {}", context, error))
}

/// Runs exports on the shared backup runtime.
pub struct ExportCoordinator {
    runtime: BackupRuntime,
    reader: Arc<DatasetReader>,
    resolver: Arc<dyn AttachmentResolver>,
    options: PipelineOptions,
}

impl ExportCoordinator {
    pub fn new(
        runtime: BackupRuntime,
        reader: Arc<DatasetReader>,
        resolver: Arc<dyn AttachmentResolver>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            runtime,
            reader,
            resolver,
            options,
        }
    }

    /// Start an export of `request.scope` into `request.sink`.
    pub fn export(&self, request: ExportRequest) -> Result<BackupJob, DomainError> {
        logger::info(&format!(
            "Starting export of {:?} to {}",
            request.scope,
            request.sink.display()
        ));

        let reader = Arc::clone(&self.reader);
        let resolver = Arc::clone(&self.resolver);
        let options = self.options.clone();

        self.runtime.spawn_job(KIND_EXPORT, move |progress| async move {
            match run_export(request, reader, resolver, options, progress).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    logger::error(&format!("Export failed: {}", error));
                    BackupOutcome::failed("Export", BackupFailure::from(&error), Vec::new())
                }
            }
        })
    }
}

async fn run_export(
    request: ExportRequest,
    reader: Arc<DatasetReader>,
    resolver: Arc<dyn AttachmentResolver>,
    options: PipelineOptions,
    progress: ProgressSink,
) -> Result<BackupOutcome, DomainError> {
    progress.report(BackupStage::Preparing, 0.0, "Reading dataset");
    let snapshot = reader.read(request.scope).await?;

    let result = tokio::task::spawn_blocking(move || {
        write_archive(
            &snapshot,
            &request.sink,
            &ArchiveWriteOptions {
                staging_root: &options.staging_root,
                copy_buffer_bytes: options.copy_buffer_bytes,
            },
            resolver.as_ref(),
            &mut |stage, percent, message| progress.report(stage, percent, message),
        )
    })
    .await
    .map_err(|error| join_failure("Export", error))??;

    logger::info(&result.summary());
    Ok(BackupOutcome::exported(&result))
}

/// Runs imports on the shared backup runtime.
pub struct ImportCoordinator {
    runtime: BackupRuntime,
    merger: Arc<ArchiveMerger>,
    options: PipelineOptions,
}

impl ImportCoordinator {
    pub fn new(runtime: BackupRuntime, merger: Arc<ArchiveMerger>, options: PipelineOptions) -> Self {
        Self {
            runtime,
            merger,
            options,
        }
    }

    /// Start importing `request.source` with `request.mode`.
    pub fn import_data(&self, request: ImportRequest) -> Result<BackupJob, DomainError> {
        logger::info(&format!(
            "Starting {:?} import from {}",
            request.mode,
            request.source.display()
        ));

        let merger = Arc::clone(&self.merger);
        let options = self.options.clone();

        self.runtime.spawn_job(KIND_IMPORT, move |progress| async move {
            run_import(request, merger, options, progress).await
        })
    }
}

async fn run_import(
    request: ImportRequest,
    merger: Arc<ArchiveMerger>,
    options: PipelineOptions,
    progress: ProgressSink,
) -> BackupOutcome {
    let reader_progress = progress.clone();
    let source = request.source.clone();
    let parsed = tokio::task::spawn_blocking(move || {
        read_archive(
            &source,
            &ArchiveReadOptions {
                staging_root: &options.staging_root,
                limits: options.limits,
                copy_buffer_bytes: options.copy_buffer_bytes,
            },
            &mut |stage, percent, message| reader_progress.report(stage, percent, message),
        )
    })
    .await
    .map_err(|error| join_failure("Import", error))
    .and_then(|result| result);

    let model = match parsed {
        Ok(model) => model,
        Err(error) => {
            logger::error(&format!(
                "Import of {} rejected: {}",
                request.source.display(),
                error
            ));
            return BackupOutcome::failed("Import", BackupFailure::from(&error), Vec::new());
        }
    };

    let merged = merger
        .merge(&model, request.mode, &mut |stage, percent, message| {
            progress.report(stage, percent, message)
        })
        .await;
    let warnings = model.warnings.clone();
    // Removes the extracted attachments.
    drop(model);

    match merged {
        Ok(result) => {
            let outcome = BackupOutcome::imported(result);
            if outcome.warnings.is_empty() {
                logger::info(&outcome.summary);
            } else {
                logger::warn(&outcome.summary);
            }
            progress.report(BackupStage::Completed, 100.0, "Import completed");
            outcome
        }
        Err(error) => {
            logger::error(&format!("Import failed: {}", error));
            BackupOutcome::failed("Import", BackupFailure::from(&error), warnings)
        }
    }
}

#[cfg(test)]
mod tests;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::models::backup::{BackupOutcome, BackupProgress, BackupStage};

const STATE_PENDING: &str = "pending";
const STATE_RUNNING: &str = "running";
const STATE_COMPLETED: &str = "completed";
const STATE_FAILED: &str = "failed";

pub const KIND_IMPORT: &str = "import";
pub const KIND_EXPORT: &str = "export";

const FINISHED_JOB_RETENTION_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize)]
pub struct BackupJobStatus {
    pub job_id: String,
    pub kind: String,
    pub state: String,
    pub stage: String,
    pub progress_percent: f32,
    pub message: String,
    pub summary: Option<String>,
    pub warning_count: usize,
    pub error: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

struct BackupJobEntry {
    status: Mutex<BackupJobStatus>,
    finished: Mutex<Option<DateTime<Utc>>>,
}

impl BackupJobEntry {
    fn new(job_id: &str, kind: &str) -> Self {
        Self {
            status: Mutex::new(BackupJobStatus {
                job_id: job_id.to_string(),
                kind: kind.to_string(),
                state: STATE_PENDING.to_string(),
                stage: BackupStage::Queued.as_str().to_string(),
                progress_percent: 0.0,
                message: "Job queued".to_string(),
                summary: None,
                warning_count: 0,
                error: None,
                started_at: Utc::now().to_rfc3339(),
                finished_at: None,
            }),
            finished: Mutex::new(None),
        }
    }

    fn snapshot(&self) -> Result<BackupJobStatus, DomainError> {
        let status = self
            .status
            .lock()
            .map_err(|_| DomainError::InternalError("Failed to lock job status".to_string()))?;
        Ok(status.clone())
    }

    fn update_status(&self, update: impl FnOnce(&mut BackupJobStatus)) -> Result<(), DomainError> {
        let mut status = self
            .status
            .lock()
            .map_err(|_| DomainError::InternalError("Failed to lock job status".to_string()))?;
        update(&mut status);
        Ok(())
    }

    fn mark_finished(&self) {
        if let Ok(mut finished) = self.finished.lock() {
            *finished = Some(Utc::now());
        }
    }

    fn finished_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.finished
            .lock()
            .map(|finished| finished.is_some_and(|at| at < cutoff))
            .unwrap_or(false)
    }
}

/// In-memory status of every backup job started by this process.
#[derive(Default)]
pub struct BackupJobRegistry {
    jobs: Mutex<HashMap<String, Arc<BackupJobEntry>>>,
}

impl BackupJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending job and return its id
    pub fn register(&self, kind: &str) -> Result<String, DomainError> {
        let job_id = Uuid::new_v4().to_string();
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| DomainError::InternalError("Failed to lock job registry".to_string()))?;

        let cutoff = Utc::now() - Duration::hours(FINISHED_JOB_RETENTION_HOURS);
        jobs.retain(|_, job| !job.finished_before(cutoff));

        jobs.insert(job_id.clone(), Arc::new(BackupJobEntry::new(&job_id, kind)));
        Ok(job_id)
    }

    pub fn status(&self, job_id: &str) -> Result<BackupJobStatus, DomainError> {
        self.get(job_id)?.snapshot()
    }

    pub fn update_progress(
        &self,
        job_id: &str,
        progress: &BackupProgress,
    ) -> Result<(), DomainError> {
        self.get(job_id)?.update_status(|status| {
            if status.state == STATE_PENDING {
                status.state = STATE_RUNNING.to_string();
            }
            if status.state != STATE_RUNNING {
                return;
            }
            status.stage = progress.stage.as_str().to_string();
            status.progress_percent = progress.percent.clamp(0.0, 100.0);
            status.message = progress.message.clone();
        })
    }

    /// Record the terminal outcome; failed outcomes mark the job failed.
    pub fn finish(&self, job_id: &str, outcome: &BackupOutcome) -> Result<(), DomainError> {
        let job = self.get(job_id)?;
        job.update_status(|status| {
            status.summary = Some(outcome.summary.clone());
            status.warning_count = outcome.warnings.len();
            status.finished_at = Some(Utc::now().to_rfc3339());

            match &outcome.error {
                None => {
                    status.state = STATE_COMPLETED.to_string();
                    status.stage = BackupStage::Completed.as_str().to_string();
                    status.progress_percent = 100.0;
                    status.message = "Job completed".to_string();
                    status.error = None;
                }
                Some(failure) => {
                    status.state = STATE_FAILED.to_string();
                    status.stage = "failed".to_string();
                    status.message = "Job failed".to_string();
                    status.error = Some(failure.message.clone());
                }
            }
        })?;
        job.mark_finished();
        Ok(())
    }

    fn get(&self, job_id: &str) -> Result<Arc<BackupJobEntry>, DomainError> {
        let jobs = self
            .jobs
            .lock()
            .map_err(|_| DomainError::InternalError("Failed to lock job registry".to_string()))?;

        jobs.get(job_id)
            .cloned()
            .ok_or_else(|| DomainError::NotFound(format!("Backup job not found: {}", job_id)))
    }
}

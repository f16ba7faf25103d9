use thiserror::Error;
use uuid::Uuid;

use crate::scheduler::job::JobStatus;
use crate::scheduler::worker::WorkerId;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Worker not found: {0}")]
    WorkerNotFound(WorkerId),

    #[error("Invalid transition for job {job_id}: cannot {action} from {from}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        action: &'static str,
    },

    #[error("Invalid progress for job {job_id}: {value} ({reason})")]
    InvalidProgress {
        job_id: Uuid,
        value: f64,
        reason: &'static str,
    },

    #[error("Worker {worker_id} cannot take job {job_id}: {reason}")]
    WorkerIneligible {
        job_id: Uuid,
        worker_id: WorkerId,
        reason: &'static str,
    },

    #[error("No registered worker offers capabilities {missing:?} required by job {job_id}")]
    CapabilityMismatch { job_id: Uuid, missing: Vec<String> },

    #[error("Stale report for job {job_id} from worker {worker_id}")]
    StaleReport { job_id: Uuid, worker_id: WorkerId },

    #[error("Invalid registration for worker {worker_id}: {reason}")]
    InvalidRegistration { worker_id: WorkerId, reason: String },

    #[error("Invalid priority {0}, must be between 1 and 99")]
    InvalidPriority(i64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrchestratorError {
    /// True for errors that describe a report the engine chose to ignore.
    pub fn is_stale(&self) -> bool {
        matches!(self, OrchestratorError::StaleReport { .. })
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

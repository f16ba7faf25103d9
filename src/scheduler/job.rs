use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::scheduler::worker::WorkerId;

/// What a job asks a worker to do. The engine never looks past this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Rip,
    Transcode,
    Organize,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Rip => write!(f, "rip"),
            JobKind::Transcode => write!(f, "transcode"),
            JobKind::Organize => write!(f, "organize"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    AwaitingApproval,
    Queued,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
    Rejected,
}

impl JobStatus {
    pub const ALL: [JobStatus; 9] = [
        JobStatus::Pending,
        JobStatus::AwaitingApproval,
        JobStatus::Queued,
        JobStatus::Assigned,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
        JobStatus::Rejected,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Rejected
        )
    }

    /// True while a worker slot is occupied by the job.
    pub fn is_held(self) -> bool {
        matches!(self, JobStatus::Assigned | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::AwaitingApproval => write!(f, "awaiting_approval"),
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Assigned => write!(f, "assigned"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// Why a job ended up `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "message", rename_all = "snake_case")]
pub enum JobFailure {
    /// The worker reported a failure while executing
    Execution(String),
    /// `fail_job` fallback: nothing could take the job on the first attempt
    NoEligibleWorker,
    /// `queue_and_wait` fallback: the job sat queued past the timeout
    AssignmentTimeout,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobFailure::Execution(message) => write!(f, "execution failed: {}", message),
            JobFailure::NoEligibleWorker => write!(f, "no eligible worker"),
            JobFailure::AssignmentTimeout => write!(f, "assignment timeout"),
        }
    }
}

/// Recorded outcome of an approval decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub approved: bool,
    pub decided_by: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Job creation request from an agent or other collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub kind: JobKind,
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub requires_approval: bool,
    /// Opaque reference the engine carries but never interprets
    #[serde(default)]
    pub payload: Option<String>,
}

impl JobRequest {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            required_capabilities: BTreeSet::new(),
            priority: 0,
            requires_approval: false,
            payload: None,
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.insert(capability.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn requiring_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Creation order, unique per orchestrator
    pub seq: u64,
    pub kind: JobKind,
    pub status: JobStatus,
    pub priority: i32,
    pub requires_approval: bool,
    pub required_capabilities: BTreeSet<String>,
    pub payload: Option<String>,
    pub assigned_worker: Option<WorkerId>,
    pub progress: f64,
    pub error: Option<JobFailure>,
    pub approval: Option<ApprovalRecord>,
    pub rejection_reason: Option<String>,
    pub reclaim_count: u32,
    pub last_reclaimed_from: Option<WorkerId>,
    /// Dispatch passes that considered this job while queued. Survives
    /// reclaim, so only the first pass after creation or approval counts as
    /// the first attempt.
    pub dispatch_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: Uuid, seq: u64, request: JobRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            seq,
            kind: request.kind,
            status: JobStatus::Pending,
            priority: request.priority,
            requires_approval: request.requires_approval,
            required_capabilities: request.required_capabilities,
            payload: request.payload,
            assigned_worker: None,
            progress: 0.0,
            error: None,
            approval: None,
            rejection_reason: None,
            reclaim_count: 0,
            last_reclaimed_from: None,
            dispatch_attempts: 0,
            created_at,
            queued_at: None,
            assigned_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    fn invalid(&self, action: &'static str) -> OrchestratorError {
        OrchestratorError::InvalidTransition {
            job_id: self.id,
            from: self.status,
            action,
        }
    }

    fn stale(&self, worker_id: &WorkerId) -> OrchestratorError {
        OrchestratorError::StaleReport {
            job_id: self.id,
            worker_id: worker_id.clone(),
        }
    }

    /// Dispatch order: more urgent first, then creation order.
    pub fn dispatch_key(&self) -> (i32, u64) {
        (self.priority, self.seq)
    }

    pub fn is_held_by(&self, worker_id: &WorkerId) -> bool {
        self.status.is_held() && self.assigned_worker.as_ref() == Some(worker_id)
    }

    /// Reports are only accepted from the worker currently holding the job.
    pub fn ensure_reporter(&self, worker_id: &WorkerId) -> Result<()> {
        if self.status.is_terminal() || self.assigned_worker.as_ref() != Some(worker_id) {
            return Err(self.stale(worker_id));
        }
        Ok(())
    }

    pub(crate) fn enter_queue(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Queued;
        self.queued_at = Some(now);
    }

    /// `Pending` → `AwaitingApproval` or `Queued`.
    pub fn admit(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != JobStatus::Pending {
            return Err(self.invalid("admit"));
        }
        if self.requires_approval {
            self.status = JobStatus::AwaitingApproval;
        } else {
            self.enter_queue(now);
        }
        Ok(())
    }

    /// `Queued` → `Assigned`.
    pub fn assign(&mut self, worker_id: &WorkerId, now: DateTime<Utc>) -> Result<()> {
        if self.status != JobStatus::Queued {
            return Err(self.invalid("assign"));
        }
        self.status = JobStatus::Assigned;
        self.assigned_worker = Some(worker_id.clone());
        self.assigned_at = Some(now);
        Ok(())
    }

    /// `Assigned` → `Running`. Returns false for a duplicate start report.
    pub fn start(&mut self, worker_id: &WorkerId, now: DateTime<Utc>) -> Result<bool> {
        self.ensure_reporter(worker_id)?;
        match self.status {
            JobStatus::Assigned => {
                self.status = JobStatus::Running;
                self.started_at = Some(now);
                Ok(true)
            }
            JobStatus::Running => Ok(false),
            _ => Err(self.invalid("start")),
        }
    }

    pub fn record_progress(&mut self, worker_id: &WorkerId, value: f64) -> Result<()> {
        self.ensure_reporter(worker_id)?;
        if self.status != JobStatus::Running {
            return Err(self.invalid("report progress"));
        }
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(OrchestratorError::InvalidProgress {
                job_id: self.id,
                value,
                reason: "outside 0.0..=1.0",
            });
        }
        if value < self.progress {
            return Err(OrchestratorError::InvalidProgress {
                job_id: self.id,
                value,
                reason: "progress may not decrease",
            });
        }
        self.progress = value;
        Ok(())
    }

    /// `Running` → `Completed`. Returns how long the job ran.
    pub fn complete(&mut self, worker_id: &WorkerId, now: DateTime<Utc>) -> Result<Duration> {
        self.ensure_reporter(worker_id)?;
        if self.status != JobStatus::Running {
            return Err(self.invalid("complete"));
        }
        self.status = JobStatus::Completed;
        self.progress = 1.0;
        self.assigned_worker = None;
        self.completed_at = Some(now);
        let began = self.started_at.or(self.assigned_at).unwrap_or(now);
        Ok(now - began)
    }

    /// `Assigned`/`Running` → `Failed`.
    pub fn fail(&mut self, worker_id: &WorkerId, message: String, now: DateTime<Utc>) -> Result<()> {
        self.ensure_reporter(worker_id)?;
        if !self.status.is_held() {
            return Err(self.invalid("fail"));
        }
        self.status = JobStatus::Failed;
        self.error = Some(JobFailure::Execution(message));
        self.assigned_worker = None;
        self.completed_at = Some(now);
        Ok(())
    }

    /// `Queued` → `Failed` when the fallback mode gives up on assignment.
    pub fn fail_unassigned(&mut self, failure: JobFailure, now: DateTime<Utc>) -> Result<()> {
        if self.status != JobStatus::Queued {
            return Err(self.invalid("fail unassigned"));
        }
        self.status = JobStatus::Failed;
        self.error = Some(failure);
        self.completed_at = Some(now);
        Ok(())
    }

    /// Any non-terminal state → `Cancelled`. Returns the worker that held it.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<Option<WorkerId>> {
        if self.status.is_terminal() {
            return Err(self.invalid("cancel"));
        }
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(now);
        Ok(self.assigned_worker.take())
    }

    /// `Assigned`/`Running` → `Queued` after the holder went offline.
    pub fn reclaim(&mut self, now: DateTime<Utc>) -> Result<WorkerId> {
        if !self.status.is_held() {
            return Err(self.invalid("reclaim"));
        }
        let worker_id = self.assigned_worker.take().ok_or_else(|| self.invalid("reclaim"))?;
        self.enter_queue(now);
        self.progress = 0.0;
        self.assigned_at = None;
        self.started_at = None;
        self.reclaim_count += 1;
        self.last_reclaimed_from = Some(worker_id.clone());
        Ok(worker_id)
    }
}

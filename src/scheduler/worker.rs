use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

pub const MIN_WORKER_PRIORITY: i64 = 1;
pub const MAX_WORKER_PRIORITY: i64 = 99;
const DEFAULT_WORKER_PRIORITY: u8 = 50;
const DEFAULT_MAX_CONCURRENT: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for WorkerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Where a worker runs relative to the ripping agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// Same machine as a ripping agent
    #[default]
    Local,
    /// Dedicated transcoding host
    Remote,
    /// CPU-only fallback
    Fallback,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Local => write!(f, "local"),
            WorkerKind::Remote => write!(f, "remote"),
            WorkerKind::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerHealth {
    Available,
    Busy,
    Offline,
}

impl fmt::Display for WorkerHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerHealth::Available => write!(f, "available"),
            WorkerHealth::Busy => write!(f, "busy"),
            WorkerHealth::Offline => write!(f, "offline"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            tags: BTreeSet::new(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

impl Capabilities {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            tags: BTreeSet::new(),
            max_concurrent,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn satisfies(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.tags)
    }

    pub fn missing(&self, required: &BTreeSet<String>) -> Vec<String> {
        required.difference(&self.tags).cloned().collect()
    }
}

/// Latest resource sample a worker attached to its heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: Option<f64>,
    pub gpu_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub worker_id: WorkerId,
    #[serde(default)]
    pub kind: WorkerKind,
    pub hostname: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default = "default_priority")]
    pub priority: i64,
}

fn default_priority() -> i64 {
    i64::from(DEFAULT_WORKER_PRIORITY)
}

impl WorkerRegistration {
    pub fn new(worker_id: impl Into<WorkerId>, hostname: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            kind: WorkerKind::Local,
            hostname: hostname.into(),
            capabilities: Capabilities::default(),
            priority: default_priority(),
        }
    }

    pub fn with_kind(mut self, kind: WorkerKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    fn validate(&self) -> Result<u8> {
        if self.worker_id.as_str().trim().is_empty() {
            return Err(OrchestratorError::InvalidRegistration {
                worker_id: self.worker_id.clone(),
                reason: "worker id must not be empty".to_string(),
            });
        }
        if self.capabilities.max_concurrent == 0 {
            return Err(OrchestratorError::InvalidRegistration {
                worker_id: self.worker_id.clone(),
                reason: "max_concurrent must be at least 1".to_string(),
            });
        }
        validate_priority(self.priority)
    }
}

pub fn validate_priority(priority: i64) -> Result<u8> {
    if !(MIN_WORKER_PRIORITY..=MAX_WORKER_PRIORITY).contains(&priority) {
        return Err(OrchestratorError::InvalidPriority(priority));
    }
    u8::try_from(priority).map_err(|_| OrchestratorError::InvalidPriority(priority))
}

/// Liveness signal from a worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Worker-side send time, informational only
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resource_usage: Option<ResourceUsage>,
    /// Jobs the worker believes it is still executing
    #[serde(default)]
    pub active_jobs: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub acknowledged: bool,
    pub server_time: DateTime<Utc>,
    pub status: WorkerHealth,
    /// Held jobs the worker should stop working on
    pub cancelled_jobs: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub hostname: String,
    pub kind: WorkerKind,
    pub capabilities: Capabilities,
    pub priority: u8,
    pub enabled: bool,
    /// Cached health, refreshed on every touch and by the health monitor
    pub status: WorkerHealth,
    pub current_jobs: BTreeSet<Uuid>,
    pub pending_cancellations: BTreeSet<Uuid>,
    pub resource_usage: Option<ResourceUsage>,
    /// Registration order, used by the round-robin cursor
    pub registration_seq: u64,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub total_completed: u64,
    pub total_failed: u64,
    pub avg_duration_secs: f64,
}

impl Worker {
    pub fn register(
        registration: WorkerRegistration,
        registration_seq: u64,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let priority = registration.validate()?;
        Ok(Self {
            id: registration.worker_id,
            hostname: registration.hostname,
            kind: registration.kind,
            capabilities: registration.capabilities,
            priority,
            enabled: true,
            status: WorkerHealth::Available,
            current_jobs: BTreeSet::new(),
            pending_cancellations: BTreeSet::new(),
            resource_usage: None,
            registration_seq,
            registered_at: now,
            last_heartbeat: now,
            total_completed: 0,
            total_failed: 0,
            avg_duration_secs: 0.0,
        })
    }

    /// Re-registration updates this record in place.
    pub fn reregister(&mut self, registration: WorkerRegistration, now: DateTime<Utc>) -> Result<()> {
        let priority = registration.validate()?;
        if registration.capabilities.max_concurrent < self.current_jobs.len() {
            return Err(OrchestratorError::InvalidRegistration {
                worker_id: self.id.clone(),
                reason: format!(
                    "max_concurrent {} is below the {} jobs currently held",
                    registration.capabilities.max_concurrent,
                    self.current_jobs.len()
                ),
            });
        }
        self.hostname = registration.hostname;
        self.kind = registration.kind;
        self.capabilities = registration.capabilities;
        self.priority = priority;
        self.last_heartbeat = now;
        Ok(())
    }

    /// No heartbeat for longer than `offline_threshold`.
    pub fn heartbeat_expired(&self, now: DateTime<Utc>, offline_threshold: Duration) -> bool {
        now - self.last_heartbeat > offline_threshold
    }

    /// Status as seen from outside.
    ///
    /// A silent worker only reads as `Offline` once it holds nothing; until
    /// the health sweep has reclaimed its jobs it reads as `Busy`.
    pub fn compute_health(&self, now: DateTime<Utc>, offline_threshold: Duration) -> WorkerHealth {
        let expired = self.heartbeat_expired(now, offline_threshold);
        if expired && self.current_jobs.is_empty() {
            WorkerHealth::Offline
        } else if expired || self.current_jobs.len() >= self.capabilities.max_concurrent {
            WorkerHealth::Busy
        } else {
            WorkerHealth::Available
        }
    }

    pub fn refresh_status(&mut self, now: DateTime<Utc>, offline_threshold: Duration) -> WorkerHealth {
        self.status = self.compute_health(now, offline_threshold);
        self.status
    }

    pub fn touch(&mut self, now: DateTime<Utc>, offline_threshold: Duration) {
        if now > self.last_heartbeat {
            self.last_heartbeat = now;
        }
        self.refresh_status(now, offline_threshold);
    }

    pub fn has_capacity(&self) -> bool {
        self.current_jobs.len() < self.capabilities.max_concurrent
    }

    pub fn is_eligible(
        &self,
        required: &BTreeSet<String>,
        now: DateTime<Utc>,
        offline_threshold: Duration,
    ) -> bool {
        self.ineligibility(required, now, offline_threshold).is_none()
    }

    /// Why this worker cannot take a job needing `required` right now.
    pub fn ineligibility(
        &self,
        required: &BTreeSet<String>,
        now: DateTime<Utc>,
        offline_threshold: Duration,
    ) -> Option<&'static str> {
        if !self.enabled {
            Some("worker is disabled")
        } else if self.heartbeat_expired(now, offline_threshold) {
            Some("worker is offline")
        } else if !self.has_capacity() {
            Some("worker is at capacity")
        } else if !self.capabilities.satisfies(required) {
            Some("worker lacks a required capability")
        } else {
            None
        }
    }

    pub fn load_ratio(&self) -> f64 {
        self.current_jobs.len() as f64 / self.capabilities.max_concurrent.max(1) as f64
    }

    pub fn hold(&mut self, job_id: Uuid, now: DateTime<Utc>, offline_threshold: Duration) {
        self.current_jobs.insert(job_id);
        self.refresh_status(now, offline_threshold);
    }

    pub fn release(&mut self, job_id: &Uuid, now: DateTime<Utc>, offline_threshold: Duration) -> bool {
        let removed = self.current_jobs.remove(job_id);
        self.refresh_status(now, offline_threshold);
        removed
    }

    pub fn record_completion(&mut self, ran_for: Duration) {
        self.total_completed += 1;
        let secs = ran_for.num_milliseconds().max(0) as f64 / 1000.0;
        let n = self.total_completed as f64;
        self.avg_duration_secs += (secs - self.avg_duration_secs) / n;
    }

    pub fn record_failure(&mut self) {
        self.total_failed += 1;
    }

    /// Cancellations to hand back on the next acknowledgement.
    ///
    /// An entry stays pending until the worker stops listing the job among
    /// its active jobs, or is delivered once if the worker sends no list.
    pub fn take_cancellations(&mut self, active_jobs: Option<&[Uuid]>) -> Vec<Uuid> {
        let pending: Vec<Uuid> = self.pending_cancellations.iter().copied().collect();
        match active_jobs {
            Some(active) => {
                self.pending_cancellations.retain(|id| active.contains(id));
                pending.into_iter().filter(|id| active.contains(id)).collect()
            }
            None => {
                self.pending_cancellations.clear();
                pending
            }
        }
    }
}

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::{FallbackMode, OrchestratorConfig};
use crate::error::{OrchestratorError, Result};
use crate::persistence::Snapshot;
use crate::scheduler::approval::{ApprovalDecision, ApprovalGate};
use crate::scheduler::health::{HealthMonitor, SweepReport};
use crate::scheduler::job::{Job, JobFailure, JobKind, JobRequest, JobStatus};
use crate::scheduler::queue::{JobHandle, JobQueue};
use crate::scheduler::registry::{WorkerHandle, WorkerRegistry};
use crate::scheduler::strategy::{strategy_for, AssignmentStrategy, WorkerSnapshot};
use crate::scheduler::worker::{
    validate_priority, Heartbeat, HeartbeatAck, Worker, WorkerHealth, WorkerId, WorkerRegistration,
};

/// Progress or terminal outcome reported by the worker executing a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobReport {
    Started,
    Progress { progress: f64 },
    Completed,
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportOutcome {
    Applied,
    /// Repeat of a report already applied
    Duplicate,
    /// Reporter no longer holds the job, or the job is already terminal
    Ignored,
}

/// Filter for job listings. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub worker: Option<WorkerId>,
    pub kind: Option<JobKind>,
}

impl JobFilter {
    fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self
                .worker
                .as_ref()
                .map_or(true, |w| job.assigned_worker.as_ref() == Some(w))
            && self.kind.map_or(true, |k| job.kind == k)
    }
}

/// What a dispatch pass did.
#[derive(Debug, Default, Clone, Serialize)]
pub struct DispatchReport {
    pub assigned: Vec<(Uuid, WorkerId)>,
    pub failed: Vec<(Uuid, JobFailure)>,
    /// Jobs left queued for a later pass
    pub waiting: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerLoad {
    pub worker_id: WorkerId,
    pub status: WorkerHealth,
    pub enabled: bool,
    pub current_jobs: usize,
    pub max_concurrent: usize,
    pub load: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub total: usize,
    pub available: usize,
    pub busy: usize,
    pub offline: usize,
    pub disabled: usize,
    pub total_jobs_completed: u64,
    pub total_jobs_failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub total_jobs: usize,
    pub by_status: BTreeMap<JobStatus, usize>,
    pub by_kind: BTreeMap<JobKind, usize>,
    pub reclaimed_total: u64,
    pub workers: WorkerStats,
    pub worker_load: Vec<WorkerLoad>,
}

/// Owns every job and worker record and drives all transitions.
///
/// Records are locked individually, always job before worker. Assignment
/// decisions additionally serialize on `dispatch_lock`, which heartbeats,
/// reports and queries never touch.
pub struct Orchestrator {
    config: OrchestratorConfig,
    clock: Arc<dyn Clock>,
    jobs: JobQueue,
    workers: WorkerRegistry,
    strategy: Box<dyn AssignmentStrategy>,
    health: HealthMonitor,
    dispatch_lock: Mutex<()>,
    work_available: Notify,
    reclaimed_total: AtomicU64,
    mismatch_warned: Mutex<HashSet<Uuid>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("strategy", &self.strategy.kind())
            .field("jobs", &self.jobs.len())
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: OrchestratorConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            strategy: strategy_for(config.assignment_strategy),
            health: HealthMonitor::new(config.offline_threshold()),
            config,
            clock,
            jobs: JobQueue::new(),
            workers: WorkerRegistry::new(),
            dispatch_lock: Mutex::new(()),
            work_available: Notify::new(),
            reclaimed_total: AtomicU64::new(0),
            mismatch_warned: Mutex::new(HashSet::new()),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn threshold(&self) -> chrono::Duration {
        self.health.offline_threshold()
    }

    fn job_handle(&self, job_id: &Uuid) -> Result<JobHandle> {
        self.jobs
            .get(job_id)
            .ok_or(OrchestratorError::JobNotFound(*job_id))
    }

    fn worker_handle(&self, worker_id: &WorkerId) -> Result<WorkerHandle> {
        self.workers
            .get(worker_id)
            .ok_or_else(|| OrchestratorError::WorkerNotFound(worker_id.clone()))
    }

    fn wake_dispatcher(&self) {
        self.work_available.notify_one();
    }

    /// Resolves when new work may be assignable (job queued, slot freed, ...).
    pub async fn work_available(&self) {
        self.work_available.notified().await;
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    pub fn create_job(&self, request: JobRequest) -> Result<Job> {
        let now = self.now();
        let mut job = Job::new(Uuid::new_v4(), self.jobs.next_seq(), request, now);
        job.admit(now)?;
        let created = job.clone();
        self.jobs.insert(job);

        tracing::info!(
            job_id = %created.id,
            kind = %created.kind,
            status = %created.status,
            priority = created.priority,
            requires_approval = created.requires_approval,
            "Job created"
        );

        if created.status == JobStatus::Queued {
            if let Err(e) = self.check_capabilities(&created) {
                self.warn_mismatch_once(created.id, &e);
            }
            self.wake_dispatcher();
        }
        Ok(created)
    }

    /// `Err(CapabilityMismatch)` when no registered worker could ever run `job`.
    pub fn check_capabilities(&self, job: &Job) -> Result<()> {
        match self.workers.capability_gap(&job.required_capabilities) {
            Some(missing) => Err(OrchestratorError::CapabilityMismatch {
                job_id: job.id,
                missing,
            }),
            None => Ok(()),
        }
    }

    fn warn_mismatch_once(&self, job_id: Uuid, error: &OrchestratorError) {
        if self.mismatch_warned.lock().insert(job_id) {
            tracing::warn!(job_id = %job_id, error = %error, "Job stays queued until a capable worker registers");
        }
    }

    /// Called whenever a job leaves `Queued`.
    fn forget_mismatch(&self, job_id: &Uuid) {
        self.mismatch_warned.lock().remove(job_id);
    }

    pub fn approve(&self, job_id: &Uuid, decided_by: Option<String>) -> Result<Job> {
        let job = self.decide(job_id, ApprovalDecision::Approve, decided_by)?;
        if let Err(e) = self.check_capabilities(&job) {
            self.warn_mismatch_once(job.id, &e);
        }
        self.wake_dispatcher();
        Ok(job)
    }

    pub fn reject(
        &self,
        job_id: &Uuid,
        decided_by: Option<String>,
        reason: Option<String>,
    ) -> Result<Job> {
        self.decide(job_id, ApprovalDecision::Reject { reason }, decided_by)
    }

    fn decide(
        &self,
        job_id: &Uuid,
        decision: ApprovalDecision,
        decided_by: Option<String>,
    ) -> Result<Job> {
        let handle = self.job_handle(job_id)?;
        let mut job = handle.write();
        ApprovalGate::decide(&mut job, decision, decided_by, self.now())?;
        tracing::info!(
            job_id = %job_id,
            status = %job.status,
            decided_by = ?job.approval.as_ref().and_then(|a| a.decided_by.as_deref()),
            "Approval decision recorded"
        );
        Ok(job.clone())
    }

    /// Cancel a job in any non-terminal state.
    ///
    /// The holding worker's slot is freed at once; the worker hears about it
    /// on its next heartbeat.
    pub fn cancel(&self, job_id: &Uuid) -> Result<Job> {
        let now = self.now();
        let handle = self.job_handle(job_id)?;
        let cancelled = {
            let mut job = handle.write();
            let holder = job.cancel(now)?;
            self.forget_mismatch(job_id);
            if let Some(worker_id) = holder {
                match self.workers.get(&worker_id) {
                    Some(worker_handle) => {
                        let mut worker = worker_handle.write();
                        worker.release(job_id, now, self.threshold());
                        worker.pending_cancellations.insert(*job_id);
                    }
                    None => {
                        tracing::warn!(job_id = %job_id, worker_id = %worker_id, "Cancelled job held by unknown worker");
                    }
                }
                tracing::info!(job_id = %job_id, worker_id = %worker_id, "Job cancelled, worker will be notified");
                self.wake_dispatcher();
            } else {
                tracing::info!(job_id = %job_id, "Job cancelled");
            }
            job.clone()
        };
        Ok(cancelled)
    }

    /// Apply a report from `worker_id` about `job_id`.
    ///
    /// Reports from a worker that no longer holds the job, or about a job
    /// already in a terminal state, are ignored rather than rejected.
    pub fn report(&self, job_id: &Uuid, worker_id: &WorkerId, report: JobReport) -> Result<ReportOutcome> {
        let now = self.now();
        let handle = self.job_handle(job_id)?;
        let worker_handle = self.worker_handle(worker_id)?;

        let mut job = handle.write();
        let outcome = match report {
            JobReport::Started => job.start(worker_id, now).map(|changed| {
                if changed {
                    tracing::info!(job_id = %job_id, worker_id = %worker_id, "Job started");
                    ReportOutcome::Applied
                } else {
                    ReportOutcome::Duplicate
                }
            }),
            JobReport::Progress { progress } => {
                job.record_progress(worker_id, progress).map(|()| {
                    tracing::debug!(job_id = %job_id, progress, "Job progress");
                    ReportOutcome::Applied
                })
            }
            JobReport::Completed => job.complete(worker_id, now).map(|ran_for| {
                let mut worker = worker_handle.write();
                worker.release(job_id, now, self.threshold());
                worker.record_completion(ran_for);
                tracing::info!(
                    job_id = %job_id,
                    worker_id = %worker_id,
                    duration_secs = ran_for.num_seconds(),
                    "Job completed"
                );
                ReportOutcome::Applied
            }),
            JobReport::Failed { reason } => job.fail(worker_id, reason, now).map(|()| {
                let mut worker = worker_handle.write();
                worker.release(job_id, now, self.threshold());
                worker.record_failure();
                tracing::warn!(
                    job_id = %job_id,
                    worker_id = %worker_id,
                    error = ?job.error,
                    "Job failed"
                );
                ReportOutcome::Applied
            }),
        };
        let released = !job.status.is_held() && outcome.is_ok();
        drop(job);

        match outcome {
            Ok(outcome) => {
                if released && outcome == ReportOutcome::Applied {
                    self.wake_dispatcher();
                }
                Ok(outcome)
            }
            Err(e) if e.is_stale() => {
                tracing::debug!(job_id = %job_id, worker_id = %worker_id, "Ignoring stale report");
                Ok(ReportOutcome::Ignored)
            }
            Err(e @ OrchestratorError::InvalidProgress { .. }) => {
                tracing::warn!(job_id = %job_id, worker_id = %worker_id, error = %e, "Rejected progress report");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    pub fn get_job(&self, job_id: &Uuid) -> Result<Job> {
        self.jobs
            .snapshot(job_id)
            .ok_or(OrchestratorError::JobNotFound(*job_id))
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> Vec<Job> {
        self.jobs.filtered(|job| filter.matches(job))
    }

    /// Queued jobs in the order dispatch considers them.
    pub fn pending_jobs(&self) -> Vec<Job> {
        self.jobs.pending_jobs()
    }

    pub fn jobs_awaiting_approval(&self) -> Vec<Job> {
        self.jobs.awaiting_approval()
    }

    /// Drop terminal jobs that finished before `cutoff`; for retention policies.
    pub fn purge_finished(&self, cutoff: DateTime<Utc>) -> usize {
        let purged = self.jobs.purge_finished(cutoff);
        self.mismatch_warned
            .lock()
            .retain(|id| self.jobs.get(id).is_some());
        if purged > 0 {
            tracing::info!(purged, "Purged finished jobs");
        }
        purged
    }

    // =========================================================================
    // Workers
    // =========================================================================

    /// Register a worker, or update the record if the id is already known.
    pub fn register_worker(&self, registration: WorkerRegistration) -> Result<Worker> {
        let registered = self
            .workers
            .upsert(registration, self.now(), self.threshold())?;
        let worker = registered.worker;
        if registered.created {
            tracing::info!(
                worker_id = %worker.id,
                hostname = %worker.hostname,
                kind = %worker.kind,
                priority = worker.priority,
                max_concurrent = worker.capabilities.max_concurrent,
                capabilities = ?worker.capabilities.tags,
                "Worker registered"
            );
        } else {
            tracing::info!(worker_id = %worker.id, hostname = %worker.hostname, "Worker re-registered");
        }
        self.wake_dispatcher();
        Ok(worker)
    }

    pub fn heartbeat(&self, worker_id: &WorkerId, heartbeat: Heartbeat) -> Result<HeartbeatAck> {
        let now = self.now();
        let handle = self.worker_handle(worker_id)?;
        let mut worker = handle.write();
        let previous = worker.status;
        worker.touch(now, self.threshold());
        if heartbeat.resource_usage.is_some() {
            worker.resource_usage = heartbeat.resource_usage;
        }
        let cancelled_jobs = worker.take_cancellations(heartbeat.active_jobs.as_deref());
        let status = worker.status;
        drop(worker);

        if previous == WorkerHealth::Offline && status != WorkerHealth::Offline {
            tracing::info!(worker_id = %worker_id, "Worker back online");
            self.wake_dispatcher();
        }
        Ok(HeartbeatAck {
            acknowledged: true,
            server_time: now,
            status,
            cancelled_jobs,
        })
    }

    pub fn set_worker_priority(&self, worker_id: &WorkerId, priority: i64) -> Result<Worker> {
        let priority = validate_priority(priority)?;
        let handle = self.worker_handle(worker_id)?;
        let mut worker = handle.write();
        worker.priority = priority;
        tracing::info!(worker_id = %worker_id, priority, "Worker priority updated");
        Ok(worker.clone())
    }

    pub fn set_worker_enabled(&self, worker_id: &WorkerId, enabled: bool) -> Result<Worker> {
        let handle = self.worker_handle(worker_id)?;
        let updated = {
            let mut worker = handle.write();
            worker.enabled = enabled;
            worker.clone()
        };
        tracing::info!(worker_id = %worker_id, enabled, "Worker toggled");
        if enabled {
            self.wake_dispatcher();
        }
        Ok(updated)
    }

    /// Worker record with its status recomputed for the current time.
    pub fn get_worker(&self, worker_id: &WorkerId) -> Result<Worker> {
        let now = self.now();
        let handle = self.worker_handle(worker_id)?;
        let mut worker = handle.read().clone();
        worker.status = worker.compute_health(now, self.threshold());
        Ok(worker)
    }

    /// Jobs currently held by `worker_id`, in creation order.
    pub fn worker_jobs(&self, worker_id: &WorkerId) -> Result<Vec<Job>> {
        self.worker_handle(worker_id)?;
        Ok(self.jobs.jobs_for_worker(worker_id))
    }

    pub fn list_workers(&self) -> Vec<Worker> {
        let now = self.now();
        self.workers
            .all_workers()
            .into_iter()
            .map(|mut worker| {
                worker.status = worker.compute_health(now, self.threshold());
                worker
            })
            .collect()
    }

    /// Enabled workers with a free slot, best priority first.
    pub fn available_workers(&self) -> Vec<Worker> {
        let mut available: Vec<Worker> = self
            .list_workers()
            .into_iter()
            .filter(|worker| worker.enabled && worker.status == WorkerHealth::Available)
            .collect();
        available.sort_by_key(|worker| (worker.priority, worker.registration_seq));
        available
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    fn eligible_workers(&self, job: &Job, now: DateTime<Utc>) -> Vec<WorkerSnapshot> {
        self.workers
            .handles()
            .into_iter()
            .filter_map(|handle| {
                let worker = handle.read();
                worker
                    .is_eligible(&job.required_capabilities, now, self.threshold())
                    .then(|| WorkerSnapshot::of(&worker))
            })
            .collect()
    }

    /// Commit `job` to `worker` if both still allow it.
    ///
    /// The job must still be queued and the worker still eligible with a free
    /// slot while both locks are held; otherwise nothing changes.
    fn try_assign(
        &self,
        job_handle: &JobHandle,
        worker_handle: &WorkerHandle,
        now: DateTime<Utc>,
    ) -> Result<(Job, WorkerSnapshot)> {
        let mut job = job_handle.write();
        if job.status != JobStatus::Queued {
            return Err(OrchestratorError::InvalidTransition {
                job_id: job.id,
                from: job.status,
                action: "assign",
            });
        }
        let mut worker = worker_handle.write();
        if let Some(reason) = worker.ineligibility(&job.required_capabilities, now, self.threshold()) {
            return Err(OrchestratorError::WorkerIneligible {
                job_id: job.id,
                worker_id: worker.id.clone(),
                reason,
            });
        }
        let snapshot = WorkerSnapshot::of(&worker);
        job.assign(&worker.id, now)?;
        worker.hold(job.id, now, self.threshold());
        self.forget_mismatch(&job.id);

        tracing::info!(
            job_id = %job.id,
            worker_id = %worker.id,
            strategy = %self.strategy.kind(),
            load = worker.current_jobs.len(),
            max_concurrent = worker.capabilities.max_concurrent,
            "Job assigned"
        );
        Ok((job.clone(), snapshot))
    }

    /// Work for `worker_id`, at most `max_jobs` items.
    ///
    /// Counts as a heartbeat. Jobs already assigned to the worker but not yet
    /// started are handed out again first; after that, queued jobs are claimed
    /// only where the configured strategy picks this worker.
    pub fn poll(&self, worker_id: &WorkerId, max_jobs: usize) -> Result<Vec<Job>> {
        let max_jobs = max_jobs.max(1);
        let now = self.now();
        let worker_handle = self.worker_handle(worker_id)?;
        let held: Vec<Uuid> = {
            let mut worker = worker_handle.write();
            worker.touch(now, self.threshold());
            worker.current_jobs.iter().copied().collect()
        };

        let mut delivered: Vec<Job> = held
            .iter()
            .filter_map(|id| self.jobs.snapshot(id))
            .filter(|job| job.status == JobStatus::Assigned && job.is_held_by(worker_id))
            .collect();
        delivered.sort_by_key(|job| job.seq);
        if delivered.len() >= max_jobs {
            delivered.truncate(max_jobs);
            return Ok(delivered);
        }

        let _guard = self.dispatch_lock.lock();
        for job_handle in self.jobs.queued_handles() {
            if delivered.len() >= max_jobs {
                break;
            }
            let job = job_handle.read().clone();
            if job.status != JobStatus::Queued {
                continue;
            }
            let eligible = self.eligible_workers(&job, now);
            if !eligible.iter().any(|w| &w.id == worker_id) {
                continue;
            }
            if self.strategy.select(&job, &eligible).as_ref() != Some(worker_id) {
                continue;
            }
            if let Ok((assigned, snapshot)) = self.try_assign(&job_handle, &worker_handle, now) {
                self.strategy.record_assignment(&snapshot);
                delivered.push(assigned);
            }
        }
        Ok(delivered)
    }

    /// Hand a queued job to a named worker, bypassing the strategy.
    ///
    /// The worker must be eligible exactly as for automatic dispatch.
    pub fn assign_to(&self, job_id: &Uuid, worker_id: &WorkerId) -> Result<Job> {
        let now = self.now();
        let job_handle = self.job_handle(job_id)?;
        let worker_handle = self.worker_handle(worker_id)?;
        let _guard = self.dispatch_lock.lock();
        let (job, _) = self.try_assign(&job_handle, &worker_handle, now)?;
        tracing::info!(job_id = %job_id, worker_id = %worker_id, "Job assigned manually");
        Ok(job)
    }

    /// One pass over queued jobs: assign what can be assigned, then apply the
    /// fallback mode to the rest.
    pub fn dispatch_pending(&self) -> DispatchReport {
        let now = self.now();
        let mut report = DispatchReport::default();
        let _guard = self.dispatch_lock.lock();

        for job_handle in self.jobs.queued_handles() {
            let job = {
                let mut job = job_handle.write();
                if job.status != JobStatus::Queued {
                    continue;
                }
                job.dispatch_attempts += 1;
                job.clone()
            };

            let eligible = self.eligible_workers(&job, now);
            if let Some(chosen) = self.strategy.select(&job, &eligible) {
                if let Some(worker_handle) = self.workers.get(&chosen) {
                    if let Ok((_, snapshot)) = self.try_assign(&job_handle, &worker_handle, now) {
                        self.strategy.record_assignment(&snapshot);
                        report.assigned.push((job.id, chosen));
                        continue;
                    }
                }
            }

            if let Some(failure) = self.apply_fallback(&job, now) {
                let mut current = job_handle.write();
                match current.fail_unassigned(failure.clone(), now) {
                    Ok(()) => {
                        self.forget_mismatch(&job.id);
                        tracing::warn!(job_id = %job.id, reason = %failure, fallback = %self.config.fallback_mode, "Job failed without assignment");
                        report.failed.push((job.id, failure));
                    }
                    Err(e) => {
                        tracing::debug!(job_id = %job.id, error = %e, "Job left the queue during dispatch");
                    }
                }
            } else {
                report.waiting += 1;
            }
        }

        if !report.assigned.is_empty() || !report.failed.is_empty() {
            tracing::debug!(
                assigned = report.assigned.len(),
                failed = report.failed.len(),
                waiting = report.waiting,
                "Dispatch pass finished"
            );
        }
        report
    }

    /// Failure to record for a job nobody could take, if the mode calls for one.
    fn apply_fallback(&self, job: &Job, now: DateTime<Utc>) -> Option<JobFailure> {
        let mismatch = self.check_capabilities(job).err();
        if let Some(e) = &mismatch {
            self.warn_mismatch_once(job.id, e);
        }

        match self.config.fallback_mode {
            FallbackMode::NextPriority => None,
            FallbackMode::QueueAndWait => {
                let queued_at = job.queued_at.unwrap_or(job.created_at);
                (now - queued_at >= self.config.assignment_timeout())
                    .then_some(JobFailure::AssignmentTimeout)
            }
            FallbackMode::FailJob => (mismatch.is_none() && job.dispatch_attempts == 1)
                .then_some(JobFailure::NoEligibleWorker),
        }
    }

    // =========================================================================
    // Health
    // =========================================================================

    /// Recompute worker health, reclaim jobs from offline workers, and
    /// re-dispatch anything reclaimed.
    pub fn health_sweep(&self) -> SweepReport {
        let report = self.health.sweep(&self.jobs, &self.workers, self.now());
        if !report.reclaimed.is_empty() {
            self.reclaimed_total
                .fetch_add(report.reclaimed.len() as u64, Ordering::Relaxed);
            self.dispatch_pending();
        }
        report
    }

    pub fn stats(&self) -> QueueStats {
        let now = self.now();
        let jobs = self.jobs.all_jobs();

        let mut by_status: BTreeMap<JobStatus, usize> =
            JobStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let mut by_kind: BTreeMap<JobKind, usize> = [JobKind::Rip, JobKind::Transcode, JobKind::Organize]
            .iter()
            .map(|k| (*k, 0))
            .collect();
        for job in &jobs {
            *by_status.entry(job.status).or_default() += 1;
            *by_kind.entry(job.kind).or_default() += 1;
        }

        let mut workers = WorkerStats::default();
        let mut worker_load = Vec::new();
        for worker in self.workers.all_workers() {
            let status = worker.compute_health(now, self.threshold());
            workers.total += 1;
            match status {
                WorkerHealth::Available => workers.available += 1,
                WorkerHealth::Busy => workers.busy += 1,
                WorkerHealth::Offline => workers.offline += 1,
            }
            if !worker.enabled {
                workers.disabled += 1;
            }
            workers.total_jobs_completed += worker.total_completed;
            workers.total_jobs_failed += worker.total_failed;
            worker_load.push(WorkerLoad {
                load: worker.load_ratio(),
                worker_id: worker.id,
                status,
                enabled: worker.enabled,
                current_jobs: worker.current_jobs.len(),
                max_concurrent: worker.capabilities.max_concurrent,
            });
        }

        QueueStats {
            total_jobs: jobs.len(),
            by_status,
            by_kind,
            reclaimed_total: self.reclaimed_total.load(Ordering::Relaxed),
            workers,
            worker_load,
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(
            self.now(),
            self.jobs.all_jobs(),
            self.workers.all_workers(),
            self.reclaimed_total.load(Ordering::Relaxed),
        )
    }

    /// Replace all state with a previously saved snapshot.
    pub fn restore(&self, snapshot: Snapshot) -> Result<()> {
        snapshot.check_version()?;
        let _guard = self.dispatch_lock.lock();
        let (jobs, workers) = (snapshot.jobs.len(), snapshot.workers.len());
        self.jobs.restore(snapshot.jobs);
        self.workers.restore(snapshot.workers);
        self.reclaimed_total
            .store(snapshot.reclaimed_total, Ordering::Relaxed);
        self.mismatch_warned.lock().clear();
        tracing::info!(jobs, workers, saved_at = %snapshot.saved_at, "Restored orchestrator snapshot");
        self.wake_dispatcher();
        Ok(())
    }
}

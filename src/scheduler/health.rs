//! Worker health sweep.
//!
//! Each sweep recomputes every worker's status from its last heartbeat and
//! load. A worker found offline while still holding jobs has those jobs
//! reclaimed back to `Queued`, oldest first, before its cached status is set
//! to `Offline`, so an offline worker never appears to hold work.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::scheduler::queue::{JobHandle, JobQueue};
use crate::scheduler::registry::{WorkerHandle, WorkerRegistry};
use crate::scheduler::worker::{WorkerHealth, WorkerId};

/// What a sweep changed.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepReport {
    /// Workers that transitioned into `Offline` during this sweep
    pub newly_offline: Vec<WorkerId>,
    /// Jobs returned to the queue, with the worker they were taken from
    pub reclaimed: Vec<(Uuid, WorkerId)>,
}

#[derive(Debug, Clone, Copy)]
pub struct HealthMonitor {
    offline_threshold: Duration,
}

impl HealthMonitor {
    pub fn new(offline_threshold: Duration) -> Self {
        Self { offline_threshold }
    }

    pub fn offline_threshold(&self) -> Duration {
        self.offline_threshold
    }

    pub fn sweep(&self, jobs: &JobQueue, workers: &WorkerRegistry, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for handle in workers.handles() {
            let (worker_id, previous, expired, held) = {
                let worker = handle.read();
                (
                    worker.id.clone(),
                    worker.status,
                    worker.heartbeat_expired(now, self.offline_threshold),
                    worker.current_jobs.iter().copied().collect::<Vec<_>>(),
                )
            };

            if !expired {
                handle.write().refresh_status(now, self.offline_threshold);
                continue;
            }

            if !held.is_empty() {
                tracing::warn!(
                    worker_id = %worker_id,
                    jobs = held.len(),
                    "Worker went offline with active jobs, reclaiming"
                );
                self.reclaim_held(jobs, &handle, &worker_id, held, now, &mut report);
            }

            let status = handle.write().refresh_status(now, self.offline_threshold);
            if status == WorkerHealth::Offline && previous != WorkerHealth::Offline {
                tracing::warn!(worker_id = %worker_id, "Worker marked offline");
                report.newly_offline.push(worker_id);
            }
        }

        report
    }

    fn reclaim_held(
        &self,
        jobs: &JobQueue,
        worker_handle: &WorkerHandle,
        worker_id: &WorkerId,
        held: Vec<Uuid>,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        let mut ordered: Vec<(u64, Uuid, Option<JobHandle>)> = held
            .into_iter()
            .map(|job_id| {
                let handle = jobs.get(&job_id);
                let seq = handle.as_ref().map_or(u64::MAX, |h| h.read().seq);
                (seq, job_id, handle)
            })
            .collect();
        ordered.sort_by_key(|(seq, _, _)| *seq);

        for (_, job_id, job_handle) in ordered {
            let Some(job_handle) = job_handle else {
                // Record already purged; just free the slot.
                worker_handle
                    .write()
                    .release(&job_id, now, self.offline_threshold);
                continue;
            };

            let mut job = job_handle.write();
            let mut worker = worker_handle.write();
            if !worker.heartbeat_expired(now, self.offline_threshold) {
                tracing::info!(worker_id = %worker_id, "Worker heartbeat arrived mid-sweep, keeping its jobs");
                return;
            }
            if !job.is_held_by(worker_id) {
                worker.release(&job_id, now, self.offline_threshold);
                continue;
            }
            match job.reclaim(now) {
                Ok(from) => {
                    worker.release(&job_id, now, self.offline_threshold);
                    tracing::warn!(
                        job_id = %job_id,
                        worker_id = %from,
                        reclaim_count = job.reclaim_count,
                        "Job reclaimed from offline worker"
                    );
                    report.reclaimed.push((job_id, from));
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to reclaim job");
                }
            }
        }
    }
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::scheduler::job::{Job, JobStatus};
use crate::scheduler::worker::WorkerId;

/// Shared handle to a single job record.
pub type JobHandle = Arc<RwLock<Job>>;

/// Job records, each behind its own lock.
///
/// The map lock is only held long enough to look up or clone handles, so a
/// report touching one job never waits on a transition of another.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: RwLock<HashMap<Uuid, JobHandle>>,
    next_seq: AtomicU64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next creation sequence number.
    pub fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, job: Job) -> JobHandle {
        let id = job.id;
        let handle = Arc::new(RwLock::new(job));
        self.jobs.write().insert(id, handle.clone());
        handle
    }

    pub fn get(&self, id: &Uuid) -> Option<JobHandle> {
        self.jobs.read().get(id).cloned()
    }

    /// Copy of a job record.
    pub fn snapshot(&self, id: &Uuid) -> Option<Job> {
        self.get(id).map(|handle| handle.read().clone())
    }

    fn handles(&self) -> Vec<JobHandle> {
        self.jobs.read().values().cloned().collect()
    }

    /// Copies of the jobs matching `predicate`, in creation order.
    pub fn filtered<F>(&self, predicate: F) -> Vec<Job>
    where
        F: Fn(&Job) -> bool,
    {
        let mut jobs: Vec<Job> = self
            .handles()
            .into_iter()
            .filter_map(|handle| {
                let job = handle.read();
                predicate(&job).then(|| job.clone())
            })
            .collect();
        jobs.sort_by_key(|j| j.seq);
        jobs
    }

    /// Get all jobs sorted by creation order
    pub fn all_jobs(&self) -> Vec<Job> {
        self.filtered(|_| true)
    }

    /// Handles of queued jobs, most urgent first.
    pub fn queued_handles(&self) -> Vec<JobHandle> {
        let mut keyed: Vec<((i32, u64), JobHandle)> = self
            .handles()
            .into_iter()
            .filter_map(|handle| {
                let key = {
                    let job = handle.read();
                    (job.status == JobStatus::Queued).then(|| job.dispatch_key())
                };
                key.map(|key| (key, handle))
            })
            .collect();
        keyed.sort_by_key(|(key, _)| *key);
        keyed.into_iter().map(|(_, handle)| handle).collect()
    }

    /// Queued jobs in dispatch order
    pub fn pending_jobs(&self) -> Vec<Job> {
        self.queued_handles()
            .into_iter()
            .map(|handle| handle.read().clone())
            .filter(|job| job.status == JobStatus::Queued)
            .collect()
    }

    pub fn awaiting_approval(&self) -> Vec<Job> {
        self.filtered(|job| job.status == JobStatus::AwaitingApproval)
    }

    /// Get jobs a specific worker currently holds
    pub fn jobs_for_worker(&self, worker_id: &WorkerId) -> Vec<Job> {
        self.filtered(|job| job.is_held_by(worker_id))
    }

    /// Drop terminal jobs that finished before `cutoff`. Returns how many went.
    pub fn purge_finished(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, handle| {
            let job = handle.read();
            !(job.status.is_terminal() && job.completed_at.is_some_and(|at| at < cutoff))
        });
        before - jobs.len()
    }

    /// Replace the contents with restored records.
    pub fn restore(&self, restored: Vec<Job>) {
        let next = restored.iter().map(|j| j.seq + 1).max().unwrap_or(0);
        let mut jobs = self.jobs.write();
        jobs.clear();
        for job in restored {
            jobs.insert(job.id, Arc::new(RwLock::new(job)));
        }
        self.next_seq.store(next, Ordering::Relaxed);
    }

    /// Returns the current number of jobs in the queue
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    /// Returns true if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}

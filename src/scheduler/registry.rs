use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::Result;
use crate::scheduler::worker::{Worker, WorkerId, WorkerRegistration};

/// Shared handle to a single worker record.
pub type WorkerHandle = Arc<RwLock<Worker>>;

/// Registered workers, each behind its own lock.
///
/// Heartbeats lock only their own record, so a burst of them never queues
/// behind an assignment decision touching other workers.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<WorkerId, WorkerHandle>>,
    next_seq: AtomicU64,
}

/// Result of a registration upsert.
#[derive(Debug, Clone)]
pub struct Registered {
    pub worker: Worker,
    pub created: bool,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new worker or update the existing record with the same id.
    pub fn upsert(
        &self,
        registration: WorkerRegistration,
        now: DateTime<Utc>,
        offline_threshold: chrono::Duration,
    ) -> Result<Registered> {
        let mut workers = self.workers.write();
        if let Some(handle) = workers.get(&registration.worker_id) {
            let mut worker = handle.write();
            worker.reregister(registration, now)?;
            worker.refresh_status(now, offline_threshold);
            return Ok(Registered {
                worker: worker.clone(),
                created: false,
            });
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let worker = Worker::register(registration, seq, now)?;
        workers.insert(worker.id.clone(), Arc::new(RwLock::new(worker.clone())));
        Ok(Registered {
            worker,
            created: true,
        })
    }

    pub fn get(&self, id: &WorkerId) -> Option<WorkerHandle> {
        self.workers.read().get(id).cloned()
    }

    /// Handles in registration order.
    pub fn handles(&self) -> Vec<WorkerHandle> {
        let mut keyed: Vec<(u64, WorkerHandle)> = self
            .workers
            .read()
            .values()
            .map(|handle| (handle.read().registration_seq, handle.clone()))
            .collect();
        keyed.sort_by_key(|(seq, _)| *seq);
        keyed.into_iter().map(|(_, handle)| handle).collect()
    }

    /// Copies of every worker in registration order.
    pub fn all_workers(&self) -> Vec<Worker> {
        self.handles()
            .into_iter()
            .map(|handle| handle.read().clone())
            .collect()
    }

    /// Capabilities from `required` that no single registered worker covers.
    ///
    /// `None` when some single worker offers all of them.
    pub fn capability_gap(&self, required: &BTreeSet<String>) -> Option<Vec<String>> {
        if required.is_empty() {
            return None;
        }
        let handles = self.handles();
        let mut offered: BTreeSet<String> = BTreeSet::new();
        for handle in &handles {
            let worker = handle.read();
            if worker.capabilities.satisfies(required) {
                return None;
            }
            offered.extend(worker.capabilities.tags.iter().cloned());
        }
        let missing: Vec<String> = required.difference(&offered).cloned().collect();
        if missing.is_empty() {
            Some(required.iter().cloned().collect())
        } else {
            Some(missing)
        }
    }

    pub fn restore(&self, restored: Vec<Worker>) {
        let next = restored
            .iter()
            .map(|w| w.registration_seq + 1)
            .max()
            .unwrap_or(0);
        let mut workers = self.workers.write();
        workers.clear();
        for worker in restored {
            workers.insert(worker.id.clone(), Arc::new(RwLock::new(worker)));
        }
        self.next_seq.store(next, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.workers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.read().is_empty()
    }
}

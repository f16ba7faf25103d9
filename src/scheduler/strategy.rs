//! Worker selection policies.
//!
//! The orchestrator filters workers down to those eligible for a job
//! (enabled, available, below capacity, capability superset) and hands the
//! resulting snapshots, in registration order, to an [`AssignmentStrategy`].
//! Strategies only choose; committing the assignment is the orchestrator's job.

use std::cmp::Ordering;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::Serialize;

use crate::config::StrategyKind;
use crate::scheduler::job::Job;
use crate::scheduler::worker::{Worker, WorkerId};

/// Point-in-time view of a worker used for selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub registration_seq: u64,
    pub priority: u8,
    pub current_jobs: usize,
    pub max_concurrent: usize,
    pub total_completed: u64,
    pub avg_duration_secs: f64,
}

impl WorkerSnapshot {
    pub fn of(worker: &Worker) -> Self {
        Self {
            id: worker.id.clone(),
            registration_seq: worker.registration_seq,
            priority: worker.priority,
            current_jobs: worker.current_jobs.len(),
            max_concurrent: worker.capabilities.max_concurrent,
            total_completed: worker.total_completed,
            avg_duration_secs: worker.avg_duration_secs,
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.current_jobs < self.max_concurrent
    }

    /// Compares `current_jobs / max_concurrent` without floating point.
    fn cmp_load(&self, other: &Self) -> Ordering {
        let lhs = self.current_jobs as u128 * other.max_concurrent.max(1) as u128;
        let rhs = other.current_jobs as u128 * self.max_concurrent.max(1) as u128;
        lhs.cmp(&rhs)
    }
}

pub trait AssignmentStrategy: Send + Sync + Debug {
    fn kind(&self) -> StrategyKind;

    /// Pick a worker for `job` from `eligible`, or `None` if none will do.
    fn select(&self, job: &Job, eligible: &[WorkerSnapshot]) -> Option<WorkerId>;

    /// Called once an assignment to `worker` has been committed.
    fn record_assignment(&self, _worker: &WorkerSnapshot) {}
}

pub fn strategy_for(kind: StrategyKind) -> Box<dyn AssignmentStrategy> {
    match kind {
        StrategyKind::Priority => Box::new(PriorityStrategy),
        StrategyKind::RoundRobin => Box::new(RoundRobinStrategy::default()),
        StrategyKind::LoadBalance => Box::new(LoadBalanceStrategy),
        StrategyKind::FastestFirst => Box::new(FastestFirstStrategy),
    }
}

fn with_capacity(eligible: &[WorkerSnapshot]) -> impl Iterator<Item = &WorkerSnapshot> {
    eligible.iter().filter(|w| w.has_capacity())
}

/// Lowest priority number, then fewest jobs, then worker id.
#[derive(Debug, Default, Clone, Copy)]
pub struct PriorityStrategy;

impl AssignmentStrategy for PriorityStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Priority
    }

    fn select(&self, _job: &Job, eligible: &[WorkerSnapshot]) -> Option<WorkerId> {
        with_capacity(eligible)
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.current_jobs.cmp(&b.current_jobs))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|w| w.id.clone())
    }
}

/// Rotating cursor over registration order.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    /// Registration sequence the next scan starts from
    cursor: AtomicU64,
}

impl AssignmentStrategy for RoundRobinStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RoundRobin
    }

    fn select(&self, _job: &Job, eligible: &[WorkerSnapshot]) -> Option<WorkerId> {
        let cursor = self.cursor.load(AtomicOrdering::Acquire);
        let ahead = with_capacity(eligible)
            .filter(|w| w.registration_seq >= cursor)
            .min_by_key(|w| w.registration_seq);
        ahead
            .or_else(|| with_capacity(eligible).min_by_key(|w| w.registration_seq))
            .map(|w| w.id.clone())
    }

    fn record_assignment(&self, worker: &WorkerSnapshot) {
        self.cursor
            .store(worker.registration_seq + 1, AtomicOrdering::Release);
    }
}

/// Lowest fill ratio, then priority, then worker id.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoadBalanceStrategy;

impl AssignmentStrategy for LoadBalanceStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LoadBalance
    }

    fn select(&self, _job: &Job, eligible: &[WorkerSnapshot]) -> Option<WorkerId> {
        with_capacity(eligible)
            .min_by(|a, b| {
                a.cmp_load(b)
                    .then(a.priority.cmp(&b.priority))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|w| w.id.clone())
    }
}

/// Shortest average job duration; workers without history go last.
#[derive(Debug, Default, Clone, Copy)]
pub struct FastestFirstStrategy;

impl AssignmentStrategy for FastestFirstStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FastestFirst
    }

    fn select(&self, _job: &Job, eligible: &[WorkerSnapshot]) -> Option<WorkerId> {
        with_capacity(eligible)
            .min_by(|a, b| {
                (a.total_completed == 0)
                    .cmp(&(b.total_completed == 0))
                    .then(a.avg_duration_secs.total_cmp(&b.avg_duration_secs))
                    .then(a.priority.cmp(&b.priority))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|w| w.id.clone())
    }
}

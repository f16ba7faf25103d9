pub mod approval;
pub mod health;
pub mod job;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod strategy;
pub mod worker;

pub use approval::{ApprovalDecision, ApprovalGate};
pub use health::{HealthMonitor, SweepReport};
pub use job::{Job, JobFailure, JobKind, JobRequest, JobStatus};
pub use orchestrator::{
    DispatchReport, JobFilter, JobReport, Orchestrator, QueueStats, ReportOutcome, WorkerLoad,
    WorkerStats,
};
pub use queue::JobQueue;
pub use registry::WorkerRegistry;
pub use strategy::{strategy_for, AssignmentStrategy, WorkerSnapshot};
pub use worker::{
    Capabilities, Heartbeat, HeartbeatAck, ResourceUsage, Worker, WorkerHealth, WorkerId,
    WorkerKind, WorkerRegistration,
};

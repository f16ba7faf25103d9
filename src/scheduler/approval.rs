use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::scheduler::job::{ApprovalRecord, Job, JobStatus};

/// A human decision on a job parked in `AwaitingApproval`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject { reason: Option<String> },
}

/// Gate in front of assignment for jobs created with `requires_approval`.
///
/// Holds no state of its own: the job's flag and status are the whole story,
/// and nothing here ever approves on a timer.
pub struct ApprovalGate;

impl ApprovalGate {
    pub fn decide(
        job: &mut Job,
        decision: ApprovalDecision,
        decided_by: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let action = match decision {
            ApprovalDecision::Approve => "approve",
            ApprovalDecision::Reject { .. } => "reject",
        };
        if !job.requires_approval || job.status != JobStatus::AwaitingApproval {
            return Err(OrchestratorError::InvalidTransition {
                job_id: job.id,
                from: job.status,
                action,
            });
        }

        match decision {
            ApprovalDecision::Approve => {
                job.approval = Some(ApprovalRecord {
                    approved: true,
                    decided_by,
                    decided_at: now,
                });
                job.enter_queue(now);
            }
            ApprovalDecision::Reject { reason } => {
                job.approval = Some(ApprovalRecord {
                    approved: false,
                    decided_by,
                    decided_at: now,
                });
                job.status = JobStatus::Rejected;
                job.rejection_reason = reason;
                job.completed_at = Some(now);
            }
        }
        Ok(())
    }
}

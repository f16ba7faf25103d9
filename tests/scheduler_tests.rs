
use ripq::clock::Clock;
use ripq::config::{FallbackMode, OrchestratorConfig};
use ripq::error::OrchestratorError;
use ripq::scheduler::{
    Heartbeat, JobFailure, JobFilter, JobKind, JobReport, JobRequest, JobStatus, Orchestrator,
    ReportOutcome, WorkerHealth, WorkerId, WorkerRegistration,
};
use test_harness::{wid, TestOrchestrator};
use uuid::Uuid;

#[test]
fn test_approval_gate_and_priority_scenario() {
    let t = TestOrchestrator::new(Default::default());
    t.worker("p1", 1, 1, &["hevc"]);
    t.worker("p2", 2, 1, &["hevc"]);

    let job = t.queued_with(
        JobRequest::new(JobKind::Transcode)
            .with_capability("hevc")
            .requiring_approval(),
    );
    assert_eq!(job.status, JobStatus::AwaitingApproval);

    assert!(t.poll(&wid("p1"), 1).unwrap().is_empty());
    assert!(t.poll(&wid("p2"), 1).unwrap().is_empty());
    assert_eq!(t.jobs_awaiting_approval().len(), 1);

    let approved = t.approve(&job.id, Some("operator".into())).unwrap();
    assert_eq!(approved.status, JobStatus::Queued);

    assert!(
        t.poll(&wid("p2"), 1).unwrap().is_empty(),
        "Lower-preference worker must not take the job while priority 1 is available"
    );

    let handed = t.poll(&wid("p1"), 1).unwrap();
    assert_eq!(handed.len(), 1);
    assert_eq!(handed[0].id, job.id);
    assert_eq!(handed[0].status, JobStatus::Assigned);
    assert_eq!(t.holder(&job), Some(wid("p1")));
}

#[test]
fn test_second_choice_worker_takes_job_once_first_is_busy() {
    let t = TestOrchestrator::new(Default::default());
    t.worker("p1", 1, 1, &["hevc"]);
    t.worker("p2", 2, 1, &["hevc"]);

    let first = t.queued_with(JobRequest::new(JobKind::Transcode).with_capability("hevc"));
    let second = t.queued_with(JobRequest::new(JobKind::Transcode).with_capability("hevc"));

    assert_eq!(t.poll(&wid("p1"), 1).unwrap()[0].id, first.id);

    let handed = t.poll(&wid("p2"), 1).unwrap();
    assert_eq!(handed.len(), 1);
    assert_eq!(handed[0].id, second.id);
}

#[test]
fn test_approval_requires_awaiting_state() {
    let t = TestOrchestrator::new(Default::default());
    let job = t.queued(0);

    let err = t.approve(&job.id, None).unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
    let err = t.reject(&job.id, None, None).unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
    assert_eq!(t.get_job(&job.id).unwrap().status, JobStatus::Queued);

    assert!(matches!(
        t.approve(&Uuid::new_v4(), None),
        Err(OrchestratorError::JobNotFound(_))
    ));
}

#[test]
fn test_rejected_job_is_never_assigned() {
    let t = TestOrchestrator::new(Default::default());
    t.worker("w1", 10, 2, &[]);
    let job = t.queued_with(JobRequest::new(JobKind::Rip).requiring_approval());

    let rejected = t
        .reject(&job.id, Some("operator".into()), Some("duplicate disc".into()))
        .unwrap();
    assert_eq!(rejected.status, JobStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("duplicate disc"));

    let report = t.dispatch_pending();
    assert!(report.assigned.is_empty());
    assert!(t.poll(&wid("w1"), 1).unwrap().is_empty());
    assert!(t.approve(&job.id, None).is_err());
}

#[test]
fn test_full_lifecycle_updates_worker_stats() {
    let t = TestOrchestrator::new(Default::default());
    t.worker("w1", 10, 2, &[]);
    let job = t.queued(0);

    let report = t.dispatch_pending();
    assert_eq!(report.assigned, vec![(job.id, wid("w1"))]);

    t.send(&job, "w1", JobReport::Started);
    assert_eq!(
        t.send(&job, "w1", JobReport::Started),
        ReportOutcome::Duplicate
    );
    t.send(&job, "w1", JobReport::Progress { progress: 0.25 });
    t.send(&job, "w1", JobReport::Progress { progress: 0.75 });
    assert_eq!(t.get_job(&job.id).unwrap().progress, 0.75);

    t.clock.advance_secs(120);
    t.send(&job, "w1", JobReport::Completed);

    let done = t.get_job(&job.id).unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress, 1.0);
    assert!(done.assigned_worker.is_none());

    let worker = t.get_worker(&wid("w1")).unwrap();
    assert!(worker.current_jobs.is_empty());
    assert_eq!(worker.total_completed, 1);
    assert!((worker.avg_duration_secs - 120.0).abs() < 1e-9);
}

#[test]
fn test_progress_rules() {
    let t = TestOrchestrator::new(Default::default());
    t.worker("w1", 10, 1, &[]);
    let job = t.queued(0);
    t.dispatch_pending();

    let early = t.report(&job.id, &wid("w1"), JobReport::Progress { progress: 0.1 });
    assert!(
        matches!(early, Err(OrchestratorError::InvalidTransition { .. })),
        "Progress before start must be rejected"
    );

    t.send(&job, "w1", JobReport::Started);
    t.send(&job, "w1", JobReport::Progress { progress: 0.5 });

    for bad in [1.5, -0.1, f64::NAN, 0.4] {
        let result = t.report(&job.id, &wid("w1"), JobReport::Progress { progress: bad });
        assert!(matches!(result, Err(OrchestratorError::InvalidProgress { .. })));
    }
    let job = t.get_job(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Running, "Bad progress must not fail the job");
    assert_eq!(job.progress, 0.5);
}

#[test]
fn test_failure_report_releases_slot() {
    let t = TestOrchestrator::new(Default::default());
    t.worker("w1", 10, 1, &[]);
    let job = t.queued(0);
    t.dispatch_pending();

    t.send(
        &job,
        "w1",
        JobReport::Failed {
            reason: "encoder crashed".into(),
        },
    );

    let failed = t.get_job(&job.id).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(
        failed.error,
        Some(JobFailure::Execution("encoder crashed".into()))
    );
    let worker = t.get_worker(&wid("w1")).unwrap();
    assert!(worker.current_jobs.is_empty());
    assert_eq!(worker.total_failed, 1);
    assert_eq!(worker.status, WorkerHealth::Available);
}

#[test]
fn test_terminal_finality_after_cancel() {
    let t = TestOrchestrator::new(Default::default());
    t.worker("w1", 10, 1, &[]);
    let job = t.queued(0);
    t.dispatch_pending();
    t.send(&job, "w1", JobReport::Started);

    let cancelled = t.cancel(&job.id).unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(t.get_worker(&wid("w1")).unwrap().current_jobs.is_empty());

    assert_eq!(t.send(&job, "w1", JobReport::Completed), ReportOutcome::Ignored);
    assert_eq!(
        t.send(
            &job,
            "w1",
            JobReport::Failed {
                reason: "late".into()
            }
        ),
        ReportOutcome::Ignored
    );
    assert_eq!(t.get_job(&job.id).unwrap().status, JobStatus::Cancelled);

    let err = t.cancel(&job.id).unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
}

#[test]
fn test_cancellation_delivered_on_heartbeat() {
    let t = TestOrchestrator::new(Default::default());
    t.worker("w1", 10, 1, &[]);
    let job = t.queued(0);
    t.dispatch_pending();
    t.cancel(&job.id).unwrap();

    let still_running = Heartbeat {
        active_jobs: Some(vec![job.id]),
        ..Default::default()
    };
    let ack = t.heartbeat(&wid("w1"), still_running.clone()).unwrap();
    assert_eq!(ack.cancelled_jobs, vec![job.id]);
    let ack = t.heartbeat(&wid("w1"), still_running).unwrap();
    assert_eq!(
        ack.cancelled_jobs,
        vec![job.id],
        "Cancellation repeats while the worker still runs the job"
    );

    let stopped = Heartbeat {
        active_jobs: Some(Vec::new()),
        ..Default::default()
    };
    assert!(t.heartbeat(&wid("w1"), stopped).unwrap().cancelled_jobs.is_empty());
}

#[test]
fn test_cancel_frees_slot_for_next_job() {
    let t = TestOrchestrator::new(Default::default());
    t.worker("w1", 10, 1, &[]);
    let first = t.queued(0);
    let second = t.queued(0);
    t.dispatch_pending();
    assert_eq!(t.holder(&first), Some(wid("w1")));
    assert_eq!(t.get_job(&second.id).unwrap().status, JobStatus::Queued);

    t.cancel(&first.id).unwrap();
    t.dispatch_pending();
    assert_eq!(t.holder(&second), Some(wid("w1")));
}

#[test]
fn test_stale_report_from_other_worker_is_ignored() {
    let t = TestOrchestrator::new(Default::default());
    t.worker("w1", 10, 1, &[]);
    t.worker("w2", 20, 1, &[]);
    let job = t.queued(0);
    t.dispatch_pending();
    assert_eq!(t.holder(&job), Some(wid("w1")));

    assert_eq!(t.send(&job, "w2", JobReport::Completed), ReportOutcome::Ignored);
    assert_eq!(t.get_job(&job.id).unwrap().status, JobStatus::Assigned);

    let unknown = t.report(&job.id, &wid("ghost"), JobReport::Started);
    assert!(matches!(unknown, Err(OrchestratorError::WorkerNotFound(_))));
}

#[test]
fn test_idempotent_registration() {
    let t = TestOrchestrator::new(Default::default());
    t.register_worker(WorkerRegistration::new("w1", "host-a")).unwrap();
    let updated = t
        .register_worker(WorkerRegistration::new("w1", "host-b"))
        .unwrap();

    assert_eq!(updated.hostname, "host-b");
    assert_eq!(t.list_workers().len(), 1);
    assert_eq!(t.stats().workers.total, 1);
}

#[test]
fn test_registration_validation() {
    let t = TestOrchestrator::new(Default::default());
    let err = t
        .register_worker(WorkerRegistration::new("w1", "host").with_priority(100))
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidPriority(100)));

    t.worker("w1", 10, 1, &[]);
    assert!(matches!(
        t.set_worker_priority(&wid("w1"), 0),
        Err(OrchestratorError::InvalidPriority(0))
    ));
    assert_eq!(t.set_worker_priority(&wid("w1"), 99).unwrap().priority, 99);
    assert!(matches!(
        t.set_worker_priority(&wid("nope"), 5),
        Err(OrchestratorError::WorkerNotFound(_))
    ));
}

#[test]
fn test_disabled_worker_gets_no_work() {
    let t = TestOrchestrator::new(Default::default());
    t.worker("w1", 10, 2, &[]);
    t.set_worker_enabled(&wid("w1"), false).unwrap();
    let job = t.queued(0);

    assert!(t.poll(&wid("w1"), 1).unwrap().is_empty());
    assert_eq!(t.dispatch_pending().waiting, 1);

    t.set_worker_enabled(&wid("w1"), true).unwrap();
    assert_eq!(t.poll(&wid("w1"), 1).unwrap()[0].id, job.id);
}

#[test]
fn test_poll_redelivers_assigned_jobs_and_respects_max() {
    let t = TestOrchestrator::new(Default::default());
    t.worker("w1", 10, 3, &[]);
    let jobs: Vec<_> = (0..3).map(|_| t.queued(0)).collect();

    let report = t.dispatch_pending();
    assert_eq!(report.assigned.len(), 3);

    let first = t.poll(&wid("w1"), 2).unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].id, jobs[0].id);

    let all = t.poll(&wid("w1"), 10).unwrap();
    assert_eq!(all.len(), 3, "Assigned but unstarted jobs are handed out again");

    t.send(&jobs[0], "w1", JobReport::Started);
    let rest = t.poll(&wid("w1"), 10).unwrap();
    assert_eq!(rest.len(), 2);
    assert!(rest.iter().all(|j| j.id != jobs[0].id));
}

#[test]
fn test_queued_jobs_dispatch_by_priority_then_age() {
    let t = TestOrchestrator::new(Default::default());
    let low = t.queued(5);
    let urgent = t.queued(1);
    let low_later = t.queued(5);

    let pending: Vec<Uuid> = t.pending_jobs().into_iter().map(|j| j.id).collect();
    assert_eq!(pending, vec![urgent.id, low.id, low_later.id]);

    t.worker("w1", 10, 1, &[]);
    t.dispatch_pending();
    assert_eq!(t.holder(&urgent), Some(wid("w1")));
}

#[test]
fn test_queue_and_wait_times_out() {
    let mut config = OrchestratorConfig::default().with_fallback(FallbackMode::QueueAndWait);
    config.assignment_timeout_seconds = 60;
    let t = TestOrchestrator::new(config);
    let job = t.queued_with(JobRequest::new(JobKind::Transcode).with_capability("av1"));

    assert_eq!(t.dispatch_pending().waiting, 1);
    t.clock.advance_secs(59);
    assert_eq!(t.dispatch_pending().waiting, 1);
    assert_eq!(t.get_job(&job.id).unwrap().status, JobStatus::Queued);

    t.clock.advance_secs(1);
    let report = t.dispatch_pending();
    assert_eq!(report.failed, vec![(job.id, JobFailure::AssignmentTimeout)]);
    let failed = t.get_job(&job.id).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error, Some(JobFailure::AssignmentTimeout));
}

#[test]
fn test_fail_job_fallback() {
    let t = TestOrchestrator::with_fallback(FallbackMode::FailJob);
    t.worker("w1", 10, 1, &[]);
    let running = t.queued(0);
    let blocked = t.queued(0);

    let report = t.dispatch_pending();
    assert_eq!(report.assigned, vec![(running.id, wid("w1"))]);
    assert_eq!(report.failed, vec![(blocked.id, JobFailure::NoEligibleWorker)]);
    assert_eq!(
        t.get_job(&blocked.id).unwrap().error,
        Some(JobFailure::NoEligibleWorker)
    );
}

#[test]
fn test_capability_mismatch_stays_queued() {
    let t = TestOrchestrator::with_fallback(FallbackMode::FailJob);
    t.worker("w1", 10, 1, &["hevc"]);
    let job = t.queued_with(JobRequest::new(JobKind::Transcode).with_capability("av1"));

    let err = t.check_capabilities(&job).unwrap_err();
    match err {
        OrchestratorError::CapabilityMismatch { missing, .. } => {
            assert_eq!(missing, vec!["av1".to_string()])
        }
        other => panic!("unexpected error: {other}"),
    }

    for _ in 0..3 {
        assert_eq!(t.dispatch_pending().waiting, 1);
    }
    assert_eq!(t.get_job(&job.id).unwrap().status, JobStatus::Queued);

    t.worker("w2", 10, 1, &["av1"]);
    t.dispatch_pending();
    assert_eq!(t.holder(&job), Some(wid("w2")));
}

#[test]
fn test_next_priority_waits_for_capacity() {
    let t = TestOrchestrator::new(Default::default());
    let job = t.queued(0);
    for _ in 0..5 {
        t.clock.advance_secs(3600);
        assert_eq!(t.dispatch_pending().waiting, 1);
    }
    t.worker("w1", 10, 1, &[]);
    assert_eq!(t.poll(&wid("w1"), 1).unwrap()[0].id, job.id);
}

#[test]
fn test_list_jobs_filter_and_stats() {
    let t = TestOrchestrator::new(Default::default());
    t.worker("w1", 10, 1, &[]);
    let held = t.queued(0);
    t.queued(1);
    t.queued_with(JobRequest::new(JobKind::Rip).requiring_approval());
    t.dispatch_pending();

    let by_worker = t.list_jobs(&JobFilter {
        worker: Some(wid("w1")),
        ..Default::default()
    });
    assert_eq!(by_worker.len(), 1);
    assert_eq!(by_worker[0].id, held.id);

    let rips = t.list_jobs(&JobFilter {
        kind: Some(JobKind::Rip),
        ..Default::default()
    });
    assert_eq!(rips.len(), 1);

    let stats = t.stats();
    assert_eq!(stats.total_jobs, 3);
    assert_eq!(stats.by_status[&JobStatus::Assigned], 1);
    assert_eq!(stats.by_status[&JobStatus::Queued], 1);
    assert_eq!(stats.by_status[&JobStatus::AwaitingApproval], 1);
    assert_eq!(stats.by_status[&JobStatus::Completed], 0);
    assert_eq!(stats.by_kind[&JobKind::Transcode], 2);
    assert_eq!(stats.workers.busy, 1);
    assert_eq!(stats.worker_load[0].load, 1.0);
}

#[test]
fn test_purge_finished_jobs() {
    let t = TestOrchestrator::new(Default::default());
    let job = t.queued(0);
    let open = t.queued(0);
    t.cancel(&job.id).unwrap();

    t.clock.advance_secs(10);
    assert_eq!(t.purge_finished(t.clock.now()), 1);
    assert!(matches!(
        t.get_job(&job.id),
        Err(OrchestratorError::JobNotFound(_))
    ));
    assert!(t.get_job(&open.id).is_ok());
}

#[test]
fn test_manual_assignment_to_named_worker() {
    let t = TestOrchestrator::new(Default::default());
    t.worker("preferred", 1, 1, &[]);
    t.worker("chosen", 90, 1, &[]);
    let job = t.queued(0);

    let assigned = t.assign_to(&job.id, &wid("chosen")).unwrap();
    assert_eq!(assigned.status, JobStatus::Assigned);
    assert_eq!(assigned.assigned_worker, Some(wid("chosen")));
    assert!(t
        .get_worker(&wid("chosen"))
        .unwrap()
        .current_jobs
        .contains(&job.id));
    assert!(t.get_worker(&wid("preferred")).unwrap().current_jobs.is_empty());

    assert!(matches!(
        t.assign_to(&job.id, &wid("preferred")),
        Err(OrchestratorError::InvalidTransition { .. })
    ));
}

#[test]
fn test_manual_assignment_respects_eligibility() {
    let t = TestOrchestrator::new(Default::default());
    t.worker("full", 10, 1, &["hevc"]);
    t.worker("plain", 10, 2, &[]);
    let first = t.queued(0);
    t.assign_to(&first.id, &wid("full")).unwrap();

    let job = t.queued_with(JobRequest::new(JobKind::Transcode).with_capability("hevc"));
    for (worker, reason) in [
        ("full", "worker is at capacity"),
        ("plain", "worker lacks a required capability"),
    ] {
        match t.assign_to(&job.id, &wid(worker)) {
            Err(OrchestratorError::WorkerIneligible { reason: got, .. }) => assert_eq!(got, reason),
            other => panic!("expected ineligible worker, got {other:?}"),
        }
    }

    t.set_worker_enabled(&wid("plain"), false).unwrap();
    let simple = t.queued(0);
    assert!(matches!(
        t.assign_to(&simple.id, &wid("plain")),
        Err(OrchestratorError::WorkerIneligible { reason: "worker is disabled", .. })
    ));
    assert!(matches!(
        t.assign_to(&simple.id, &WorkerId::from("ghost")),
        Err(OrchestratorError::WorkerNotFound(_))
    ));
    assert_eq!(t.get_job(&job.id).unwrap().status, JobStatus::Queued);
    assert_eq!(t.get_job(&simple.id).unwrap().status, JobStatus::Queued);
}

#[test]
fn test_available_workers_sorted_by_priority() {
    let t = TestOrchestrator::new(Default::default());
    t.worker("mid", 50, 1, &[]);
    t.worker("best", 2, 1, &[]);
    t.worker("worst", 90, 1, &[]);
    t.worker("off", 1, 1, &[]);
    t.set_worker_enabled(&wid("off"), false).unwrap();

    let ids: Vec<WorkerId> = t.available_workers().into_iter().map(|w| w.id).collect();
    assert_eq!(ids, vec![wid("best"), wid("mid"), wid("worst")]);

    let job = t.queued(0);
    t.dispatch_pending();
    assert_eq!(t.holder(&job), Some(wid("best")));
    let ids: Vec<WorkerId> = t.available_workers().into_iter().map(|w| w.id).collect();
    assert_eq!(ids, vec![wid("mid"), wid("worst")], "Full workers are not available");
}

#[test]
fn test_oversized_timeouts_are_rejected() {
    let config = OrchestratorConfig {
        heartbeat_timeout_seconds: 10_000_000_000_000_000,
        ..Default::default()
    };
    assert!(matches!(
        Orchestrator::new(config),
        Err(OrchestratorError::InvalidConfig(_))
    ));

    let config = OrchestratorConfig {
        assignment_timeout_seconds: u64::MAX,
        ..Default::default()
    };
    assert!(matches!(
        Orchestrator::new(config),
        Err(OrchestratorError::InvalidConfig(_))
    ));
}

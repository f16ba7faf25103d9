
use std::collections::HashSet;
use std::sync::Arc;

use ripq::config::StrategyKind;
use ripq::scheduler::{Heartbeat, JobReport, JobStatus, Orchestrator};
use test_harness::{wid, TestOrchestrator};

/// Every held job names exactly one worker, that worker lists it, and no
/// worker is over capacity.
fn assert_assignment_invariants(orchestrator: &Orchestrator) {
    let workers = orchestrator.list_workers();
    let mut listed = HashSet::new();
    for worker in &workers {
        assert!(
            worker.current_jobs.len() <= worker.capabilities.max_concurrent,
            "Worker {} over capacity: {} > {}",
            worker.id,
            worker.current_jobs.len(),
            worker.capabilities.max_concurrent
        );
        for job_id in &worker.current_jobs {
            assert!(listed.insert(*job_id), "Job {job_id} held by two workers");
        }
    }

    for job in orchestrator.list_jobs(&Default::default()) {
        match job.status {
            JobStatus::Assigned | JobStatus::Running => {
                let holder = job.assigned_worker.as_ref().expect("held job has a worker");
                let worker = workers
                    .iter()
                    .find(|w| &w.id == holder)
                    .expect("holder is registered");
                assert!(worker.current_jobs.contains(&job.id));
            }
            _ => {
                assert!(job.assigned_worker.is_none());
                assert!(!listed.contains(&job.id));
            }
        }
    }
}

#[test]
fn test_concurrent_polls_never_exceed_capacity() {
    let t = TestOrchestrator::with_strategy(StrategyKind::LoadBalance);
    t.worker("only", 10, 3, &[]);
    for _ in 0..50 {
        t.queued(0);
    }

    let orchestrator = t.orchestrator.clone();
    std::thread::scope(|scope| {
        for i in 0..8 {
            let orchestrator = orchestrator.clone();
            scope.spawn(move || {
                for _ in 0..20 {
                    if i % 2 == 0 {
                        orchestrator.poll(&wid("only"), 5).unwrap();
                    } else {
                        orchestrator.dispatch_pending();
                    }
                }
            });
        }
    });

    let worker = t.get_worker(&wid("only")).unwrap();
    assert_eq!(worker.current_jobs.len(), 3);
    assert_eq!(t.stats().by_status[&JobStatus::Assigned], 3);
    assert_assignment_invariants(&t);
}

#[test]
fn test_concurrent_workers_never_share_a_job() {
    let t = TestOrchestrator::with_strategy(StrategyKind::LoadBalance);
    let ids: Vec<String> = (0..6).map(|i| format!("w{i}")).collect();
    for id in &ids {
        t.worker(id, 50, 2, &[]);
    }
    for _ in 0..40 {
        t.queued(0);
    }

    let orchestrator: Arc<Orchestrator> = t.orchestrator.clone();
    std::thread::scope(|scope| {
        for id in &ids {
            let orchestrator = orchestrator.clone();
            scope.spawn(move || {
                let me = wid(id);
                for _ in 0..25 {
                    let jobs = orchestrator.poll(&me, 2).unwrap();
                    for job in jobs {
                        if job.status != JobStatus::Assigned {
                            continue;
                        }
                        orchestrator.report(&job.id, &me, JobReport::Started).unwrap();
                        orchestrator
                            .report(&job.id, &me, JobReport::Completed)
                            .unwrap();
                    }
                }
            });
        }
        let orchestrator = orchestrator.clone();
        scope.spawn(move || {
            for _ in 0..25 {
                orchestrator.dispatch_pending();
            }
        });
    });

    assert_assignment_invariants(&t);
    let stats = t.stats();
    let completed = stats.by_status[&JobStatus::Completed];
    let assigned = stats.by_status[&JobStatus::Assigned];
    let queued = stats.by_status[&JobStatus::Queued];
    assert_eq!(completed + assigned + queued, 40);
    assert_eq!(
        stats.workers.total_jobs_completed as usize, completed,
        "Each completion is counted exactly once"
    );
}

#[test]
fn test_cancel_racing_completion_stays_terminal() {
    let t = TestOrchestrator::new(Default::default());
    t.worker("w1", 10, 16, &[]);
    let jobs: Vec<_> = (0..16).map(|_| t.queued(0)).collect();
    t.dispatch_pending();
    for job in &jobs {
        t.send(job, "w1", JobReport::Started);
    }

    let orchestrator = t.orchestrator.clone();
    std::thread::scope(|scope| {
        let canceller = orchestrator.clone();
        let ids: Vec<_> = jobs.iter().map(|j| j.id).collect();
        let completer_ids = ids.clone();
        scope.spawn(move || {
            for id in &ids {
                let _ = canceller.cancel(id);
            }
        });
        let completer = orchestrator.clone();
        scope.spawn(move || {
            for id in &completer_ids {
                completer.report(id, &wid("w1"), JobReport::Completed).unwrap();
            }
        });
        let heartbeats = orchestrator.clone();
        scope.spawn(move || {
            for _ in 0..16 {
                heartbeats.heartbeat(&wid("w1"), Heartbeat::default()).unwrap();
            }
        });
    });

    for job in &jobs {
        let status = t.get_job(&job.id).unwrap().status;
        assert!(
            matches!(status, JobStatus::Cancelled | JobStatus::Completed),
            "Job {} ended as {status}",
            job.id
        );
    }
    assert!(t.get_worker(&wid("w1")).unwrap().current_jobs.is_empty());
    assert_assignment_invariants(&t);
}

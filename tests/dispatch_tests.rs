//! End-to-end scheduling scenarios against scripted workers.
//!
//! These tests validate that:
//! - tasks of a failing worker end up on a healthy one and the job completes
//! - a successful parameter is never counted twice
//! - jobs that decompose into nothing complete immediately
//! - a single worker eventually serves every queued job
//! - bounded retries abandon a job instead of hanging forever


use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bdws_supervisor::error::SupervisorError;
use bdws_supervisor::scheduler::{
    DispatchOutcome, Job, Payload, Registration, Scheduler, Task,
};
use test_harness::{dispatch_config, ScriptedClient, TestSupervisor};

const DEADLINE: Duration = Duration::from_secs(10);

fn payload() -> Payload {
    Payload {
        file_name: "brute".to_string(),
        extension: "py".to_string(),
        code: b"print('hi')".to_vec(),
        args: vec![],
    }
}

// ---------------------------------------------------------------------------
// Dispatcher in isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_dispatch_once_records_result() {
    let scheduler = Scheduler::new(dispatch_config(10, 5, 1));
    let client = ScriptedClient::new();
    let dispatcher = scheduler.dispatcher(client.clone());

    scheduler
        .pool()
        .register(Registration::new("w1"))
        .await
        .unwrap();
    let job_id = scheduler
        .submit(Job::parameterized(payload(), 42, 42))
        .await
        .unwrap();
    let task = scheduler.queue().recv().await.unwrap();

    assert_eq!(dispatcher.dispatch_once(task).await, DispatchOutcome::Completed);
    let results = scheduler.wait(job_id).await.unwrap();
    assert_eq!(results.results, vec!["w1:42"]);
    assert_eq!(scheduler.pool().size().await, 1, "worker released after success");
}

#[tokio::test]
async fn test_dispatch_failure_requeues_with_bumped_attempts() {
    let scheduler = Scheduler::new(dispatch_config(10, 5, 1));
    let client = ScriptedClient::new();
    client.always_fail("dead");
    let dispatcher = scheduler.dispatcher(client.clone());

    scheduler
        .pool()
        .register(Registration::new("dead"))
        .await
        .unwrap();
    scheduler
        .submit(Job::parameterized(payload(), 1, 1))
        .await
        .unwrap();
    let task = scheduler.queue().recv().await.unwrap();
    assert_eq!(task.attempts, 0);

    assert_eq!(
        dispatcher.dispatch_once(task).await,
        DispatchOutcome::Requeued { attempts: 1 }
    );
    let requeued: Task = scheduler.queue().recv().await.unwrap();
    assert_eq!(requeued.attempts, 1);
    assert_eq!(requeued.parameter, 1);
}

#[tokio::test]
async fn test_task_of_abandoned_job_is_skipped() {
    let scheduler = Scheduler::new(dispatch_config(10, 5, 1));
    let client = ScriptedClient::new();
    let dispatcher = scheduler.dispatcher(client.clone());

    let job_id = scheduler
        .submit(Job::parameterized(payload(), 1, 2))
        .await
        .unwrap();
    scheduler.ledger().abandon(job_id, "operator").await;

    let task = scheduler.queue().recv().await.unwrap();
    assert_eq!(dispatcher.dispatch_once(task).await, DispatchOutcome::Skipped);
    assert!(client.calls().is_empty(), "no worker should be contacted");
}

#[tokio::test]
async fn test_unresponsive_worker_times_out_and_cools_down() {
    let config = dispatch_config(200, 5, 1).with_request_timeout(Duration::from_millis(50));
    let scheduler = Scheduler::new(config);
    let client = ScriptedClient::new();
    client.set_delay(Duration::from_secs(5));
    let dispatcher = scheduler.dispatcher(client.clone());

    scheduler
        .pool()
        .register(Registration::new("stuck"))
        .await
        .unwrap();
    scheduler
        .submit(Job::parameterized(payload(), 3, 3))
        .await
        .unwrap();
    let task = scheduler.queue().recv().await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(1), dispatcher.dispatch_once(task))
        .await
        .expect("dispatch must give up at the request timeout");
    assert_eq!(outcome, DispatchOutcome::Requeued { attempts: 1 });
    assert_eq!(scheduler.queue().len(), 1);
    assert!(client.calls().is_empty(), "the call never answered");

    assert!(
        scheduler.pool().try_acquire().await.is_none(),
        "timed-out worker must sit out the cooldown"
    );
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(scheduler.pool().try_acquire().await.unwrap().hostname, "stuck");
}

// ---------------------------------------------------------------------------
// Full supervisor scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_failing_worker_tasks_move_to_healthy_worker() {
    let sup = TestSupervisor::start(dispatch_config(50, 0, 4));
    sup.register("broken", 16).await;
    sup.register("healthy", 2).await;
    sup.client.always_fail("broken");

    let results = tokio::time::timeout(
        DEADLINE,
        sup.intake.submit_sync(Job::parameterized(payload(), 1, 6)),
    )
    .await
    .expect("job should complete")
    .unwrap();

    assert_eq!(results.results.len(), 6);
    assert!(results.results.iter().all(|r| r.starts_with("healthy:")));
    assert!(!sup.client.failures().is_empty(), "broken worker was tried first");
}

#[tokio::test]
async fn test_range_with_first_attempt_failure() {
    let sup = TestSupervisor::start(dispatch_config(50, 0, 4));
    sup.register("flaky", 8).await;
    sup.register("steady", 4).await;
    sup.client.fail_next("flaky", 1);

    let results = tokio::time::timeout(
        DEADLINE,
        sup.intake.submit_sync(Job::parameterized(payload(), 1, 3)),
    )
    .await
    .expect("job should complete")
    .unwrap();

    assert_eq!(results.results.len(), 3);

    let successes = sup.client.successes();
    let params: Vec<i64> = successes.iter().filter_map(|c| c.parameter).collect();
    let unique: HashSet<i64> = params.iter().copied().collect();
    assert_eq!(params.len(), 3, "each parameter succeeds exactly once");
    assert_eq!(unique, HashSet::from([1, 2, 3]));
    assert_eq!(sup.client.failures().len(), 1);

    // Results are ordered by parameter regardless of completion order.
    let ordered: Vec<String> = results
        .results
        .iter()
        .map(|r| r.rsplit(':').next().unwrap().to_string())
        .collect();
    assert_eq!(ordered, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_replicated_job_without_workers_completes_empty() {
    let sup = TestSupervisor::start(dispatch_config(50, 0, 2));

    let results = tokio::time::timeout(
        Duration::from_secs(1),
        sup.intake.submit_sync(Job::replicated(payload(), 4)),
    )
    .await
    .expect("empty job must not block")
    .unwrap();

    assert!(results.results.is_empty());
    assert!(sup.client.calls().is_empty());
    assert_eq!(sup.scheduler.ledger().in_flight().await, 0);
}

#[tokio::test]
async fn test_replicated_job_runs_once_per_idle_worker() {
    let sup = TestSupervisor::start(dispatch_config(50, 0, 4));
    for host in ["w1", "w2", "w3"] {
        sup.register(host, 4).await;
    }

    let results = tokio::time::timeout(
        DEADLINE,
        sup.intake.submit_sync(Job::replicated(payload(), 0)),
    )
    .await
    .expect("job should complete")
    .unwrap();

    assert_eq!(results.results.len(), 3);
}

#[tokio::test]
async fn test_two_jobs_share_one_worker() {
    let sup = TestSupervisor::start(dispatch_config(50, 0, 4));
    sup.register("only", 4).await;
    sup.client.set_delay(Duration::from_millis(5));

    let first = {
        let intake = sup.intake.clone();
        tokio::spawn(async move { intake.submit_sync(Job::parameterized(payload(), 1, 5)).await })
    };
    let second = {
        let intake = sup.intake.clone();
        tokio::spawn(async move { intake.submit_sync(Job::parameterized(payload(), 10, 12)).await })
    };

    let first = tokio::time::timeout(DEADLINE, first)
        .await
        .expect("first job starved")
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(DEADLINE, second)
        .await
        .expect("second job starved")
        .unwrap()
        .unwrap();

    assert_eq!(first.results.len(), 5);
    assert_eq!(second.results.len(), 3);
    assert!(sup.client.calls().iter().all(|c| c.hostname == "only"));
}

#[tokio::test]
async fn test_many_jobs_in_flight() {
    let sup = TestSupervisor::start(dispatch_config(20, 0, 8));
    for i in 0..4 {
        sup.register(&format!("w{i}"), 4).await;
    }

    let mut ids = Vec::new();
    for i in 0..10 {
        let job = Job::parameterized(payload(), i * 10, i * 10 + 9);
        ids.push(sup.intake.submit_async(job).await.unwrap());
    }

    for id in ids {
        let results = tokio::time::timeout(DEADLINE, sup.scheduler.wait(id))
            .await
            .expect("job should complete")
            .unwrap();
        assert_eq!(results.job_id, id);
        assert_eq!(results.results.len(), 10);
    }
    assert_eq!(sup.client.successes().len(), 100);
}

#[tokio::test]
async fn test_bounded_retry_abandons_job() {
    let sup = TestSupervisor::start(dispatch_config(10, 3, 2));
    sup.register("dead", 4).await;
    sup.client.always_fail("dead");

    let err = tokio::time::timeout(
        DEADLINE,
        sup.intake.submit_sync(Job::parameterized(payload(), 1, 2)),
    )
    .await
    .expect("abandoned job must not hang")
    .unwrap_err();

    assert!(matches!(err, SupervisorError::JobAbandoned { .. }));
    assert_eq!(sup.scheduler.ledger().in_flight().await, 0);
}

#[tokio::test]
async fn test_unbounded_retry_completes_once_healthy_worker_joins() {
    let sup = TestSupervisor::start(dispatch_config(10, 0, 2));
    sup.register("dead", 4).await;
    sup.client.always_fail("dead");

    let job = {
        let intake = sup.intake.clone();
        tokio::spawn(async move { intake.submit_sync(Job::parameterized(payload(), 1, 2)).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!job.is_finished());
    assert!(sup.client.failures().len() > 2, "tasks keep being retried");

    sup.register("alive", 1).await;
    let results = tokio::time::timeout(DEADLINE, job)
        .await
        .expect("job should complete")
        .unwrap()
        .unwrap();
    assert_eq!(results.results, vec!["alive:1", "alive:2"]);
}

#[tokio::test]
async fn test_invalid_submission_is_rejected_at_intake() {
    let sup = TestSupervisor::start(dispatch_config(10, 0, 1));
    let mut job = Job::parameterized(payload(), 1, 3);
    job.repeat = 5;

    let err = sup.intake.submit_async(job).await.unwrap_err();
    assert!(matches!(err, SupervisorError::InvalidJob(_)));
    assert!(sup.scheduler.queue().is_empty());
}

#[tokio::test]
async fn test_full_i64_range_is_rejected_and_intake_survives() {
    let sup = TestSupervisor::start(dispatch_config(10, 0, 1));
    sup.register("w1", 1).await;

    let err = sup
        .intake
        .submit_async(Job::parameterized(payload(), i64::MIN, i64::MAX))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::InvalidJob(_)));
    assert!(sup.scheduler.queue().is_empty());

    let results = tokio::time::timeout(
        DEADLINE,
        sup.intake.submit_sync(Job::replicated(payload(), 1)),
    )
    .await
    .expect("job should complete")
    .expect("intake must keep accepting jobs");
    assert_eq!(results.results, vec!["w1"]);
}

#[tokio::test]
async fn test_uncollected_results_are_dropped_after_retention() {
    let config = dispatch_config(10, 0, 4).with_result_retention(Duration::from_millis(50));
    let sup = TestSupervisor::start(config);
    sup.register("w1", 1).await;

    for i in 0..50 {
        sup.intake
            .submit_async(Job::parameterized(payload(), i, i))
            .await
            .unwrap();
    }

    tokio::time::timeout(DEADLINE, async {
        while sup.client.successes().len() < 50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("all jobs should run");

    tokio::time::sleep(Duration::from_millis(300)).await;
    let status = sup.scheduler.status().await;
    assert_eq!(status.jobs_in_flight, 0);
    assert_eq!(status.pending_tasks, 0);
}

#[tokio::test]
async fn test_full_ledger_rejects_submission() {
    let config = dispatch_config(10, 0, 1).with_max_jobs(2);
    let sup = TestSupervisor::start(config);

    // No workers: parameterized jobs stay open.
    sup.intake
        .submit_async(Job::parameterized(payload(), 1, 1))
        .await
        .unwrap();
    sup.intake
        .submit_async(Job::parameterized(payload(), 1, 1))
        .await
        .unwrap();
    let err = sup
        .intake
        .submit_async(Job::parameterized(payload(), 1, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::LedgerFull(2)));
}

#[tokio::test]
async fn test_pool_is_shared_not_global() {
    let a = Scheduler::new(dispatch_config(10, 0, 1));
    let b = Scheduler::new(dispatch_config(10, 0, 1));
    a.pool().register(Registration::new("w1")).await.unwrap();

    assert_eq!(a.pool().size().await, 1);
    assert_eq!(b.pool().size().await, 0);
    assert!(Arc::ptr_eq(a.pool(), a.clone().pool()));
}

mod mocks;

use chrono::{Duration as ChronoDuration, Utc};
use digest_reels::progress::{ItemStatus, Job, JobError, ResumableRunner, RunStop};
use mocks::clock::ManualClock;
use mocks::executor::ScriptedExecutor;
use mocks::{fast_policy, open_store};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn jobs(n: usize, cost: u64) -> Vec<Job<String>> {
    (0..n)
        .map(|i| Job::new(format!("item-{i}"), cost, format!("payload-{i}")))
        .collect()
}

#[tokio::test]
async fn test_quota_stops_run_and_resumes_after_reset() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), 6);
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let executor = ScriptedExecutor::default();
    let calls = executor.calls.clone();
    let input = jobs(5, 2);

    let runner = ResumableRunner::new(&store, executor, fast_policy(3)).with_clock(clock.clone());
    let first = runner.run(&input).await.unwrap();
    assert!(matches!(first.stop, RunStop::QuotaExhausted { .. }));
    assert_eq!(first.done, 3);
    assert_eq!(first.remaining, 2);
    assert_eq!(first.quota_used, 6);
    assert_eq!(calls.lock().unwrap().len(), 3);
    assert_eq!(store.status_of("item-3"), None);

    // Same day: still nothing to spend.
    let again = runner.run(&input).await.unwrap();
    assert!(matches!(again.stop, RunStop::QuotaExhausted { .. }));
    assert_eq!(again.attempted, 0);
    assert_eq!(again.skipped, 3);

    clock.advance(ChronoDuration::days(2));
    let second = runner.run(&input).await.unwrap();
    assert_eq!(second.stop, RunStop::Completed);
    assert_eq!(second.done, 2);
    assert_eq!(second.skipped, 3);
    assert_eq!(second.totals.done, 5);
    assert_eq!(second.quota_used, 4);
    assert_eq!(
        *calls.lock().unwrap(),
        vec!["item-0", "item-1", "item-2", "item-3", "item-4"]
    );
}

#[tokio::test]
async fn test_completed_input_is_idempotent_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let input = jobs(3, 1);
    {
        let store = open_store(dir.path(), 100);
        let runner = ResumableRunner::new(&store, ScriptedExecutor::default(), fast_policy(3));
        assert!(runner.run(&input).await.unwrap().is_complete());
    }

    let store = open_store(dir.path(), 100);
    assert_eq!(store.output_of("item-1").as_deref(), Some("out:payload-1"));
    let executor = ScriptedExecutor::default();
    let calls = executor.calls.clone();
    let runner = ResumableRunner::new(&store, executor, fast_policy(3));
    let summary = runner.run(&input).await.unwrap();

    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.attempted, 0);
    assert_eq!(summary.quota_used, 3);
}

#[tokio::test]
async fn test_transient_errors_are_retried_then_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), 100);
    let executor = ScriptedExecutor::default().fail(
        "item-0",
        vec![
            JobError::transient("503"),
            JobError::Transient {
                reason: "429".into(),
                retry_after: Some(Duration::from_millis(1)),
            },
        ],
    );
    let recorder = executor.clone();
    let runner = ResumableRunner::new(&store, executor, fast_policy(4));

    let summary = runner.run(&jobs(2, 5)).await.unwrap();
    assert_eq!(summary.stop, RunStop::Completed);
    assert_eq!(summary.done, 2);
    assert_eq!(recorder.calls_for("item-0"), 3);
    // Every attempt reserves its own quota.
    assert_eq!(summary.quota_used, 20);
    let item = store.item("item-0").unwrap();
    assert_eq!(item.attempts, 3);
    assert_eq!(item.last_error, None);
}

#[tokio::test]
async fn test_retry_ceiling_marks_item_failed_and_run_continues() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), 100);
    let executor = ScriptedExecutor::default().fail(
        "item-1",
        vec![JobError::transient("503"); 5],
    );
    let recorder = executor.clone();
    let runner = ResumableRunner::new(&store, executor, fast_policy(3));

    let summary = runner.run(&jobs(3, 1)).await.unwrap();
    assert_eq!(summary.stop, RunStop::Completed);
    assert_eq!(recorder.calls_for("item-1"), 3);
    assert_eq!(summary.done, 2);
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].reason.contains("gave up after 3 attempts"));
    assert_eq!(store.status_of("item-1"), Some(ItemStatus::Failed));
    assert_eq!(store.status_of("item-2"), Some(ItemStatus::Done));
    let item = store.item("item-1").unwrap();
    assert_eq!(item.attempts, 3);
    assert!(item.last_error.unwrap().contains("503"));
    // Every attempt reserved quota, the failing item included.
    assert_eq!(summary.quota_used, 5);
}

#[tokio::test]
async fn test_provider_quota_error_stops_run_and_keeps_item_pending() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), 10_000);
    let executor = ScriptedExecutor::default().fail(
        "item-1",
        vec![JobError::Exhausted("youtube quota exceeded (quotaExceeded)".into())],
    );
    let calls = executor.calls.clone();
    let runner = ResumableRunner::new(&store, executor, fast_policy(4));

    let summary = runner.run(&jobs(4, 50)).await.unwrap();
    assert!(matches!(summary.stop, RunStop::QuotaExhausted { .. }));
    assert_eq!(summary.done, 1);
    assert!(summary.failed.is_empty());
    assert_eq!(summary.remaining, 3);
    assert_eq!(store.status_of("item-1"), Some(ItemStatus::Pending));
    assert_eq!(store.quota().remaining(), 0);
    assert_eq!(*calls.lock().unwrap(), vec!["item-0", "item-1"]);

    // Same period: the ledger refuses before any call is made.
    let again = runner.run(&jobs(4, 50)).await.unwrap();
    assert!(matches!(again.stop, RunStop::QuotaExhausted { .. }));
    assert_eq!(again.attempted, 0);
    assert_eq!(calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_permanent_error_is_not_retried_unless_asked() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), 100);
    let input = jobs(2, 1);
    let executor = ScriptedExecutor::default().fail("item-0", vec![JobError::permanent("bad input")]);
    let recorder = executor.clone();
    let runner = ResumableRunner::new(&store, executor, fast_policy(4));

    let summary = runner.run(&input).await.unwrap();
    assert_eq!(recorder.calls_for("item-0"), 1);
    assert_eq!(summary.failed[0].reason, "bad input");
    assert_eq!(summary.totals.failed, 1);

    // A plain rerun leaves the failure alone.
    let rerun = runner.run(&input).await.unwrap();
    assert_eq!(rerun.attempted, 0);
    assert_eq!(recorder.calls_for("item-0"), 1);

    // The scripted error was consumed, so the retry succeeds.
    let runner = ResumableRunner::new(&store, recorder.clone(), fast_policy(4)).retry_failed(true);
    let retried = runner.run(&input).await.unwrap();
    assert_eq!(retried.done, 1);
    assert_eq!(retried.totals.done, 2);
    assert_eq!(recorder.calls_for("item-0"), 2);
}

#[tokio::test]
async fn test_cancellation_stops_between_items() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), 100);
    let cancel = CancellationToken::new();
    let executor = ScriptedExecutor::default().cancel_after(2, cancel.clone());
    let calls = executor.calls.clone();
    let runner = ResumableRunner::new(&store, executor, fast_policy(3)).with_cancellation(cancel);

    let summary = runner.run(&jobs(4, 1)).await.unwrap();
    assert_eq!(summary.stop, RunStop::Cancelled);
    assert_eq!(summary.done, 2);
    assert_eq!(summary.remaining, 2);
    assert_eq!(calls.lock().unwrap().len(), 2);
    assert_eq!(store.status_of("item-1"), Some(ItemStatus::Done));
    assert_eq!(store.status_of("item-2"), None);
}

#[tokio::test]
async fn test_duplicate_keys_are_rejected_before_any_call() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), 100);
    let executor = ScriptedExecutor::default();
    let calls = executor.calls.clone();
    let runner = ResumableRunner::new(&store, executor, fast_policy(3));

    let mut input = jobs(2, 1);
    input.push(Job::new("item-0", 1, "again".to_string()));
    let summary = runner.run(&input).await.unwrap();

    assert!(matches!(summary.stop, RunStop::RejectedInput(_)));
    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(summary.quota_used, 0);
}

#[tokio::test]
async fn test_zero_cost_jobs_run_without_quota() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), 1);
    let runner = ResumableRunner::new(&store, ScriptedExecutor::default(), fast_policy(3));

    let summary = runner.run(&jobs(4, 0)).await.unwrap();
    assert_eq!(summary.done, 4);
    assert_eq!(summary.quota_used, 0);
}

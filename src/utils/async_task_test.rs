use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::async_task::sleep_or_cancelled;
use super::async_task::spawn_task;
use crate::Error;

#[tokio::test]
async fn spawn_task_runs_to_completion() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let handle = spawn_task("counter", async move {
        counter_clone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    handle.await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn spawn_task_swallows_task_errors() {
    let handle = spawn_task("failing", async { Err(Error::Fatal("boom".to_string())) });

    // The error is logged, the join handle still completes cleanly
    assert!(handle.await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn sleep_or_cancelled_completes_without_cancellation() {
    let stop = CancellationToken::new();

    assert!(sleep_or_cancelled(Duration::from_secs(5), &stop).await);
}

#[tokio::test(start_paused = true)]
async fn sleep_or_cancelled_returns_early_on_cancel() {
    let stop = CancellationToken::new();
    let stop_clone = stop.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        stop_clone.cancel();
    });

    assert!(!sleep_or_cancelled(Duration::from_secs(3600), &stop).await);
}

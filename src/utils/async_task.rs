use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::trace;

use crate::Result;

/// Spawns a named background task, logging the error it finishes with.
pub(crate) fn spawn_task<Fut>(
    name: &str,
    task: Fut,
) -> JoinHandle<()>
where
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    tokio::spawn(async move {
        match task.await {
            Ok(()) => trace!("spawned task {name} finished"),
            Err(e) => error!("spawned task {name} stopped with error: {:?}", e),
        }
    })
}

/// Sleeps for `delay` unless `stop` fires first.
///
/// Returns `false` when the sleep was interrupted by cancellation.
pub(crate) async fn sleep_or_cancelled(
    delay: Duration,
    stop: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = stop.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

use std::future::Future;
use std::time::Duration;

use drover_core::AppResult;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::warn;

/// Runs `action` every `period` until cancelled; failures are logged and the loop continues.
pub(super) fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancellation: CancellationToken,
    tracker: &TaskTracker,
    action: F,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<()>> + Send + 'static,
{
    tracker.spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancellation.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(error) = action().await {
                        warn!(action = name, error = %error, "periodic action failed");
                    }
                }
            }
        }
    });
}

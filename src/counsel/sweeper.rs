use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::counsel::Engine;

/// Periodically expires help requests that outlived their TTL and drops
/// idle locks and live channels. Stops when `cancel` fires.
pub fn spawn_request_sweeper(
    engine: Engine,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match engine.broadcaster.sweep_expired(Utc::now()).await {
                        Ok(0) => {}
                        Ok(expired) => tracing::info!(expired, "expired stale help requests"),
                        Err(e) => tracing::warn!(error = %e, "request sweep failed"),
                    }
                    let pruned = engine.prune_locks();
                    if pruned > 0 {
                        tracing::debug!(pruned, "pruned idle locks");
                    }
                    let idle = engine.hub.prune();
                    if idle > 0 {
                        tracing::debug!(idle, "dropped idle live channels");
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::info!("request sweeper shutting down");
                    break;
                }
            }
        }
    })
}

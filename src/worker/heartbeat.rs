use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::client::CoordinatorLink;

/// Periodically reports this worker's in-flight count to the coordinator.
pub struct HeartbeatSender {
    initial_delay: Duration,
    interval: Duration,
}

impl HeartbeatSender {
    pub fn new(initial_delay_ms: u64, interval_ms: u64) -> Self {
        Self {
            initial_delay: Duration::from_millis(initial_delay_ms),
            interval: Duration::from_millis(interval_ms.max(1)),
        }
    }

    /// Send heartbeats until `shutdown` is cancelled. A failed send is logged
    /// and the next tick proceeds as normal.
    pub async fn run<L>(
        &self,
        link: Arc<dyn CoordinatorLink>,
        worker_id: String,
        load: L,
        shutdown: CancellationToken,
    ) where
        L: Fn() -> usize + Send,
    {
        let mut ticker = interval_at(Instant::now() + self.initial_delay, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let active_tasks = load();
                    if let Err(e) = link.heartbeat(&worker_id, active_tasks).await {
                        tracing::warn!(worker_id = %worker_id, error = %e, "Failed to send heartbeat");
                    } else {
                        tracing::debug!(worker_id = %worker_id, active_tasks, "Heartbeat sent");
                    }
                }
            }
        }
        tracing::debug!(worker_id = %worker_id, "Heartbeat stopped");
    }
}

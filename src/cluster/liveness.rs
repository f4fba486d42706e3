use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cluster::hub::Hub;
use crate::config::RegistryConfig;

/// Periodic liveness sweep: evict stale workers, then probe the rest with
/// `HeartbeatCheck`.
pub struct LivenessSweep {
    hub: Arc<Hub>,
    stale_threshold: Duration,
    interval: Duration,
}

impl LivenessSweep {
    pub fn new(hub: Arc<Hub>, config: &RegistryConfig) -> Self {
        Self {
            hub,
            stale_threshold: config.stale_threshold,
            interval: config.sweep_interval,
        }
    }

    /// One sweep. Returns the evicted worker ids.
    pub async fn sweep_once(&self) -> Vec<String> {
        let evicted = self.hub.registry().evict_stale(self.stale_threshold).await;
        let probed = self.hub.broadcast_heartbeat_check().await;
        tracing::debug!(evicted = evicted.len(), probed, "Liveness sweep complete");
        evicted
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Liveness sweep stopped");
                    break;
                }
                _ = interval.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }
}

//! Background sweep that takes silent runners offline.

use crate::config::SchedulerConfig;
use crate::queue::StageQueue;
use crate::scheduler::{DispatchCoordinator, ReapedRunner};
use oxide_core::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Periodically marks runners offline once they miss their heartbeat window.
pub struct HeartbeatReaper<Q> {
    coordinator: Arc<DispatchCoordinator<Q>>,
    interval: Duration,
    threshold: Duration,
    requeue_orphans: bool,
}

impl<Q: StageQueue + 'static> HeartbeatReaper<Q> {
    pub fn new(coordinator: Arc<DispatchCoordinator<Q>>, config: &SchedulerConfig) -> Self {
        Self {
            coordinator,
            interval: config.reap_interval(),
            threshold: config.heartbeat_timeout(),
            requeue_orphans: config.requeue_orphans,
        }
    }

    /// Run the sweep loop until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.interval.as_secs(),
            threshold_secs = self.threshold.as_secs(),
            requeue_orphans = self.requeue_orphans,
            "Starting heartbeat reaper"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Heartbeat reaper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Heartbeat sweep failed");
                    }
                }
            }
        }
    }

    /// Spawn the loop, stopping on `shutdown` or when the coordinator shuts down.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        let stop = self.coordinator.shutdown_token().child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => stop.cancel(),
                _ = self.run(stop.clone()) => {}
            }
        })
    }

    /// One pass: reap stale runners and, if configured, requeue what they held.
    pub async fn sweep(&self) -> Result<Vec<ReapedRunner>> {
        let reaped = self.coordinator.reap_stale(self.threshold).await?;
        if !self.requeue_orphans {
            return Ok(reaped);
        }

        for orphan in reaped.iter().filter_map(|r| r.orphaned_stage.as_ref()) {
            // The stage may have been completed since it was orphaned.
            if let Err(e) = self.coordinator.requeue(orphan).await {
                warn!(stage_id = %orphan, error = %e, "Could not requeue orphaned stage");
            }
        }
        Ok(reaped)
    }
}

//! Test context wrapping an in-process scheduler.

use oxide_core::events::SchedulerEvent;
use oxide_core::ports::Scheduler;
use oxide_core::{CallContext, Filter, RunnerId, Stage};
use oxide_scheduler::{BroadcastEventSink, DispatchCoordinator, SchedulerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// A scheduler plus a subscription to everything it publishes.
///
/// Drop this to stop receiving events; the scheduler is shut down on drop
/// so stray pollers do not outlive the test.
pub struct TestContext {
    pub scheduler: Arc<DispatchCoordinator>,
    pub events: broadcast::Receiver<SchedulerEvent>,
}

impl TestContext {
    /// Create a new test context with a short default poll timeout.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default().with_poll_timeout(Duration::from_secs(5)))
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        crate::init_test_logging();

        let sink = BroadcastEventSink::new(config.event_buffer);
        let events = sink.subscribe();
        let scheduler = Arc::new(DispatchCoordinator::new(config).with_event_sink(Arc::new(sink)));

        Self { scheduler, events }
    }

    /// The scheduler seen through its port.
    pub fn port(&self) -> Arc<dyn Scheduler> {
        self.scheduler.clone()
    }

    pub async fn schedule(&self, stage: Stage) -> anyhow::Result<()> {
        self.scheduler.schedule(&CallContext::new(), stage).await?;
        Ok(())
    }

    /// Start a `request` in the background.
    pub fn spawn_request(
        &self,
        runner: &str,
        filter: Filter,
        ctx: CallContext,
    ) -> JoinHandle<oxide_core::Result<Stage>> {
        let scheduler = self.scheduler.clone();
        let runner = RunnerId::new(runner);
        tokio::spawn(async move { scheduler.request(&ctx, &runner, &filter).await })
    }

    /// Receive events until one satisfies `predicate`.
    pub async fn next_event_matching<P>(
        &mut self,
        timeout: Duration,
        mut predicate: P,
    ) -> Option<SchedulerEvent>
    where
        P: FnMut(&SchedulerEvent) -> bool,
    {
        tokio::time::timeout(timeout, async {
            loop {
                match self.events.recv().await {
                    Ok(event) if predicate(&event) => return Some(event),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}

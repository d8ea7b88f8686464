//! Event sink implementations.

use async_trait::async_trait;
use oxide_core::Result;
use oxide_core::events::SchedulerEvent;
use oxide_core::ports::EventSink;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Fans events out to in-process subscribers.
///
/// Publishing never fails for lack of subscribers; slow subscribers lose the
/// oldest events once the channel is full.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<SchedulerEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn publish(&self, event: SchedulerEvent) -> Result<()> {
        // send only fails when nobody is listening
        let _ = self.sender.send(event);
        Ok(())
    }
}

/// Delivers events to a sink from a single task, in the order they were sent.
///
/// `send` never blocks or awaits, so it can be called while holding the
/// coordinator's lock. The task stops once every publisher handle drops.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: mpsc::UnboundedSender<SchedulerEvent>,
}

impl EventPublisher {
    /// Start the delivery task. Must be called within a Tokio runtime.
    pub fn spawn(sink: Arc<dyn EventSink>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<SchedulerEvent>();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let subject = event.subject();
                if let Err(e) = sink.publish(event).await {
                    warn!(subject = %subject, error = %e, "Failed to publish event");
                }
            }
            debug!("Event publisher stopped");
        });
        Self { sender }
    }

    pub fn send(&self, event: SchedulerEvent) {
        if let Err(mpsc::error::SendError(event)) = self.sender.send(event) {
            warn!(subject = %event.subject(), "Event publisher stopped, dropping event");
        }
    }
}

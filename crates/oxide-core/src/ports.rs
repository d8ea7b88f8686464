//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the scheduler and the
//! services around it: the workflow engine, the runner transport, and
//! whatever observes scheduler events.

use crate::Result;
use crate::context::CallContext;
use crate::events::SchedulerEvent;
use crate::filter::{CapabilityProfile, Filter};
use crate::ids::{RunnerId, StageId};
use crate::stage::{BuildStatus, Stage};
use async_trait::async_trait;

/// The dispatch contract seen by the workflow engine and by runners.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Accept a stage. Returns once it is queued; never waits for dispatch.
    async fn schedule(&self, ctx: &CallContext, stage: Stage) -> Result<()>;

    /// Long-poll for a pending stage matching `filter` on behalf of `runner`.
    ///
    /// Suspends until a stage is claimed, the context is canceled
    /// (`Canceled`) or its deadline passes (`DeadlineExceeded`).
    async fn request(&self, ctx: &CallContext, runner: &RunnerId, filter: &Filter)
    -> Result<Stage>;

    /// Record the outcome of a running stage.
    async fn complete(&self, ctx: &CallContext, stage: &StageId, status: BuildStatus)
    -> Result<()>;

    /// Hand a running stage back to the pending set. No-op if already pending.
    async fn requeue(&self, stage: &StageId) -> Result<()>;

    async fn register(&self, runner: &RunnerId, profile: CapabilityProfile) -> Result<()>;

    async fn heartbeat(&self, runner: &RunnerId) -> Result<()>;

    async fn mark_offline(&self, runner: &RunnerId) -> Result<()>;
}

/// Receives scheduler events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish an event.
    async fn publish(&self, event: SchedulerEvent) -> Result<()>;
}

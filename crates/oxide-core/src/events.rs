//! Scheduler events published to observers.

use crate::filter::Filter;
use crate::ids::*;
use crate::stage::BuildStatus;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Everything the scheduler announces about stages and runners.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    // Stage lifecycle
    StageQueued(StageQueuedPayload),
    StagePromoted(StagePromotedPayload),
    StageDispatched(StageDispatchedPayload),
    StageCompleted(StageCompletedPayload),
    StageRequeued(StageRequeuedPayload),
    StageSettled(StageSettledPayload),

    // Runner
    RunnerRegistered(RunnerRegisteredPayload),
    RunnerOffline(RunnerOfflinePayload),
}

impl SchedulerEvent {
    /// Topic for this event.
    pub fn subject(&self) -> String {
        match self {
            SchedulerEvent::StageQueued(p) => {
                format!("build.{}.stage.{}.queued", p.build_id, p.stage_id)
            }
            SchedulerEvent::StagePromoted(p) => {
                format!("build.{}.stage.{}.promoted", p.build_id, p.stage_id)
            }
            SchedulerEvent::StageDispatched(p) => {
                format!("build.{}.stage.{}.dispatched", p.build_id, p.stage_id)
            }
            SchedulerEvent::StageCompleted(p) => {
                format!("build.{}.stage.{}.completed", p.build_id, p.stage_id)
            }
            SchedulerEvent::StageRequeued(p) => {
                format!("build.{}.stage.{}.requeued", p.build_id, p.stage_id)
            }
            SchedulerEvent::StageSettled(p) => {
                format!("build.{}.stage.{}.settled", p.build_id, p.stage_id)
            }
            SchedulerEvent::RunnerRegistered(p) => format!("runner.{}.registered", p.runner_id),
            SchedulerEvent::RunnerOffline(p) => format!("runner.{}.offline", p.runner_id),
        }
    }
}

// === Stage Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StageQueuedPayload {
    pub stage_id: StageId,
    pub build_id: BuildId,
    pub status: BuildStatus,
    pub filter: Filter,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StagePromotedPayload {
    pub stage_id: StageId,
    pub build_id: BuildId,
    pub promoted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StageDispatchedPayload {
    pub stage_id: StageId,
    pub build_id: BuildId,
    pub runner_id: RunnerId,
    pub attempt: u32,
    pub dispatched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StageCompletedPayload {
    pub stage_id: StageId,
    pub build_id: BuildId,
    pub runner_id: Option<RunnerId>,
    pub status: BuildStatus,
    pub duration_ms: Option<u64>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StageRequeuedPayload {
    pub stage_id: StageId,
    pub build_id: BuildId,
    pub previous_runner_id: Option<RunnerId>,
    pub attempt: u32,
    pub requeued_at: DateTime<Utc>,
}

/// A waiting stage closed without running.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StageSettledPayload {
    pub stage_id: StageId,
    pub build_id: BuildId,
    pub status: BuildStatus,
    pub cause: Option<StageId>,
    pub settled_at: DateTime<Utc>,
}

// === Runner Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunnerRegisteredPayload {
    pub runner_id: RunnerId,
    pub profile: Filter,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunnerOfflinePayload {
    pub runner_id: RunnerId,
    pub orphaned_stage_id: Option<StageId>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub offline_at: DateTime<Utc>,
}

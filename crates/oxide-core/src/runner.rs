//! Runner types.

use crate::filter::CapabilityProfile;
use crate::ids::{RunnerId, StageId};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Runner {
    pub id: RunnerId,
    pub profile: CapabilityProfile,
    pub status: RunnerStatus,
    pub stage_id: Option<StageId>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl Runner {
    pub fn new(id: RunnerId, profile: CapabilityProfile) -> Self {
        let now = Utc::now();
        Self {
            id,
            profile,
            status: RunnerStatus::Idle,
            stage_id: None,
            registered_at: now,
            last_heartbeat_at: now,
        }
    }

    /// `active` carries a stage, `idle` and `offline` never do.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            RunnerStatus::Active => self.stage_id.is_some(),
            RunnerStatus::Idle | RunnerStatus::Offline => self.stage_id.is_none(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    Idle,
    Active,
    Offline,
}

impl RunnerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerStatus::Idle => "idle",
            RunnerStatus::Active => "active",
            RunnerStatus::Offline => "offline",
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, RunnerStatus::Idle)
    }
}

impl fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

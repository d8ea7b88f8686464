//! Stage and build status types.

use crate::filter::Filter;
use crate::ids::{BuildId, RunnerId, StageId};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A schedulable unit of work belonging to a build.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Stage {
    pub id: StageId,
    pub build_id: BuildId,
    #[serde(default)]
    pub name: Option<String>,
    pub status: BuildStatus,
    #[serde(default)]
    pub depends_on: Vec<StageId>,
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub runner_id: Option<RunnerId>,
    /// Number of times the stage was handed back after a runner vanished.
    #[serde(default)]
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Stage {
    /// A fresh stage. Status is decided by the scheduler when it is scheduled.
    pub fn new(id: impl Into<StageId>, build_id: BuildId) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            build_id,
            name: None,
            status: BuildStatus::WaitingOnDependencies,
            depends_on: vec![],
            filter: Filter::default(),
            runner_id: None,
            attempt: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StageId>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn duration_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        Some((finished - started).num_milliseconds().max(0) as u64)
    }
}

/// Lifecycle of a stage, and by aggregation of a build.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Skipped,
    Blocked,
    Declined,
    WaitingOnDependencies,
    Pending,
    Running,
    Success,
    Failure,
    Killed,
    Error,
}

impl BuildStatus {
    pub const ALL: [BuildStatus; 10] = [
        BuildStatus::Skipped,
        BuildStatus::Blocked,
        BuildStatus::Declined,
        BuildStatus::WaitingOnDependencies,
        BuildStatus::Pending,
        BuildStatus::Running,
        BuildStatus::Success,
        BuildStatus::Failure,
        BuildStatus::Killed,
        BuildStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Skipped => "skipped",
            BuildStatus::Blocked => "blocked",
            BuildStatus::Declined => "declined",
            BuildStatus::WaitingOnDependencies => "waiting_on_dependencies",
            BuildStatus::Pending => "pending",
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::Failure => "failure",
            BuildStatus::Killed => "killed",
            BuildStatus::Error => "error",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, BuildStatus::Pending)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, BuildStatus::Running)
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            BuildStatus::Failure | BuildStatus::Killed | BuildStatus::Error
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BuildStatus::Success)
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, BuildStatus::WaitingOnDependencies)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Skipped
                | BuildStatus::Blocked
                | BuildStatus::Declined
                | BuildStatus::Success
                | BuildStatus::Failure
                | BuildStatus::Killed
                | BuildStatus::Error
        )
    }

    /// Outcomes a runner may report for a running stage.
    pub fn is_run_outcome(&self) -> bool {
        self.is_success() || self.is_failed()
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl std::str::FromStr for BuildStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuildStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

//! Error types for the Oxide CI scheduler.

use crate::runner::RunnerStatus;
use crate::stage::BuildStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Stage errors
    #[error("Invalid stage: {0}")]
    InvalidStage(String),

    #[error("Stage not found: {0}")]
    StageNotFound(String),

    #[error("Illegal stage transition: {from} -> {to}")]
    IllegalTransition { from: BuildStatus, to: BuildStatus },

    // Runner errors
    #[error("Invalid runner: {0}")]
    InvalidRunner(String),

    #[error("Runner not found: {0}")]
    RunnerNotFound(String),

    #[error("Illegal runner transition: {from} -> {to}")]
    RunnerIllegalTransition { from: RunnerStatus, to: RunnerStatus },

    #[error("Runner {runner} is already assigned stage {stage}")]
    RunnerBusy { runner: String, stage: String },

    // Dispatch errors
    #[error("Request canceled")]
    Canceled,

    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// Lost a claim race. Retried inside the coordinator, never returned
    /// from a public call.
    #[error("Claim conflict on stage {0}")]
    ClaimConflict(String),

    #[error("Scheduler is shutting down")]
    ShuttingDown,

    // Infrastructure errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the caller may simply issue the same call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Canceled | Error::DeadlineExceeded | Error::ClaimConflict(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::StageNotFound(_) | Error::RunnerNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

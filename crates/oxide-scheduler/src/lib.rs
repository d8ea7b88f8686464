//! Stage scheduling and runner dispatch for Oxide CI.
//!
//! [`DispatchCoordinator`] owns every pending stage and every known runner.
//! The workflow engine schedules stages into it, runners long-poll it for
//! work, and completions flow back through it to unblock dependent stages.

pub mod config;
pub mod dag;
pub mod matcher;
pub mod metrics;
pub mod queue;
pub mod reaper;
pub mod registry;
pub mod scheduler;
pub mod sink;
pub mod status;
pub mod waiters;

pub use config::SchedulerConfig;
pub use dag::{BuildDag, DagBuilder, DagError, DependencyResolver, Resolution};
pub use matcher::FilterMatcher;
pub use metrics::{MetricsSnapshot, SchedulerMetrics};
pub use queue::{MemoryStageQueue, QueueStats, StageQueue};
pub use reaper::HeartbeatReaper;
pub use registry::RunnerRegistry;
pub use scheduler::{DispatchCoordinator, DispatchStats, ReapedRunner};
pub use sink::{BroadcastEventSink, EventPublisher};
pub use status::StatusMachine;

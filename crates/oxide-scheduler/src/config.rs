//! Scheduler configuration.

use config::{Config, Environment, File, FileFormat};
use oxide_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment prefix for overrides, e.g. `OXIDE_SCHEDULER__POLL_TIMEOUT_SECS=10`.
pub const ENV_PREFIX: &str = "OXIDE_SCHEDULER";

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Longest a `request` waits when the caller gave no deadline.
    /// Zero waits until the caller cancels.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    /// Silence after which the reaper marks a runner offline.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    /// How often the reaper sweeps.
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,
    /// Requeue the stage held by a reaped runner.
    #[serde(default)]
    pub requeue_orphans: bool,
    /// Capacity of the broadcast event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_poll_timeout() -> u64 {
    30
}

fn default_heartbeat_timeout() -> u64 {
    60
}

fn default_reap_interval() -> u64 {
    15
}

fn default_event_buffer() -> usize {
    1024
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_timeout_secs: default_poll_timeout(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            reap_interval_secs: default_reap_interval(),
            requeue_orphans: false,
            event_buffer: default_event_buffer(),
        }
    }
}

impl SchedulerConfig {
    /// Load from an optional YAML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_timeout_secs == 0 {
            return Err(Error::Config("heartbeat_timeout_secs must be positive".into()));
        }
        if self.reap_interval_secs == 0 {
            return Err(Error::Config("reap_interval_secs must be positive".into()));
        }
        if self.event_buffer == 0 {
            return Err(Error::Config("event_buffer must be positive".into()));
        }
        Ok(())
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_requeue_orphans(mut self, enable: bool) -> Self {
        self.requeue_orphans = enable;
        self
    }

    pub fn poll_timeout(&self) -> Option<Duration> {
        (self.poll_timeout_secs > 0).then(|| Duration::from_secs(self.poll_timeout_secs))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

//! Registry of connected runners.

use crate::status::StatusMachine;
use chrono::{DateTime, Duration, Utc};
use oxide_core::filter::CapabilityProfile;
use oxide_core::ids::{RunnerId, StageId};
use oxide_core::runner::{Runner, RunnerStatus};
use oxide_core::{Error, Result};
use std::collections::HashMap;

/// Outcome of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// First time this identity was seen.
    New,
    /// Known runner; profile and heartbeat refreshed.
    Refreshed,
    /// Runner was offline and is idle again.
    Revived,
}

/// Tracks runner identity, profile, status, liveness, and assignment.
///
/// Holds no timers. Whoever decides a runner is gone calls
/// [`RunnerRegistry::mark_offline`].
#[derive(Debug, Default)]
pub struct RunnerRegistry {
    runners: HashMap<RunnerId, Runner>,
    machine: StatusMachine,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or refresh a runner. Idempotent; clears `offline`.
    pub fn register(&mut self, id: &RunnerId, profile: CapabilityProfile) -> Result<Registration> {
        if id.is_empty() {
            return Err(Error::InvalidRunner("runner identity is empty".to_string()));
        }

        let machine = self.machine;
        match self.runners.get_mut(id) {
            Some(runner) => {
                runner.profile = profile;
                runner.last_heartbeat_at = Utc::now();
                if runner.status == RunnerStatus::Offline {
                    machine.apply_runner(runner, RunnerStatus::Idle)?;
                    Ok(Registration::Revived)
                } else {
                    Ok(Registration::Refreshed)
                }
            }
            None => {
                self.runners
                    .insert(id.clone(), Runner::new(id.clone(), profile));
                Ok(Registration::New)
            }
        }
    }

    pub fn heartbeat(&mut self, id: &RunnerId) -> Result<()> {
        self.lookup_mut(id)?.last_heartbeat_at = Utc::now();
        Ok(())
    }

    /// Take a runner offline, returning the stage it was holding.
    ///
    /// The stage itself is left alone; it stays `running` until someone
    /// requeues or completes it.
    pub fn mark_offline(&mut self, id: &RunnerId) -> Result<Option<StageId>> {
        let machine = self.machine;
        let runner = self.lookup_mut(id)?;
        if runner.status == RunnerStatus::Offline {
            return Ok(None);
        }
        machine.apply_runner(runner, RunnerStatus::Offline)?;
        Ok(runner.stage_id.take())
    }

    pub fn lookup(&self, id: &RunnerId) -> Result<&Runner> {
        self.runners
            .get(id)
            .ok_or_else(|| Error::RunnerNotFound(id.to_string()))
    }

    /// Fail unless the runner could take a stage right now.
    pub fn check_assignable(&self, id: &RunnerId) -> Result<()> {
        let runner = self.lookup(id)?;
        if let Some(current) = &runner.stage_id {
            return Err(Error::RunnerBusy {
                runner: id.to_string(),
                stage: current.to_string(),
            });
        }
        if !self.machine.runner_can_transition(runner.status, RunnerStatus::Active) {
            return Err(Error::RunnerIllegalTransition {
                from: runner.status,
                to: RunnerStatus::Active,
            });
        }
        Ok(())
    }

    /// Hand `stage` to an idle runner.
    pub fn assign(&mut self, id: &RunnerId, stage: &StageId) -> Result<()> {
        let machine = self.machine;
        let runner = self.lookup_mut(id)?;
        if let Some(current) = &runner.stage_id {
            return Err(Error::RunnerBusy {
                runner: id.to_string(),
                stage: current.to_string(),
            });
        }
        machine.apply_runner(runner, RunnerStatus::Active)?;
        runner.stage_id = Some(stage.clone());
        Ok(())
    }

    /// Clear the runner's assignment if it still holds `stage`.
    ///
    /// Returns `false` when the runner moved on or went offline in the
    /// meantime, which is not an error.
    pub fn release(&mut self, id: &RunnerId, stage: &StageId) -> Result<bool> {
        let machine = self.machine;
        let runner = self.lookup_mut(id)?;
        if runner.stage_id.as_ref() != Some(stage) {
            return Ok(false);
        }
        machine.apply_runner(runner, RunnerStatus::Idle)?;
        runner.stage_id = None;
        Ok(true)
    }

    /// Runners still considered alive whose last heartbeat is older than
    /// `threshold` at `now`.
    pub fn stale(&self, threshold: Duration, now: DateTime<Utc>) -> Vec<RunnerId> {
        let cutoff = now - threshold;
        let mut stale: Vec<RunnerId> = self
            .runners
            .values()
            .filter(|r| r.status != RunnerStatus::Offline && r.last_heartbeat_at < cutoff)
            .map(|r| r.id.clone())
            .collect();
        stale.sort();
        stale
    }

    pub fn list(&self) -> Vec<&Runner> {
        let mut runners: Vec<&Runner> = self.runners.values().collect();
        runners.sort_by(|a, b| a.id.cmp(&b.id));
        runners
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    fn lookup_mut(&mut self, id: &RunnerId) -> Result<&mut Runner> {
        self.runners
            .get_mut(id)
            .ok_or_else(|| Error::RunnerNotFound(id.to_string()))
    }
}

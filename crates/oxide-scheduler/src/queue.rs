//! Stage storage, partitioned into waiting and pending sets.

use crate::matcher::FilterMatcher;
use crate::status::StatusMachine;
use oxide_core::filter::Filter;
use oxide_core::ids::{BuildId, RunnerId, StageId};
use oxide_core::stage::{BuildStatus, Stage};
use oxide_core::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Counts per partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub pending: usize,
    pub running: usize,
    pub finished: usize,
}

/// Storage behind the dispatch coordinator.
///
/// Every call happens under the coordinator's lock, so implementations need
/// no locking of their own. The partition a stage sits in always agrees with
/// its status: status changes go through the queue so the two cannot drift.
pub trait StageQueue: Send + Sync {
    /// Insert a new stage. It must be `waiting_on_dependencies` or `pending`.
    fn enqueue(&mut self, stage: Stage) -> Result<()>;

    /// Oldest pending stage whose requirements `filter` satisfies.
    fn peek_eligible(&self, filter: &Filter) -> Option<&Stage>;

    /// Take a pending stage for `runner`, moving it to `running`.
    ///
    /// Fails with `ClaimConflict` if the stage exists but is no longer
    /// pending, so two callers can never both win the same stage.
    fn claim(&mut self, id: &StageId, runner: &RunnerId) -> Result<Stage>;

    /// Put a running stage back at the front of the pending set.
    /// Returns `false` if it was already pending.
    fn requeue(&mut self, id: &StageId) -> Result<bool>;

    /// Apply any other legal status change and move the stage between
    /// partitions to match.
    fn transition(&mut self, id: &StageId, to: BuildStatus) -> Result<Stage>;

    fn get(&self, id: &StageId) -> Option<&Stage>;

    /// Drop a stage entirely.
    fn remove(&mut self, id: &StageId) -> Option<Stage>;

    /// Zero-based place in the dispatch order, for pending stages.
    fn position(&self, id: &StageId) -> Option<usize>;

    fn build_stages(&self, build: &BuildId) -> Vec<&Stage>;

    fn stats(&self) -> QueueStats;

    fn contains(&self, id: &StageId) -> bool {
        self.get(id).is_some()
    }
}

/// In-memory stage queue.
///
/// Pending stages are ordered by the sequence number they got when they
/// were first enqueued, so dispatch is FIFO by schedule time even when a
/// stage waited on dependencies first. Requeued stages take negative keys
/// and so sort ahead of everything else.
#[derive(Debug, Default)]
pub struct MemoryStageQueue {
    stages: HashMap<StageId, Entry>,
    pending: BTreeMap<i64, StageId>,
    waiting: HashSet<StageId>,
    next_seq: i64,
    next_front: i64,
    matcher: FilterMatcher,
    machine: StatusMachine,
}

#[derive(Debug)]
struct Entry {
    stage: Stage,
    key: i64,
}

impl MemoryStageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn entry_mut(&mut self, id: &StageId) -> Result<&mut Entry> {
        self.stages
            .get_mut(id)
            .ok_or_else(|| Error::StageNotFound(id.to_string()))
    }
}

impl StageQueue for MemoryStageQueue {
    fn enqueue(&mut self, stage: Stage) -> Result<()> {
        if self.stages.contains_key(&stage.id) {
            return Err(Error::InvalidStage(format!(
                "stage {} is already scheduled",
                stage.id
            )));
        }

        let key = self.next_seq;
        self.next_seq += 1;

        match stage.status {
            BuildStatus::Pending => {
                self.pending.insert(key, stage.id.clone());
            }
            BuildStatus::WaitingOnDependencies => {
                self.waiting.insert(stage.id.clone());
            }
            other => {
                return Err(Error::InvalidStage(format!(
                    "stage {} cannot be enqueued as {other}",
                    stage.id
                )));
            }
        }

        self.stages.insert(stage.id.clone(), Entry { stage, key });
        Ok(())
    }

    fn peek_eligible(&self, filter: &Filter) -> Option<&Stage> {
        self.pending
            .values()
            .filter_map(|id| self.stages.get(id))
            .map(|entry| &entry.stage)
            .find(|stage| self.matcher.matches(&stage.filter, filter))
    }

    fn claim(&mut self, id: &StageId, runner: &RunnerId) -> Result<Stage> {
        let machine = self.machine;
        let entry = self.entry_mut(id)?;
        if !entry.stage.status.is_pending() {
            return Err(Error::ClaimConflict(id.to_string()));
        }

        machine.apply(&mut entry.stage, BuildStatus::Running)?;
        entry.stage.runner_id = Some(runner.clone());
        let key = entry.key;
        let claimed = entry.stage.clone();

        self.pending.remove(&key);
        Ok(claimed)
    }

    fn requeue(&mut self, id: &StageId) -> Result<bool> {
        let machine = self.machine;
        let front = self.next_front - 1;
        let entry = self.entry_mut(id)?;

        if !machine.revert_to_pending(&mut entry.stage)? {
            return Ok(false);
        }
        entry.key = front;

        self.next_front = front;
        self.pending.insert(front, id.clone());
        Ok(true)
    }

    fn transition(&mut self, id: &StageId, to: BuildStatus) -> Result<Stage> {
        let machine = self.machine;
        let entry = self.entry_mut(id)?;
        let from = entry.stage.status;

        machine.apply(&mut entry.stage, to)?;
        let key = entry.key;
        let updated = entry.stage.clone();

        if from.is_waiting() {
            self.waiting.remove(id);
        }
        if from.is_pending() {
            self.pending.remove(&key);
        }
        if to.is_pending() {
            self.pending.insert(key, id.clone());
        }
        Ok(updated)
    }

    fn get(&self, id: &StageId) -> Option<&Stage> {
        self.stages.get(id).map(|entry| &entry.stage)
    }

    fn remove(&mut self, id: &StageId) -> Option<Stage> {
        let entry = self.stages.remove(id)?;
        self.waiting.remove(id);
        self.pending.remove(&entry.key);
        Some(entry.stage)
    }

    fn position(&self, id: &StageId) -> Option<usize> {
        self.pending.values().position(|p| p == id)
    }

    fn build_stages(&self, build: &BuildId) -> Vec<&Stage> {
        let mut stages: Vec<&Entry> = self
            .stages
            .values()
            .filter(|entry| entry.stage.build_id == *build)
            .collect();
        stages.sort_by(|a, b| {
            a.stage
                .created_at
                .cmp(&b.stage.created_at)
                .then_with(|| a.stage.id.cmp(&b.stage.id))
        });
        stages.into_iter().map(|entry| &entry.stage).collect()
    }

    fn stats(&self) -> QueueStats {
        let running = self
            .stages
            .values()
            .filter(|entry| entry.stage.status.is_running())
            .count();
        QueueStats {
            waiting: self.waiting.len(),
            pending: self.pending.len(),
            running,
            finished: self.stages.len() - self.waiting.len() - self.pending.len() - running,
        }
    }
}

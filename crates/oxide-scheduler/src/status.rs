//! Status transitions for stages and runners.

use chrono::Utc;
use oxide_core::runner::{Runner, RunnerStatus};
use oxide_core::stage::{BuildStatus, Stage};
use oxide_core::{Error, Result};

/// The single authority on which status changes are legal.
///
/// Stages only move forward:
///
/// ```text
/// waiting_on_dependencies -> pending | blocked | declined | skipped
/// pending                 -> running
/// running                 -> success | failure | killed | error
/// ```
///
/// The one exception is [`StatusMachine::revert_to_pending`], the requeue
/// path for stages whose runner disappeared.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusMachine;

impl StatusMachine {
    pub fn new() -> Self {
        Self
    }

    pub fn can_transition(&self, from: BuildStatus, to: BuildStatus) -> bool {
        use BuildStatus::*;
        matches!(
            (from, to),
            (WaitingOnDependencies, Pending | Blocked | Declined | Skipped)
                | (Pending, Running)
                | (Running, Success | Failure | Killed | Error)
        )
    }

    pub fn check(&self, from: BuildStatus, to: BuildStatus) -> Result<()> {
        if self.can_transition(from, to) {
            Ok(())
        } else {
            Err(Error::IllegalTransition { from, to })
        }
    }

    /// Move a stage to `to`, stamping the matching timestamps.
    pub fn apply(&self, stage: &mut Stage, to: BuildStatus) -> Result<()> {
        self.check(stage.status, to)?;

        let now = Utc::now();
        if to.is_running() {
            stage.started_at = Some(now);
        }
        if to.is_terminal() {
            stage.finished_at = Some(now);
        }
        stage.status = to;
        stage.updated_at = now;
        Ok(())
    }

    /// Put a running stage back to `pending`.
    ///
    /// Returns `false` without touching the stage if it is already pending,
    /// so repeated requeues are harmless.
    pub fn revert_to_pending(&self, stage: &mut Stage) -> Result<bool> {
        match stage.status {
            BuildStatus::Pending => Ok(false),
            BuildStatus::Running => {
                stage.status = BuildStatus::Pending;
                stage.runner_id = None;
                stage.started_at = None;
                stage.attempt += 1;
                stage.updated_at = Utc::now();
                Ok(true)
            }
            from => Err(Error::IllegalTransition {
                from,
                to: BuildStatus::Pending,
            }),
        }
    }

    pub fn runner_can_transition(&self, from: RunnerStatus, to: RunnerStatus) -> bool {
        use RunnerStatus::*;
        matches!(
            (from, to),
            (Idle, Active) | (Active, Idle) | (Idle | Active, Offline) | (Offline, Idle)
        )
    }

    pub fn apply_runner(&self, runner: &mut Runner, to: RunnerStatus) -> Result<()> {
        if !self.runner_can_transition(runner.status, to) {
            return Err(Error::RunnerIllegalTransition {
                from: runner.status,
                to,
            });
        }
        runner.status = to;
        Ok(())
    }

    /// Fold the statuses of a build's stages into one build status.
    ///
    /// While anything is still moving the build reports the most advanced
    /// live state. Once everything is terminal the worst outcome wins.
    pub fn aggregate<I>(&self, statuses: I) -> Option<BuildStatus>
    where
        I: IntoIterator<Item = BuildStatus>,
    {
        let statuses: Vec<BuildStatus> = statuses.into_iter().collect();
        if statuses.is_empty() {
            return None;
        }

        let any = |s: BuildStatus| statuses.contains(&s);

        let live = [
            BuildStatus::Running,
            BuildStatus::Pending,
            BuildStatus::WaitingOnDependencies,
        ];
        if let Some(status) = live.into_iter().find(|s| any(*s)) {
            return Some(status);
        }

        let worst = [
            BuildStatus::Error,
            BuildStatus::Failure,
            BuildStatus::Killed,
            BuildStatus::Blocked,
            BuildStatus::Declined,
        ];
        if let Some(status) = worst.into_iter().find(|s| any(*s)) {
            return Some(status);
        }

        if statuses.iter().all(|s| *s == BuildStatus::Skipped) {
            Some(BuildStatus::Skipped)
        } else {
            Some(BuildStatus::Success)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxide_core::ids::{BuildId, RunnerId};
    use oxide_core::Filter;

    #[test]
    fn test_transition_table() {
        let machine = StatusMachine::new();
        let legal = [
            (BuildStatus::WaitingOnDependencies, BuildStatus::Pending),
            (BuildStatus::WaitingOnDependencies, BuildStatus::Blocked),
            (BuildStatus::WaitingOnDependencies, BuildStatus::Declined),
            (BuildStatus::WaitingOnDependencies, BuildStatus::Skipped),
            (BuildStatus::Pending, BuildStatus::Running),
            (BuildStatus::Running, BuildStatus::Success),
            (BuildStatus::Running, BuildStatus::Failure),
            (BuildStatus::Running, BuildStatus::Killed),
            (BuildStatus::Running, BuildStatus::Error),
        ];

        for from in BuildStatus::ALL {
            for to in BuildStatus::ALL {
                let expected = legal.contains(&(from, to));
                assert_eq!(machine.can_transition(from, to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        let machine = StatusMachine::new();
        for from in BuildStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in BuildStatus::ALL {
                assert!(machine.check(from, to).is_err());
            }
        }
    }

    #[test]
    fn test_apply_stamps_times() {
        let machine = StatusMachine::new();
        let mut stage = Stage::new("build-1", BuildId::new());
        stage.status = BuildStatus::Pending;

        machine.apply(&mut stage, BuildStatus::Running).unwrap();
        assert!(stage.started_at.is_some());
        assert!(stage.finished_at.is_none());

        machine.apply(&mut stage, BuildStatus::Success).unwrap();
        assert!(stage.finished_at.is_some());

        let err = machine.apply(&mut stage, BuildStatus::Running).unwrap_err();
        assert!(matches!(err, Error::IllegalTransition { .. }));
    }

    #[test]
    fn test_revert_to_pending() {
        let machine = StatusMachine::new();
        let mut stage = Stage::new("build-1", BuildId::new());
        stage.status = BuildStatus::Running;
        stage.runner_id = Some(RunnerId::new("runner-a"));

        assert!(machine.revert_to_pending(&mut stage).unwrap());
        assert_eq!(stage.status, BuildStatus::Pending);
        assert_eq!(stage.runner_id, None);
        assert_eq!(stage.attempt, 1);

        assert!(!machine.revert_to_pending(&mut stage).unwrap());
        assert_eq!(stage.attempt, 1);

        stage.status = BuildStatus::Success;
        assert!(machine.revert_to_pending(&mut stage).is_err());
    }

    #[test]
    fn test_runner_transitions() {
        let machine = StatusMachine::new();
        let mut runner = Runner::new(RunnerId::new("runner-a"), Filter::any());

        machine.apply_runner(&mut runner, RunnerStatus::Active).unwrap();
        machine.apply_runner(&mut runner, RunnerStatus::Offline).unwrap();
        assert!(machine.apply_runner(&mut runner, RunnerStatus::Active).is_err());
        machine.apply_runner(&mut runner, RunnerStatus::Idle).unwrap();
        assert!(machine.apply_runner(&mut runner, RunnerStatus::Idle).is_err());
    }

    #[test]
    fn test_aggregate() {
        use BuildStatus::*;
        let machine = StatusMachine::new();

        assert_eq!(machine.aggregate(std::iter::empty()), None);
        assert_eq!(machine.aggregate([Success, Running, Pending]), Some(Running));
        assert_eq!(machine.aggregate([Success, WaitingOnDependencies]), Some(WaitingOnDependencies));
        assert_eq!(machine.aggregate([Success, Failure, Blocked]), Some(Failure));
        assert_eq!(machine.aggregate([Killed, Error]), Some(Error));
        assert_eq!(machine.aggregate([Success, Declined]), Some(Declined));
        assert_eq!(machine.aggregate([Skipped, Skipped]), Some(Skipped));
        assert_eq!(machine.aggregate([Skipped, Success]), Some(Success));
    }
}

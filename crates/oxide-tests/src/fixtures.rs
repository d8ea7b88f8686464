//! Test fixtures for creating sample stages and runner profiles.

use oxide_core::{BuildId, CapabilityProfile, Filter, RunnerId, Stage, StageId};

/// Factory for creating test stages.
pub struct StageFixture;

impl StageFixture {
    /// A stage any runner can take.
    pub fn any(id: &str) -> Stage {
        Stage::new(id, BuildId::default())
    }

    /// A stage that needs a Linux runner.
    pub fn linux(id: &str) -> Stage {
        Self::any(id).with_filter(Filter::any().with_os("linux"))
    }

    /// A stage that needs a Windows runner.
    pub fn windows(id: &str) -> Stage {
        Self::any(id).with_filter(Filter::any().with_os("windows"))
    }

    /// A stage any runner can take once `deps` have succeeded.
    pub fn after(id: &str, deps: &[&str]) -> Stage {
        Self::any(id).with_dependencies(deps.iter().copied())
    }

    /// `build -> (test, lint) -> deploy`, all in `build_id`.
    pub fn pipeline(build_id: BuildId) -> Vec<Stage> {
        vec![
            Stage::new("build", build_id).with_name("Build"),
            Stage::new("test", build_id)
                .with_name("Test")
                .with_dependencies(["build"]),
            Stage::new("lint", build_id)
                .with_name("Lint")
                .with_dependencies(["build"]),
            Stage::new("deploy", build_id)
                .with_name("Deploy")
                .with_filter(Filter::any().with_kind("deploy"))
                .with_dependencies(["test", "lint"]),
        ]
    }
}

/// Factory for runner capability profiles.
pub struct RunnerFixture;

impl RunnerFixture {
    pub fn linux() -> CapabilityProfile {
        Filter::any().with_os("linux").with_arch("amd64")
    }

    pub fn windows() -> CapabilityProfile {
        Filter::any().with_os("windows").with_arch("amd64")
    }

    pub fn deployer() -> CapabilityProfile {
        Filter::any().with_kind("deploy").with_os("linux")
    }
}

pub fn stage_id(id: &str) -> StageId {
    StageId::new(id)
}

pub fn runner_id(id: &str) -> RunnerId {
    RunnerId::new(id)
}

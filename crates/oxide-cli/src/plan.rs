//! Build plan files: the stages of one build plus the runners that will
//! execute them during a simulation.

use anyhow::{Context, Result, bail};
use oxide_core::{BuildId, BuildStatus, CapabilityProfile, Filter, RunnerId, Stage};
use oxide_scheduler::{BuildDag, DagBuilder, FilterMatcher};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A build plan file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildPlan {
    pub name: String,
    pub stages: Vec<PlanStage>,
    #[serde(default)]
    pub runners: Vec<PlanRunner>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStage {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub filter: Filter,
    /// Status the simulated runner reports when it finishes the stage.
    #[serde(default = "default_outcome")]
    pub outcome: BuildStatus,
    /// How long the simulated runner works on the stage.
    #[serde(default)]
    pub duration_ms: u64,
}

fn default_outcome() -> BuildStatus {
    BuildStatus::Success
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRunner {
    pub id: String,
    #[serde(default)]
    pub profile: CapabilityProfile,
}

impl BuildPlan {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid build plan {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Stages of this plan, all belonging to `build`.
    pub fn stages(&self, build: BuildId) -> Vec<Stage> {
        self.stages
            .iter()
            .map(|s| {
                let mut stage = Stage::new(s.id.as_str(), build)
                    .with_filter(s.filter.clone())
                    .with_dependencies(s.depends_on.iter().map(String::as_str));
                stage.name = s.name.clone();
                stage
            })
            .collect()
    }

    pub fn runner_ids(&self) -> Vec<RunnerId> {
        self.runners.iter().map(|r| RunnerId::new(r.id.as_str())).collect()
    }

    /// Check the dependency graph and the declared outcomes.
    pub fn validate(&self) -> Result<BuildDag> {
        for stage in &self.stages {
            if !stage.outcome.is_run_outcome() {
                bail!(
                    "stage {} has outcome {}, expected one of success, failure, killed, error",
                    stage.id,
                    stage.outcome
                );
            }
        }
        let dag = DagBuilder::new().build(&self.stages(BuildId::new()), |_| false)?;
        Ok(dag)
    }

    /// Stages no runner in the plan can ever take.
    pub fn unmatched_stages(&self) -> Vec<&PlanStage> {
        let matcher = FilterMatcher::new();
        self.stages
            .iter()
            .filter(|s| !self.runners.iter().any(|r| matcher.matches(&s.filter, &r.profile)))
            .collect()
    }
}

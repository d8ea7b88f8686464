//! Dependency resolution between stages.

use oxide_core::ids::StageId;
use oxide_core::stage::{BuildStatus, Stage};
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::stable_graph::StableDiGraph;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DagError {
    #[error("Cycle detected in stage dependencies at {0}")]
    CycleDetected(String),
    #[error("Unknown stage dependency: {0}")]
    UnknownDependency(String),
    #[error("Stage {0} depends on itself")]
    SelfDependency(String),
    #[error("Duplicate stage: {0}")]
    DuplicateStage(String),
    #[error("Stage {stage} lists dependency {dependency} more than once")]
    DuplicateDependency { stage: String, dependency: String },
    #[error("Empty build")]
    EmptyBuild,
}

impl From<DagError> for oxide_core::Error {
    fn from(err: DagError) -> Self {
        oxide_core::Error::InvalidStage(err.to_string())
    }
}

/// What a waiting stage should do given its dependencies' statuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Every dependency succeeded.
    Ready,
    /// Some dependency has not finished yet.
    Wait,
    /// A dependency failed, was killed, errored, or was itself blocked.
    Block { cause: StageId },
    /// A dependency was declined or skipped.
    Decline { cause: StageId },
}

/// Tracks the dependency edges of every scheduled stage and decides when a
/// waiting stage may run.
///
/// Edges point from a dependency to its dependent. Dependencies may name
/// stages that have not been scheduled yet; they count as unfinished.
#[derive(Debug, Default, Clone)]
pub struct DependencyResolver {
    graph: StableDiGraph<StageId, ()>,
    index: HashMap<StageId, NodeIndex>,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject dependency sets that are malformed or would close a cycle.
    pub fn validate(&self, stage: &StageId, deps: &[StageId]) -> Result<(), DagError> {
        let mut seen = HashSet::new();
        for dep in deps {
            if dep == stage {
                return Err(DagError::SelfDependency(stage.to_string()));
            }
            if !seen.insert(dep) {
                return Err(DagError::DuplicateDependency {
                    stage: stage.to_string(),
                    dependency: dep.to_string(),
                });
            }
        }

        // A new edge dep -> stage closes a cycle iff stage already reaches dep.
        if let Some(&stage_idx) = self.index.get(stage) {
            for dep in deps {
                if let Some(&dep_idx) = self.index.get(dep)
                    && has_path_connecting(&self.graph, stage_idx, dep_idx, None)
                {
                    return Err(DagError::CycleDetected(stage.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Record a stage and its dependency edges.
    pub fn insert(&mut self, stage: &StageId, deps: &[StageId]) -> Result<(), DagError> {
        self.validate(stage, deps)?;
        let stage_idx = self.node(stage);
        for dep in deps {
            let dep_idx = self.node(dep);
            self.graph.add_edge(dep_idx, stage_idx, ());
        }
        Ok(())
    }

    /// Forget a stage and every edge touching it.
    pub fn remove(&mut self, stage: &StageId) {
        if let Some(idx) = self.index.remove(stage) {
            self.graph.remove_node(idx);
        }
    }

    /// Stages that list `stage` as a direct dependency.
    pub fn dependents(&self, stage: &StageId) -> Vec<StageId> {
        let Some(&idx) = self.index.get(stage) else {
            return vec![];
        };
        let mut dependents: Vec<StageId> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .filter_map(|n| self.graph.node_weight(n).cloned())
            .collect();
        // neighbors come back newest edge first
        dependents.reverse();
        dependents
    }

    /// Decide a waiting stage's fate from its dependencies' statuses.
    /// `None` marks a dependency that has not been scheduled yet.
    pub fn resolve<'a, I>(&self, deps: I) -> Resolution
    where
        I: IntoIterator<Item = (&'a StageId, Option<BuildStatus>)>,
    {
        let mut declined = None;
        let mut waiting = false;

        for (id, status) in deps {
            match status {
                Some(s) if s.is_failed() || s == BuildStatus::Blocked => {
                    return Resolution::Block { cause: id.clone() };
                }
                Some(BuildStatus::Declined | BuildStatus::Skipped) => {
                    declined.get_or_insert_with(|| id.clone());
                }
                Some(BuildStatus::Success) => {}
                _ => waiting = true,
            }
        }

        match (declined, waiting) {
            (Some(cause), _) => Resolution::Decline { cause },
            (None, true) => Resolution::Wait,
            (None, false) => Resolution::Ready,
        }
    }

    /// True exactly when every dependency has succeeded.
    pub fn eligible<'a, I>(&self, deps: I) -> bool
    where
        I: IntoIterator<Item = (&'a StageId, Option<BuildStatus>)>,
    {
        self.resolve(deps) == Resolution::Ready
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn node(&mut self, id: &StageId) -> NodeIndex {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(id.clone());
        self.index.insert(id.clone(), idx);
        idx
    }
}

/// A node in a build DAG.
#[derive(Debug, Clone)]
pub struct DagNode {
    pub stage_id: StageId,
    pub name: Option<String>,
}

/// Directed acyclic graph of one build's stages.
#[derive(Debug)]
pub struct BuildDag {
    graph: DiGraph<DagNode, ()>,
    id_to_index: HashMap<StageId, NodeIndex>,
}

impl BuildDag {
    /// Get stages that must complete before a given stage can run.
    pub fn predecessors(&self, stage: &StageId) -> Vec<&DagNode> {
        self.neighbors(stage, Direction::Incoming)
    }

    /// Get topologically sorted stages.
    pub fn topological_order(&self) -> Result<Vec<&DagNode>, DagError> {
        toposort(&self.graph, None)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&idx| self.graph.node_weight(idx))
                    .collect()
            })
            .map_err(|cycle| {
                let at = self
                    .graph
                    .node_weight(cycle.node_id())
                    .map(|n| n.stage_id.to_string())
                    .unwrap_or_default();
                DagError::CycleDetected(at)
            })
    }

    fn neighbors(&self, stage: &StageId, direction: Direction) -> Vec<&DagNode> {
        self.id_to_index
            .get(stage)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, direction)
                    .filter_map(|n| self.graph.node_weight(n))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Builder for validating a whole build before any of it is scheduled.
pub struct DagBuilder;

impl DagBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build a DAG from a set of stages.
    ///
    /// A dependency outside the set is accepted when `is_known` says it was
    /// scheduled earlier; it does not appear in the graph.
    pub fn build<F>(&self, stages: &[Stage], is_known: F) -> Result<BuildDag, DagError>
    where
        F: Fn(&StageId) -> bool,
    {
        if stages.is_empty() {
            return Err(DagError::EmptyBuild);
        }

        let mut graph = DiGraph::new();
        let mut id_to_index = HashMap::new();

        // Add all stages as nodes
        for stage in stages {
            if id_to_index.contains_key(&stage.id) || is_known(&stage.id) {
                return Err(DagError::DuplicateStage(stage.id.to_string()));
            }
            let idx = graph.add_node(DagNode {
                stage_id: stage.id.clone(),
                name: stage.name.clone(),
            });
            id_to_index.insert(stage.id.clone(), idx);
        }

        // Add edges for dependencies
        let resolver = DependencyResolver::new();
        for stage in stages {
            resolver.validate(&stage.id, &stage.depends_on)?;
            let stage_idx = id_to_index[&stage.id];
            for dep in &stage.depends_on {
                match id_to_index.get(dep) {
                    Some(&dep_idx) => {
                        graph.add_edge(dep_idx, stage_idx, ());
                    }
                    None if is_known(dep) => {}
                    None => return Err(DagError::UnknownDependency(dep.to_string())),
                }
            }
        }

        let dag = BuildDag { graph, id_to_index };

        // Verify no cycles
        dag.topological_order()?;

        Ok(dag)
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxide_core::ids::BuildId;

    fn id(s: &str) -> StageId {
        StageId::new(s)
    }

    fn make_stage(name: &str, depends_on: Vec<&str>) -> Stage {
        Stage::new(name, BuildId::default()).with_dependencies(depends_on)
    }

    #[test]
    fn test_resolve_rules() {
        let resolver = DependencyResolver::new();
        let (a, b) = (id("a"), id("b"));

        let ready = resolver.resolve([(&a, Some(BuildStatus::Success)), (&b, Some(BuildStatus::Success))]);
        assert_eq!(ready, Resolution::Ready);

        let wait = resolver.resolve([(&a, Some(BuildStatus::Success)), (&b, Some(BuildStatus::Running))]);
        assert_eq!(wait, Resolution::Wait);

        let unknown = resolver.resolve([(&a, None)]);
        assert_eq!(unknown, Resolution::Wait);

        let blocked = resolver.resolve([(&a, Some(BuildStatus::Running)), (&b, Some(BuildStatus::Killed))]);
        assert_eq!(blocked, Resolution::Block { cause: b.clone() });

        let declined = resolver.resolve([(&a, Some(BuildStatus::Skipped)), (&b, Some(BuildStatus::Pending))]);
        assert_eq!(declined, Resolution::Decline { cause: a.clone() });

        // failure outranks decline regardless of order
        let both = resolver.resolve([(&a, Some(BuildStatus::Declined)), (&b, Some(BuildStatus::Error))]);
        assert_eq!(both, Resolution::Block { cause: b });

        assert!(resolver.eligible(std::iter::empty()));
    }

    #[test]
    fn test_dependents_are_direct_only() {
        let mut resolver = DependencyResolver::new();
        resolver.insert(&id("build"), &[]).unwrap();
        resolver.insert(&id("test"), &[id("build")]).unwrap();
        resolver.insert(&id("lint"), &[id("build")]).unwrap();
        resolver.insert(&id("deploy"), &[id("test"), id("lint")]).unwrap();

        assert_eq!(resolver.dependents(&id("build")), vec![id("test"), id("lint")]);
        assert_eq!(resolver.dependents(&id("test")), vec![id("deploy")]);
        assert!(resolver.dependents(&id("deploy")).is_empty());
    }

    #[test]
    fn test_rejects_cycles_through_forward_references() {
        let mut resolver = DependencyResolver::new();
        resolver.insert(&id("a"), &[id("b")]).unwrap();
        resolver.insert(&id("c"), &[id("a")]).unwrap();

        let err = resolver.insert(&id("b"), &[id("c")]).unwrap_err();
        assert!(matches!(err, DagError::CycleDetected(_)));

        assert!(matches!(
            resolver.insert(&id("d"), &[id("d")]).unwrap_err(),
            DagError::SelfDependency(_)
        ));
        assert!(matches!(
            resolver.insert(&id("e"), &[id("a"), id("a")]).unwrap_err(),
            DagError::DuplicateDependency { .. }
        ));
    }

    #[test]
    fn test_remove_drops_edges() {
        let mut resolver = DependencyResolver::new();
        resolver.insert(&id("build"), &[]).unwrap();
        resolver.insert(&id("deploy"), &[id("build")]).unwrap();
        resolver.remove(&id("deploy"));
        assert!(resolver.dependents(&id("build")).is_empty());
        assert_eq!(resolver.len(), 1);
    }

    #[test]
    fn test_linear_dag() {
        let stages = vec![
            make_stage("build", vec![]),
            make_stage("test", vec!["build"]),
            make_stage("deploy", vec!["test"]),
        ];

        let dag = DagBuilder::new().build(&stages, |_| false).unwrap();
        assert!(dag.predecessors(&id("build")).is_empty());

        let order: Vec<_> = dag
            .topological_order()
            .unwrap()
            .into_iter()
            .map(|n| n.stage_id.clone())
            .collect();
        assert_eq!(order, vec![id("build"), id("test"), id("deploy")]);
    }

    #[test]
    fn test_parallel_dag() {
        let stages = vec![
            make_stage("build", vec![]),
            make_stage("test-unit", vec!["build"]),
            make_stage("test-integration", vec!["build"]),
            make_stage("deploy", vec!["test-unit", "test-integration"]),
        ];

        let dag = DagBuilder::new().build(&stages, |_| false).unwrap();
        assert_eq!(dag.predecessors(&id("deploy")).len(), 2);
        assert_eq!(dag.predecessors(&id("test-unit")).len(), 1);
    }

    #[test]
    fn test_build_rejects_bad_graphs() {
        let builder = DagBuilder::new();

        assert!(matches!(builder.build(&[], |_| false), Err(DagError::EmptyBuild)));

        let cyclic = vec![make_stage("a", vec!["b"]), make_stage("b", vec!["a"])];
        assert!(matches!(
            builder.build(&cyclic, |_| false),
            Err(DagError::CycleDetected(_))
        ));

        let dangling = vec![make_stage("a", vec!["missing"])];
        assert!(matches!(
            builder.build(&dangling, |_| false),
            Err(DagError::UnknownDependency(_))
        ));

        // earlier-scheduled dependencies are fine
        let dag = builder.build(&dangling, |s| s.as_str() == "missing").unwrap();
        assert_eq!(dag.topological_order().unwrap().len(), 1);
    }
}

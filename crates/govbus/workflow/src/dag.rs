//! Workflow graph definition and validation.
//!
//! A [`WorkflowDag`] can only be obtained from [`WorkflowDagBuilder::build`],
//! which rejects duplicate ids, dangling dependencies and cycles before
//! anything runs. Compensations are attached to nodes here, never during
//! execution.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{WorkflowError, WorkflowResult};
use crate::step::{Compensation, StepAction};

/// A single step in the graph.
#[derive(Clone)]
pub struct DagNode {
    pub id: String,
    pub dependencies: BTreeSet<String>,
    pub action: Arc<dyn StepAction>,
    pub compensation: Option<Arc<dyn Compensation>>,
    /// Failure of an optional node does not trigger rollback.
    pub is_optional: bool,
}

impl DagNode {
    pub fn new(id: impl Into<String>, action: Arc<dyn StepAction>) -> Self {
        Self {
            id: id.into(),
            dependencies: BTreeSet::new(),
            action,
            compensation: None,
            is_optional: false,
        }
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn compensate_with(mut self, compensation: Arc<dyn Compensation>) -> Self {
        self.compensation = Some(compensation);
        self
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }
}

impl fmt::Debug for DagNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DagNode")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("has_compensation", &self.compensation.is_some())
            .field("is_optional", &self.is_optional)
            .finish()
    }
}

/// A validated, acyclic workflow graph with precomputed execution waves.
#[derive(Debug, Clone)]
pub struct WorkflowDag {
    name: String,
    nodes: BTreeMap<String, DagNode>,
    waves: Vec<Vec<String>>,
}

impl WorkflowDag {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self, id: &str) -> Option<&DagNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DagNode> {
        self.nodes.values()
    }

    /// Execution waves in order. Every node's dependencies sit in earlier
    /// waves; ids within a wave are sorted.
    pub fn waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Collects nodes and validates them into a [`WorkflowDag`].
pub struct WorkflowDagBuilder {
    name: String,
    nodes: Vec<DagNode>,
}

impl WorkflowDagBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    pub fn node(mut self, node: DagNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn build(self) -> WorkflowResult<WorkflowDag> {
        if self.nodes.is_empty() {
            return Err(WorkflowError::EmptyGraph);
        }

        let mut nodes = BTreeMap::new();
        for node in self.nodes {
            if nodes.contains_key(&node.id) {
                return Err(WorkflowError::DuplicateNode(node.id));
            }
            nodes.insert(node.id.clone(), node);
        }

        for node in nodes.values() {
            if let Some(missing) = node.dependencies.iter().find(|d| !nodes.contains_key(*d)) {
                return Err(WorkflowError::UnknownDependency {
                    node: node.id.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        let waves = compute_waves(&nodes)?;
        Ok(WorkflowDag {
            name: self.name,
            nodes,
            waves,
        })
    }
}

/// Level-by-level Kahn's algorithm. Nodes left over once no node has
/// in-degree zero are on or behind a cycle.
fn compute_waves(nodes: &BTreeMap<String, DagNode>) -> WorkflowResult<Vec<Vec<String>>> {
    let mut in_degree: BTreeMap<&str, usize> = nodes
        .values()
        .map(|n| (n.id.as_str(), n.dependencies.len()))
        .collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for node in nodes.values() {
        for dep in &node.dependencies {
            dependents.entry(dep.as_str()).or_default().push(node.id.as_str());
        }
    }

    let mut waves = Vec::new();
    let mut current: Vec<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut placed = 0;

    while !current.is_empty() {
        let mut next = Vec::new();
        for id in &current {
            in_degree.remove(id);
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        next.push(*dependent);
                    }
                }
            }
        }
        placed += current.len();
        current.sort_unstable();
        waves.push(current.iter().map(|id| id.to_string()).collect());
        current = next;
    }

    if placed < nodes.len() {
        return Err(WorkflowError::CyclicGraph {
            nodes: in_degree.keys().map(|id| id.to_string()).collect(),
        });
    }

    Ok(waves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::action_fn;
    use serde_json::Value;

    fn noop(id: &str) -> DagNode {
        DagNode::new(id, action_fn(|_| async { Ok(Value::Null) }))
    }

    #[test]
    fn test_diamond_waves() {
        let dag = WorkflowDagBuilder::new("diamond")
            .node(noop("D").depends_on(["B", "C"]))
            .node(noop("C").depends_on(["A"]))
            .node(noop("B").depends_on(["A"]))
            .node(noop("A"))
            .build()
            .unwrap();

        assert_eq!(
            dag.waves(),
            &[vec!["A".to_string()], vec!["B".into(), "C".into()], vec!["D".into()]]
        );
        assert_eq!(dag.len(), 4);
    }

    #[test]
    fn test_cycle_rejected() {
        let err = WorkflowDagBuilder::new("loop")
            .node(noop("root"))
            .node(noop("a").depends_on(["root", "c"]))
            .node(noop("b").depends_on(["a"]))
            .node(noop("c").depends_on(["b"]))
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            WorkflowError::CyclicGraph {
                nodes: vec!["a".into(), "b".into(), "c".into()]
            }
        );
    }

    #[test]
    fn test_self_loop_rejected() {
        let err = WorkflowDagBuilder::new("self")
            .node(noop("a").depends_on(["a"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, WorkflowError::CyclicGraph { .. }));
    }

    #[test]
    fn test_duplicate_and_unknown() {
        let dup = WorkflowDagBuilder::new("dup")
            .node(noop("a"))
            .node(noop("a"))
            .build()
            .unwrap_err();
        assert_eq!(dup, WorkflowError::DuplicateNode("a".into()));

        let unknown = WorkflowDagBuilder::new("unknown")
            .node(noop("a").depends_on(["ghost"]))
            .build()
            .unwrap_err();
        assert!(matches!(unknown, WorkflowError::UnknownDependency { .. }));

        assert_eq!(
            WorkflowDagBuilder::new("empty").build().unwrap_err(),
            WorkflowError::EmptyGraph
        );
    }
}

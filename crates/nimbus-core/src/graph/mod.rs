//! Task dependency graph: remote task specs as nodes, ordering constraints
//! as edges.
//!
//! The graph is plain data so its shape can be unit-tested without any
//! dispatch. Builder helpers cover the patterns the workflows need:
//! sequences within a branch, parallel branches (simply unconnected
//! sequences) and a forkjoin join point.
pub mod runner;

pub use runner::{GraphError, GraphRunner};

use crate::dispatch::TaskSpec;

pub type NodeId = usize;

/// One schedulable unit. `Event` steps are human-readable progress markers:
/// ordering-relevant, always succeed.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphStep {
    Task(TaskSpec),
    Event(String),
}

#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    steps: Vec<GraphStep>,
    edges: Vec<(NodeId, NodeId)>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, step: GraphStep) -> NodeId {
        self.steps.push(step);
        self.steps.len() - 1
    }

    /// Orders `before` strictly ahead of `after`.
    pub fn add_edge(&mut self, before: NodeId, after: NodeId) {
        self.edges.push((before, after));
    }

    /// Adds the steps chained in strict order; returns their ids. An empty
    /// input yields an empty branch.
    pub fn sequence(&mut self, steps: impl IntoIterator<Item = GraphStep>) -> Vec<NodeId> {
        let ids: Vec<NodeId> = steps.into_iter().map(|s| self.add(s)).collect();
        for pair in ids.windows(2) {
            self.add_edge(pair[0], pair[1]);
        }
        ids
    }

    /// Forkjoin: adds `step` ordered after every id in `tails`.
    pub fn join(&mut self, tails: &[NodeId], step: GraphStep) -> NodeId {
        let id = self.add(step);
        for &tail in tails {
            self.add_edge(tail, id);
        }
        id
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, id: NodeId) -> &GraphStep {
        &self.steps[id]
    }

    pub fn steps(&self) -> &[GraphStep] {
        &self.steps
    }

    pub fn edges(&self) -> &[(NodeId, NodeId)] {
        &self.edges
    }

    /// Task names in insertion order, events skipped. Shape-assertion helper.
    pub fn task_names(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|s| match s {
                GraphStep::Task(spec) => Some(spec.task_name.as_str()),
                GraphStep::Event(_) => None,
            })
            .collect()
    }
}

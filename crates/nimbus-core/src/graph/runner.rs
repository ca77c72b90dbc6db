//! Generic graph executor: dataflow scheduling over a `TaskDispatcher`.
//!
//! A step runs as soon as all of its predecessors finished; steps with no
//! mutual ordering run concurrently. The first failing step fails the whole
//! graph — in-flight siblings are dropped and nothing downstream starts
//! (atomic pass/fail).

use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use log::info;
use thiserror::Error;

use crate::dispatch::{DispatchError, TaskDispatcher};
use crate::graph::{GraphStep, NodeId, TaskGraph};

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("task {task_name} ({task_id}) failed: {source}")]
    Step {
        task_name: String,
        task_id: String,
        source: DispatchError,
    },
    /// Steps whose ordering constraints can never be satisfied.
    #[error("graph has a dependency cycle involving {0} unfinished steps")]
    Cycle(usize),
}

pub struct GraphRunner<'a, D: TaskDispatcher> {
    dispatcher: &'a D,
    task_timeout: Duration,
}

impl<'a, D: TaskDispatcher> GraphRunner<'a, D> {
    pub fn new(dispatcher: &'a D, task_timeout: Duration) -> Self {
        Self { dispatcher, task_timeout }
    }

    pub async fn run(&self, graph: &TaskGraph) -> Result<(), GraphError> {
        let n = graph.len();
        let mut indegree = vec![0usize; n];
        let mut dependents: Vec<Vec<NodeId>> = vec![Vec::new(); n];
        for &(before, after) in graph.edges() {
            indegree[after] += 1;
            dependents[before].push(after);
        }

        let mut in_flight = FuturesUnordered::new();
        for id in 0..n {
            if indegree[id] == 0 {
                in_flight.push(self.run_step(graph, id));
            }
        }

        let mut finished = 0usize;
        while let Some((id, result)) = in_flight.next().await {
            result?;
            finished += 1;
            for &next in &dependents[id] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    in_flight.push(self.run_step(graph, next));
                }
            }
        }

        if finished < n {
            return Err(GraphError::Cycle(n - finished));
        }
        Ok(())
    }

    async fn run_step(&self, graph: &TaskGraph, id: NodeId) -> (NodeId, Result<(), GraphError>) {
        let result = match graph.step(id) {
            GraphStep::Event(message) => {
                info!("{message}");
                Ok(())
            }
            GraphStep::Task(spec) => {
                let step_err = |source| GraphError::Step { task_name: spec.task_name.clone(),
                                                           task_id: spec.task_id.clone(),
                                                           source };
                match self.dispatcher.execute_task(spec.clone()).await {
                    Err(e) => Err(step_err(e)),
                    Ok(handle) => handle.get(self.task_timeout).await.map(|_| ()).map_err(step_err),
                }
            }
        };
        (id, result)
    }
}

//! Per-deployment worker installation/uninstallation workflows.
//!
//! Two tracks, each strictly sequential, independent of each other:
//! - operations worker: install → start → install management plugins on the
//!   deployment queue → restart;
//! - workflows worker (flagged `workflows_worker: true`): install → start →
//!   install workflow plugins on the deployment's workflows queue → restart.
//!
//! Uninstallation mirrors the shape: stop → uninstall per track, no plugin
//! step. Graph builders are pure; the `install`/`uninstall` entry points run
//! the graph on a dispatcher (this is what the remote system-workflow task
//! executes).

use serde_json::{json, Value};
use uuid::Uuid;

use crate::dispatch::{TaskDispatcher, TaskSpec};
use crate::graph::{GraphError, GraphRunner, GraphStep, TaskGraph};

/// Queue shared by all management-side workers.
pub const MANAGEMENT_QUEUE: &str = "nimbus.management";

/// Task names understood by the remote worker installer.
pub const WORKER_INSTALL_TASK: &str = "worker_installer.tasks.install";
pub const WORKER_START_TASK: &str = "worker_installer.tasks.start";
pub const WORKER_RESTART_TASK: &str = "worker_installer.tasks.restart";
pub const WORKER_STOP_TASK: &str = "worker_installer.tasks.stop";
pub const WORKER_UNINSTALL_TASK: &str = "worker_installer.tasks.uninstall";
pub const PLUGIN_INSTALL_TASK: &str = "plugin_installer.tasks.install";

/// System-workflow tasks the manager submits to the management queue.
pub const WORKERS_INSTALL_TASK: &str = "system_workflows.workers_installation.install";
pub const WORKERS_UNINSTALL_TASK: &str = "system_workflows.workers_installation.uninstall";

/// Queue of a deployment's dedicated workflows worker.
pub fn workflows_queue(deployment_id: &str) -> String {
    format!("{deployment_id}_workflows")
}

/// Marks a worker-installer task as targeting the workflows worker.
fn workflows_worker_payload() -> Value {
    json!({"properties": {"worker_config": {"workflows_worker": true}}})
}

fn task(name: &str, queue: impl Into<String>, kwargs: Value) -> GraphStep {
    GraphStep::Task(TaskSpec { task_name: name.to_string(),
                               task_queue: queue.into(),
                               task_id: Uuid::new_v4().to_string(),
                               kwargs })
}

fn event(message: impl Into<String>) -> GraphStep {
    GraphStep::Event(message.into())
}

pub fn install_graph(deployment_id: &str,
                     management_plugins: &[Value],
                     workflow_plugins: &[Value])
                     -> TaskGraph {
    let mut graph = TaskGraph::new();

    graph.sequence([event("Installing deployment operations worker"),
                    task(WORKER_INSTALL_TASK, MANAGEMENT_QUEUE, Value::Null),
                    event("Starting deployment operations worker"),
                    task(WORKER_START_TASK, MANAGEMENT_QUEUE, Value::Null),
                    event("Installing deployment operations plugins"),
                    task(PLUGIN_INSTALL_TASK, deployment_id, json!({"properties": management_plugins})),
                    task(WORKER_RESTART_TASK, MANAGEMENT_QUEUE, Value::Null)]);

    graph.sequence([event("Installing deployment workflows worker"),
                    task(WORKER_INSTALL_TASK, MANAGEMENT_QUEUE, workflows_worker_payload()),
                    event("Starting deployment workflows worker"),
                    task(WORKER_START_TASK, MANAGEMENT_QUEUE, workflows_worker_payload()),
                    event("Installing deployment workflows plugins"),
                    task(PLUGIN_INSTALL_TASK,
                         workflows_queue(deployment_id),
                         json!({"properties": workflow_plugins})),
                    task(WORKER_RESTART_TASK, MANAGEMENT_QUEUE, workflows_worker_payload())]);

    graph
}

pub fn uninstall_graph(_deployment_id: &str) -> TaskGraph {
    let mut graph = TaskGraph::new();

    graph.sequence([event("Stopping deployment operations worker"),
                    task(WORKER_STOP_TASK, MANAGEMENT_QUEUE, Value::Null),
                    event("Uninstalling deployment operations worker"),
                    task(WORKER_UNINSTALL_TASK, MANAGEMENT_QUEUE, Value::Null)]);

    graph.sequence([event("Stopping deployment workflows worker"),
                    task(WORKER_STOP_TASK, MANAGEMENT_QUEUE, workflows_worker_payload()),
                    event("Uninstalling deployment workflows worker"),
                    task(WORKER_UNINSTALL_TASK, MANAGEMENT_QUEUE, workflows_worker_payload())]);

    graph
}

pub async fn install<D: TaskDispatcher>(dispatcher: &D,
                                        deployment_id: &str,
                                        management_plugins: &[Value],
                                        workflow_plugins: &[Value],
                                        task_timeout: std::time::Duration)
                                        -> Result<(), GraphError> {
    let graph = install_graph(deployment_id, management_plugins, workflow_plugins);
    GraphRunner::new(dispatcher, task_timeout).run(&graph).await
}

pub async fn uninstall<D: TaskDispatcher>(dispatcher: &D,
                                          deployment_id: &str,
                                          task_timeout: std::time::Duration)
                                          -> Result<(), GraphError> {
    let graph = uninstall_graph(deployment_id);
    GraphRunner::new(dispatcher, task_timeout).run(&graph).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_graph_has_two_independent_tracks() {
        let graph = install_graph("dep", &[], &[]);
        assert_eq!(graph.task_names(),
                   vec![WORKER_INSTALL_TASK,
                        WORKER_START_TASK,
                        PLUGIN_INSTALL_TASK,
                        WORKER_RESTART_TASK,
                        WORKER_INSTALL_TASK,
                        WORKER_START_TASK,
                        PLUGIN_INSTALL_TASK,
                        WORKER_RESTART_TASK]);
        // 6 intra-branch edges per 7-step sequence, nothing across
        assert_eq!(graph.edges().len(), 12);
        for &(before, after) in graph.edges() {
            assert_eq!(before < 7, after < 7, "no edge may cross tracks");
        }
    }

    #[test]
    fn workflow_track_targets_the_workflows_queue() {
        let graph = install_graph("dep", &[], &[]);
        let queues: Vec<String> = graph.steps()
                                       .iter()
                                       .filter_map(|s| match s {
                                           GraphStep::Task(spec) if spec.task_name == PLUGIN_INSTALL_TASK => {
                                               Some(spec.task_queue.clone())
                                           }
                                           _ => None,
                                       })
                                       .collect();
        assert_eq!(queues, vec!["dep".to_string(), "dep_workflows".to_string()]);
    }

    #[test]
    fn workflow_track_is_flagged() {
        let graph = install_graph("dep", &[], &[]);
        let flagged = graph.steps()
                           .iter()
                           .filter(|s| match s {
                               GraphStep::Task(spec) => {
                                   spec.kwargs.pointer("/properties/worker_config/workflows_worker")
                                       == Some(&serde_json::json!(true))
                               }
                               _ => false,
                           })
                           .count();
        assert_eq!(flagged, 3); // install, start, restart of the workflows worker
    }

    #[test]
    fn uninstall_graph_mirrors_without_plugin_steps() {
        let graph = uninstall_graph("dep");
        assert_eq!(graph.task_names(),
                   vec![WORKER_STOP_TASK, WORKER_UNINSTALL_TASK, WORKER_STOP_TASK, WORKER_UNINSTALL_TASK]);
        assert!(!graph.task_names().contains(&PLUGIN_INSTALL_TASK));
    }
}

//! End-to-end demo of the orchestration core against in-process backends:
//! publish a blueprint, create a deployment (workers install runs through
//! the task-graph executor), then dispatch its install workflow.
//!
//! Everything remote is simulated by `LocalTaskDispatcher`; the hook stands
//! in for the system workflow reporting terminal status back through the
//! storage callback path.

use indexmap::IndexMap;
use log::info;
use nimbus_core::parser::{DslParser, ParseError, ParsedDsl};
use nimbus_core::{workers, BlueprintsManager, GraphRunner, InMemoryStorageManager, LocalTaskDispatcher, ManagerConfig,
                  StorageManager};
use nimbus_domain::{DeploymentPlan, ExecutionStatus, InstanceCount, NodeInstancePlan, NodeTemplate, Plan,
                    RelationshipTemplate, WorkflowDef};
use serde_json::{json, Value};

/// Canned parser for the demo: a vm hosting a web server, one workflow.
struct DemoParser;

impl DslParser for DemoParser {
    fn parse(&self, dsl_location: &str, _aliases: &str, _resources: &str) -> Result<ParsedDsl, ParseError> {
        let mut workflows = IndexMap::new();
        workflows.insert("install".to_string(),
                         WorkflowDef { plugin: "default_workflows".into(),
                                       operation: "install".into(),
                                       properties: IndexMap::new() });
        let plan = Plan { name: "hello_world".into(),
                          nodes: vec![NodeTemplate { name: "vm".into(),
                                                     node_type: "host".into(),
                                                     type_hierarchy: vec!["node".into(), "host".into()],
                                                     instances: InstanceCount { deploy: 1 },
                                                     host_id: Some("vm".into()),
                                                     properties: json!({"image": "ubuntu"}),
                                                     operations: Value::Null,
                                                     plugins: Value::Null,
                                                     plugins_to_install: None,
                                                     relationships: None },
                                      NodeTemplate { name: "http_web_server".into(),
                                                     node_type: "web_server".into(),
                                                     type_hierarchy: vec!["node".into(), "web_server".into()],
                                                     instances: InstanceCount { deploy: 2 },
                                                     host_id: Some("vm".into()),
                                                     properties: json!({"port": 8080}),
                                                     operations: Value::Null,
                                                     plugins: Value::Null,
                                                     plugins_to_install: None,
                                                     relationships: Some(vec![RelationshipTemplate {
                                                         target_id: "vm".into(),
                                                         kind: "contained_in".into(),
                                                         type_hierarchy: vec![],
                                                         properties: Value::Null,
                                                         source_operations: Value::Null,
                                                         target_operations: Value::Null,
                                                     }]) }],
                          workflows,
                          management_plugins_to_install: vec![json!({"name": "host_provisioner"})],
                          workflow_plugins_to_install: vec![json!({"name": "default_workflows"})] };
        Ok(ParsedDsl { plan, source: format!("# fetched from {dsl_location}\n") })
    }

    fn prepare_deployment_plan(&self, plan: &Plan) -> Result<DeploymentPlan, ParseError> {
        let mut node_instances = Vec::new();
        for node in &plan.nodes {
            for ordinal in 1..=node.instances.deploy {
                node_instances.push(NodeInstancePlan { id: format!("{}_{}", node.name, ordinal),
                                                       name: node.name.clone(),
                                                       host_id: node.host_id.clone(),
                                                       relationships: vec![] });
            }
        }
        Ok(DeploymentPlan { name: plan.name.clone(),
                            nodes: plan.nodes.clone(),
                            workflows: plan.workflows.clone(),
                            management_plugins_to_install: plan.management_plugins_to_install.clone(),
                            workflow_plugins_to_install: plan.workflow_plugins_to_install.clone(),
                            node_instances })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let storage = InMemoryStorageManager::new();
    let config = ManagerConfig::fast();

    // the hook plays the remote system workflow: it runs the two-track
    // worker graph and flips the tracking execution to terminated
    let callback_storage = storage.clone();
    let graph_dispatcher = LocalTaskDispatcher::auto_completing();
    let step_timeout = config.task_timeout;
    let dispatcher = LocalTaskDispatcher::auto_completing().with_hook(move |spec| {
                         let terminated = spec.task_name == workers::WORKERS_INSTALL_TASK
                                          || spec.task_name == workers::WORKERS_UNINSTALL_TASK;
                         if terminated {
                             let _ = callback_storage.update_execution(&spec.task_id,
                                                                       ExecutionStatus::Terminated,
                                                                       None);
                         }
                     });

    let manager = BlueprintsManager::new(storage, dispatcher, DemoParser, config);

    let blueprint = manager.publish_blueprint("blueprints/hello_world.yaml", "aliases.json", "resources/", None)?;
    info!("blueprint published: {}", blueprint.id);

    let deployment = manager.create_deployment(&blueprint.id, "hello-1").await?;
    info!("deployment created: {} ({} nodes, {} instances)",
          deployment.id,
          manager.get_nodes(&deployment.id)?.len(),
          manager.get_node_instances(&deployment.id)?.len());

    // run the install graph locally to show the two-track scheduling
    let graph = workers::install_graph(&deployment.id,
                                       &deployment.plan.management_plugins_to_install,
                                       &deployment.plan.workflow_plugins_to_install);
    GraphRunner::new(&graph_dispatcher, step_timeout).run(&graph).await?;
    info!("worker install graph finished: {} tasks", graph_dispatcher.submitted().len());

    let execution = manager.execute_workflow(&deployment.id, "install").await?;
    info!("workflow dispatched: execution={} status={}", execution.id, execution.status);

    for instance in manager.get_node_instances(&deployment.id)? {
        info!("instance {} state={}", instance.id, instance.state);
    }
    Ok(())
}

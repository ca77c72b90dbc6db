//! Shared fixtures: a canned two-node plan and a scriptable parser.

use indexmap::IndexMap;
use nimbus_core::parser::{DslParser, ParseError, ParsedDsl};
use nimbus_core::{BlueprintsManager, InMemoryStorageManager, LocalTaskDispatcher, ManagerConfig, TaskDispatcher};
use nimbus_domain::{DeploymentPlan, InstanceCount, NodeInstancePlan, NodeTemplate, Plan, RelationshipTemplate,
                    WorkflowDef};
use serde_json::{json, Value};

pub const BLUEPRINT_SOURCE: &str = "blueprint:\n  name: hello_world\n";

/// A vm host plus a web server contained in it, with an `install` workflow.
pub fn hello_world_plan() -> Plan {
    let mut workflows = IndexMap::new();
    workflows.insert("install".to_string(),
                     WorkflowDef { plugin: "default_workflows".into(),
                                   operation: "install".into(),
                                   properties: IndexMap::new() });
    Plan { name: "hello_world".into(),
           workflows,
           nodes: vec![NodeTemplate { name: "vm".into(),
                                      node_type: "cloudify.types.host".into(),
                                      type_hierarchy: vec!["node".into(), "host".into()],
                                      instances: InstanceCount { deploy: 1 },
                                      host_id: Some("vm".into()),
                                      properties: json!({"image": "ubuntu"}),
                                      operations: Value::Null,
                                      plugins: Value::Null,
                                      plugins_to_install: Some(json!([{"name": "agent_plugin"}])),
                                      relationships: None },
                       NodeTemplate { name: "http_web_server".into(),
                                      node_type: "cloudify.types.web_server".into(),
                                      type_hierarchy: vec!["node".into(), "web_server".into()],
                                      instances: InstanceCount { deploy: 1 },
                                      host_id: Some("vm".into()),
                                      properties: json!({"port": 8080}),
                                      operations: Value::Null,
                                      plugins: Value::Null,
                                      plugins_to_install: None,
                                      relationships:
                                          Some(vec![RelationshipTemplate { target_id: "vm".into(),
                                                                           kind: "cloudify.relationships.contained_in"
                                                                                     .into(),
                                                                           type_hierarchy: vec![],
                                                                           properties: Value::Null,
                                                                           source_operations: Value::Null,
                                                                           target_operations: Value::Null }]) }],
           management_plugins_to_install: vec![json!({"name": "host_provisioner"})],
           workflow_plugins_to_install: vec![json!({"name": "default_workflows"})] }
}

/// Parser double returning the canned plan; expansion appends `_1` instance
/// ids the way the real parser numbers instances.
pub struct FixtureParser;

impl DslParser for FixtureParser {
    fn parse(&self, _dsl: &str, _aliases: &str, _resources: &str) -> Result<ParsedDsl, ParseError> {
        Ok(ParsedDsl { plan: hello_world_plan(), source: BLUEPRINT_SOURCE.to_string() })
    }

    fn prepare_deployment_plan(&self, plan: &Plan) -> Result<DeploymentPlan, ParseError> {
        let node_instances = plan.nodes
                                 .iter()
                                 .map(|n| NodeInstancePlan { id: format!("{}_1", n.name),
                                                             name: n.name.clone(),
                                                             host_id: n.host_id.clone(),
                                                             relationships: vec![] })
                                 .collect();
        Ok(DeploymentPlan { name: plan.name.clone(),
                            nodes: plan.nodes.clone(),
                            workflows: plan.workflows.clone(),
                            management_plugins_to_install: plan.management_plugins_to_install.clone(),
                            workflow_plugins_to_install: plan.workflow_plugins_to_install.clone(),
                            node_instances })
    }
}

/// Parser double that rejects everything.
pub struct BrokenParser;

impl DslParser for BrokenParser {
    fn parse(&self, dsl: &str, _aliases: &str, _resources: &str) -> Result<ParsedDsl, ParseError> {
        Err(ParseError(format!("unresolvable import in {dsl}")))
    }

    fn prepare_deployment_plan(&self, _plan: &Plan) -> Result<DeploymentPlan, ParseError> {
        Err(ParseError("expansion failed".into()))
    }
}

pub type TestManager<D> = BlueprintsManager<InMemoryStorageManager, D, FixtureParser>;

pub fn manager_with<D: TaskDispatcher>(storage: InMemoryStorageManager, dispatcher: D) -> TestManager<D> {
    BlueprintsManager::new(storage, dispatcher, FixtureParser, ManagerConfig::fast())
}

/// Manager whose dispatcher marks the workers-installation execution
/// terminated as soon as the install task is submitted, standing in for the
/// remote system workflow reporting back.
pub fn manager_with_working_workers() -> TestManager<LocalTaskDispatcher> {
    let storage = InMemoryStorageManager::new();
    let callback_storage = storage.clone();
    let dispatcher = LocalTaskDispatcher::auto_completing().with_hook(move |spec| {
                         if spec.task_name == nimbus_core::workers::WORKERS_INSTALL_TASK
                            || spec.task_name == nimbus_core::workers::WORKERS_UNINSTALL_TASK
                         {
                             use nimbus_core::storage::StorageManager;
                             let _ = callback_storage.update_execution(&spec.task_id,
                                                                       nimbus_domain::ExecutionStatus::Terminated,
                                                                       None);
                         }
                     });
    manager_with(storage, dispatcher)
}

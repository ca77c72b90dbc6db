//! Full lifecycle against the in-process stack: publish → deploy → workers
//! install → workflow dispatch → callbacks → teardown.

use indexmap::IndexMap;
use nimbus_core::parser::{DslParser, ParseError, ParsedDsl};
use nimbus_core::{workers, BlueprintsManager, InMemoryStorageManager, LocalTaskDispatcher, ManagerConfig,
                  ManagerError, StorageManager};
use nimbus_domain::{DeploymentPlan, ExecutionStatus, InstanceCount, NodeInstancePlan, NodeTemplate, Plan,
                    WorkflowDef, WORKERS_INSTALLATION};
use serde_json::json;

struct TwoNodeParser;

impl DslParser for TwoNodeParser {
    fn parse(&self, _dsl: &str, _aliases: &str, _resources: &str) -> Result<ParsedDsl, ParseError> {
        let mut workflows = IndexMap::new();
        workflows.insert("install".to_string(),
                         WorkflowDef { plugin: "default_workflows".into(),
                                       operation: "install".into(),
                                       properties: IndexMap::new() });
        workflows.insert("uninstall".to_string(),
                         WorkflowDef { plugin: "default_workflows".into(),
                                       operation: "uninstall".into(),
                                       properties: IndexMap::new() });
        let node = |name: &str, deploy: u32| NodeTemplate { name: name.into(),
                                                            node_type: "node".into(),
                                                            type_hierarchy: vec!["node".into()],
                                                            instances: InstanceCount { deploy },
                                                            host_id: None,
                                                            properties: json!({}),
                                                            operations: json!({}),
                                                            plugins: json!({}),
                                                            plugins_to_install: None,
                                                            relationships: None };
        Ok(ParsedDsl { plan: Plan { name: "two_node_app".into(),
                                    nodes: vec![node("vm", 1), node("app", 2)],
                                    workflows,
                                    management_plugins_to_install: vec![json!({"name": "provisioner"})],
                                    workflow_plugins_to_install: vec![json!({"name": "default_workflows"})] },
                       source: "two_node_app: ...".into() })
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

fn stack() -> BlueprintsManager<InMemoryStorageManager, LocalTaskDispatcher, TwoNodeParser> {
    let storage = InMemoryStorageManager::new();
    let callback_storage = storage.clone();
    let dispatcher = LocalTaskDispatcher::auto_completing().with_hook(move |spec| {
                         if spec.task_name == workers::WORKERS_INSTALL_TASK
                            || spec.task_name == workers::WORKERS_UNINSTALL_TASK
                         {
                             let _ = callback_storage.update_execution(&spec.task_id,
                                                                       ExecutionStatus::Terminated,
                                                                       None);
                         }
                     });
    BlueprintsManager::new(storage, dispatcher, TwoNodeParser, ManagerConfig::fast())
}

#[tokio::test]
async fn full_lifecycle_from_publish_to_teardown() {
    let manager = stack();

    let blueprint = manager.publish_blueprint("app.yaml", "aliases", "resources", None).unwrap();
    assert_eq!(blueprint.id, "two_node_app");

    let deployment = manager.create_deployment("two_node_app", "prod").await.unwrap();
    assert_eq!(manager.get_nodes("prod").unwrap().len(), 2);
    let instances = manager.get_node_instances("prod").unwrap();
    assert_eq!(instances.len(), 3); // vm x1 + app x2

    // workers are up; the user workflow dispatches to the dedicated queue
    let execution = manager.execute_workflow("prod", "install").await.unwrap();
    let submitted = manager.dispatcher().submitted();
    let task = submitted.iter().find(|s| s.task_id == execution.id).unwrap();
    assert_eq!(task.task_queue, "prod_workflows");

    // the remote workflow reports progress through the callback surface
    manager.update_execution_status(&execution.id, ExecutionStatus::Launched, None).unwrap();
    for instance in &instances {
        manager.update_node_instance_state(&instance.id, "started").unwrap();
        manager.update_node_instance(&instance.id, Some(json!({"pid": 4711})), None).unwrap();
    }
    manager.update_execution_status(&execution.id, ExecutionStatus::Terminated, None).unwrap();

    let refreshed = manager.get_node_instance("app_2").unwrap();
    assert!(refreshed.is_live());
    assert_eq!(refreshed.version, Some(1));

    // teardown: live instances block deletion until overridden
    let err = manager.delete_deployment("prod", false).await.unwrap_err();
    assert!(matches!(err, ManagerError::DependentExists(_)));
    manager.delete_deployment("prod", true).await.unwrap();
    manager.delete_blueprint("two_node_app").unwrap();
    assert!(manager.blueprints_list().unwrap().is_empty());
    assert_eq!(deployment.blueprint_id, "two_node_app");
}

#[tokio::test]
async fn gate_recovers_once_workers_finish_installing() {
    let manager = stack();
    manager.publish_blueprint("app.yaml", "aliases", "resources", None).unwrap();
    manager.create_deployment("two_node_app", "staging").await.unwrap();

    let install = manager.get_deployment_executions("staging")
                         .unwrap()
                         .into_iter()
                         .find(|e| e.workflow_id == WORKERS_INSTALLATION)
                         .unwrap();

    // roll the gate back to in-flight: dispatch must fail retryably
    manager.update_execution_status(&install.id, ExecutionStatus::Launched, None).unwrap();
    let err = manager.execute_workflow("staging", "install").await.unwrap_err();
    assert!(err.is_retryable());

    // workers finish; the same call now goes through
    manager.update_execution_status(&install.id, ExecutionStatus::Terminated, None).unwrap();
    let execution = manager.execute_workflow("staging", "install").await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Pending);
}

#[tokio::test]
async fn failed_workflow_is_visible_then_resettable() {
    let manager = stack();
    manager.publish_blueprint("app.yaml", "aliases", "resources", None).unwrap();
    manager.create_deployment("two_node_app", "dev").await.unwrap();

    let execution = manager.execute_workflow("dev", "install").await.unwrap();
    manager.update_execution_status(&execution.id, ExecutionStatus::Failed, Some("agent crashed".into()))
           .unwrap();
    assert_eq!(manager.get_execution(&execution.id).unwrap().error.as_deref(), Some("agent crashed"));

    // relaunching through the status-only path clears the stale error
    let reset = manager.update_execution_status(&execution.id, ExecutionStatus::Pending, None).unwrap();
    assert!(reset.error.is_none());

    // a second workflow run on the same deployment is a fresh execution
    let retry = manager.execute_workflow("dev", "uninstall").await.unwrap();
    assert_ne!(retry.id, execution.id);
    assert_eq!(manager.get_deployment_executions("dev").unwrap().len(), 3);
}

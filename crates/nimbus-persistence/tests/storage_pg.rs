//! StorageManager contract tests against a live Postgres (requires
//! DATABASE_URL in the environment; skipped otherwise). Ids are randomized
//! per run so reruns do not collide.

mod test_support;

use nimbus_core::errors::StorageError;
use nimbus_core::storage::StorageManager;
use nimbus_domain::plan::{DeploymentPlan, InstanceCount, NodeTemplate};
use nimbus_domain::{Blueprint, Deployment, Execution, ExecutionStatus, Node, NodeInstance, Plan};
use nimbus_persistence::pg::PgStorageManager;
use serde_json::{json, Value};
use uuid::Uuid;

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

fn sample_plan(name: &str) -> Plan {
    Plan { name: name.to_string(),
           nodes: vec![NodeTemplate { name: "vm".into(),
                                      node_type: "host".into(),
                                      type_hierarchy: vec!["node".into(), "host".into()],
                                      instances: InstanceCount { deploy: 1 },
                                      host_id: Some("vm".into()),
                                      properties: json!({"image": "ubuntu"}),
                                      operations: Value::Null,
                                      plugins: Value::Null,
                                      plugins_to_install: None,
                                      relationships: None }],
           workflows: Default::default(),
           management_plugins_to_install: vec![],
           workflow_plugins_to_install: vec![] }
}

fn sample_deployment_plan(name: &str) -> DeploymentPlan {
    DeploymentPlan { name: name.to_string(),
                     nodes: sample_plan(name).nodes,
                     workflows: Default::default(),
                     management_plugins_to_install: vec![],
                     workflow_plugins_to_install: vec![],
                     node_instances: vec![] }
}

fn seeded_deployment(storage: &PgStorageManager<nimbus_persistence::PoolProvider>) -> (String, String) {
    let blueprint_id = unique("bp");
    let deployment_id = unique("dep");
    storage.put_blueprint(Blueprint::new(blueprint_id.clone(), sample_plan("p"), String::from("raw")))
           .unwrap();
    storage.put_deployment(Deployment::new(deployment_id.clone(),
                                           blueprint_id.clone(),
                                           sample_deployment_plan("p")))
           .unwrap();
    (blueprint_id, deployment_id)
}

#[test]
fn blueprint_round_trip_and_conflict() {
    let ran = test_support::with_pool(|pool| {
        let storage = PgStorageManager::from_pool(pool.clone());
        let id = unique("bp");
        let blueprint = Blueprint::new(id.clone(), sample_plan("round_trip"), String::from("node_templates: ..."));
        storage.put_blueprint(blueprint.clone()).unwrap();

        let loaded = storage.get_blueprint(&id).unwrap();
        assert_eq!(loaded.plan, blueprint.plan);
        assert_eq!(loaded.source, blueprint.source);

        let err = storage.put_blueprint(blueprint).unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { kind: "blueprint", .. }));

        storage.delete_blueprint(&id).unwrap();
        assert!(matches!(storage.get_blueprint(&id), Err(StorageError::NotFound { .. })));
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}

#[test]
fn deployment_cascade_removes_children() {
    let ran = test_support::with_pool(|pool| {
        let storage = PgStorageManager::from_pool(pool.clone());
        let (blueprint_id, deployment_id) = seeded_deployment(&storage);

        storage.put_node(Node { id: "vm".into(),
                                deployment_id: deployment_id.clone(),
                                blueprint_id: blueprint_id.clone(),
                                node_type: "host".into(),
                                type_hierarchy: vec!["node".into()],
                                number_of_instances: 1,
                                host_id: Some("vm".into()),
                                properties: json!({"image": "ubuntu"}),
                                operations: Value::Null,
                                plugins: Value::Null,
                                plugins_to_install: None,
                                relationships: vec![] })
               .unwrap();
        storage.put_node_instance(NodeInstance { id: unique("vm"),
                                                 node_id: "vm".into(),
                                                 deployment_id: deployment_id.clone(),
                                                 host_id: None,
                                                 relationships: vec![],
                                                 state: "uninitialized".into(),
                                                 runtime_properties: None,
                                                 version: None })
               .unwrap();
        storage.put_execution(Execution::pending(unique("exec"), &blueprint_id, &deployment_id, "install"))
               .unwrap();

        assert_eq!(storage.get_nodes(&deployment_id).unwrap().len(), 1);
        storage.delete_deployment(&deployment_id).unwrap();

        assert!(storage.get_nodes(&deployment_id).unwrap().is_empty());
        assert!(storage.get_node_instances(&deployment_id).unwrap().is_empty());
        assert!(storage.get_deployment_executions(&deployment_id).unwrap().is_empty());
        assert!(matches!(storage.get_deployment(&deployment_id), Err(StorageError::NotFound { .. })));

        storage.delete_blueprint(&blueprint_id).unwrap();
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}

#[test]
fn node_instance_versioning_matches_the_in_memory_contract() {
    let ran = test_support::with_pool(|pool| {
        let storage = PgStorageManager::from_pool(pool.clone());
        let (blueprint_id, deployment_id) = seeded_deployment(&storage);
        let instance_id = unique("vm");
        storage.put_node_instance(NodeInstance { id: instance_id.clone(),
                                                 node_id: "vm".into(),
                                                 deployment_id: deployment_id.clone(),
                                                 host_id: None,
                                                 relationships: vec![],
                                                 state: "uninitialized".into(),
                                                 runtime_properties: None,
                                                 version: None })
               .unwrap();

        let updated = storage.update_node_instance(&instance_id, Some(json!({"ip": "10.0.0.5"})), None).unwrap();
        assert_eq!(updated.version, Some(1));

        let err = storage.update_node_instance(&instance_id, Some(json!({"ip": "stale"})), None).unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict { .. }));

        let updated = storage.update_node_instance(&instance_id, Some(json!({"ip": "10.0.0.6"})), Some(1)).unwrap();
        assert_eq!(updated.version, Some(2));
        assert_eq!(updated.runtime_properties, Some(json!({"ip": "10.0.0.6"})));

        let transitioned = storage.update_node_instance_state(&instance_id, "started").unwrap();
        assert_eq!(transitioned.state, "started");
        assert!(transitioned.is_live());

        storage.delete_deployment(&deployment_id).unwrap();
        storage.delete_blueprint(&blueprint_id).unwrap();
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}

#[test]
fn execution_status_updates_reset_the_error() {
    let ran = test_support::with_pool(|pool| {
        let storage = PgStorageManager::from_pool(pool.clone());
        let (blueprint_id, deployment_id) = seeded_deployment(&storage);
        let execution_id = unique("exec");
        storage.put_execution(Execution::pending(execution_id.clone(), &blueprint_id, &deployment_id, "install"))
               .unwrap();

        let failed = storage.update_execution(&execution_id,
                                              ExecutionStatus::Failed,
                                              Some("worker died".into()))
                            .unwrap();
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("worker died"));

        let cleared = storage.update_execution(&execution_id, ExecutionStatus::Pending, None).unwrap();
        assert_eq!(cleared.status, ExecutionStatus::Pending);
        assert!(cleared.error.is_none());

        storage.delete_deployment(&deployment_id).unwrap();
        storage.delete_blueprint(&blueprint_id).unwrap();
    });
    if ran.is_none() {
        eprintln!("skip (no DATABASE_URL)");
    }
}

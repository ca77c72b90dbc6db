//! DashMap-backed `StorageManager`. Strongly consistent, shared between
//! clones; serves as both the default backend and the test double.

use std::sync::Arc;

use dashmap::DashMap;
use nimbus_domain::{Blueprint, Deployment, Execution, ExecutionStatus, Node, NodeInstance};
use serde_json::Value;

use crate::errors::StorageError;
use crate::storage::StorageManager;

#[derive(Clone, Default)]
pub struct InMemoryStorageManager {
    blueprints: Arc<DashMap<String, Blueprint>>,
    deployments: Arc<DashMap<String, Deployment>>,
    // keyed by "{deployment_id}/{node_id}": node ids are only unique per
    // deployment
    nodes: Arc<DashMap<String, Node>>,
    node_instances: Arc<DashMap<String, NodeInstance>>,
    executions: Arc<DashMap<String, Execution>>,
}

impl InMemoryStorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn node_key(deployment_id: &str, node_id: &str) -> String {
        format!("{deployment_id}/{node_id}")
    }
}

/// Create-if-absent insert on a DashMap entry; the single-writer guarantee
/// behind every `put_*`.
fn try_insert<V>(map: &DashMap<String, V>, key: String, value: V, kind: &'static str) -> Result<(), StorageError> {
    match map.entry(key) {
        dashmap::Entry::Occupied(e) => Err(StorageError::AlreadyExists { kind, id: e.key().clone() }),
        dashmap::Entry::Vacant(e) => {
            e.insert(value);
            Ok(())
        }
    }
}

impl StorageManager for InMemoryStorageManager {
    fn put_blueprint(&self, blueprint: Blueprint) -> Result<(), StorageError> {
        try_insert(&self.blueprints, blueprint.id.clone(), blueprint, "blueprint")
    }

    fn get_blueprint(&self, id: &str) -> Result<Blueprint, StorageError> {
        self.blueprints
            .get(id)
            .map(|e| e.clone())
            .ok_or_else(|| StorageError::NotFound { kind: "blueprint", id: id.to_string() })
    }

    fn blueprints_list(&self) -> Result<Vec<Blueprint>, StorageError> {
        Ok(self.blueprints.iter().map(|e| e.clone()).collect())
    }

    fn delete_blueprint(&self, id: &str) -> Result<Blueprint, StorageError> {
        self.blueprints
            .remove(id)
            .map(|(_, b)| b)
            .ok_or_else(|| StorageError::NotFound { kind: "blueprint", id: id.to_string() })
    }

    fn get_blueprint_deployments(&self, blueprint_id: &str) -> Result<Vec<Deployment>, StorageError> {
        Ok(self.deployments
               .iter()
               .filter(|e| e.blueprint_id == blueprint_id)
               .map(|e| e.clone())
               .collect())
    }

    fn put_deployment(&self, deployment: Deployment) -> Result<(), StorageError> {
        try_insert(&self.deployments, deployment.id.clone(), deployment, "deployment")
    }

    fn get_deployment(&self, id: &str) -> Result<Deployment, StorageError> {
        self.deployments
            .get(id)
            .map(|e| e.clone())
            .ok_or_else(|| StorageError::NotFound { kind: "deployment", id: id.to_string() })
    }

    fn deployments_list(&self) -> Result<Vec<Deployment>, StorageError> {
        Ok(self.deployments.iter().map(|e| e.clone()).collect())
    }

    fn delete_deployment(&self, id: &str) -> Result<Deployment, StorageError> {
        let (_, deployment) = self.deployments
                                  .remove(id)
                                  .ok_or_else(|| StorageError::NotFound { kind: "deployment",
                                                                          id: id.to_string() })?;
        self.nodes.retain(|_, n| n.deployment_id != id);
        self.node_instances.retain(|_, i| i.deployment_id != id);
        self.executions.retain(|_, e| e.deployment_id != id);
        Ok(deployment)
    }

    fn put_node(&self, node: Node) -> Result<(), StorageError> {
        let key = Self::node_key(&node.deployment_id, &node.id);
        try_insert(&self.nodes, key, node, "node")
    }

    fn get_nodes(&self, deployment_id: &str) -> Result<Vec<Node>, StorageError> {
        Ok(self.nodes
               .iter()
               .filter(|e| e.deployment_id == deployment_id)
               .map(|e| e.clone())
               .collect())
    }

    fn put_node_instance(&self, instance: NodeInstance) -> Result<(), StorageError> {
        try_insert(&self.node_instances, instance.id.clone(), instance, "node instance")
    }

    fn get_node_instance(&self, id: &str) -> Result<NodeInstance, StorageError> {
        self.node_instances
            .get(id)
            .map(|e| e.clone())
            .ok_or_else(|| StorageError::NotFound { kind: "node instance", id: id.to_string() })
    }

    fn get_node_instances(&self, deployment_id: &str) -> Result<Vec<NodeInstance>, StorageError> {
        Ok(self.node_instances
               .iter()
               .filter(|e| e.deployment_id == deployment_id)
               .map(|e| e.clone())
               .collect())
    }

    fn update_node_instance_state(&self, id: &str, state: &str) -> Result<NodeInstance, StorageError> {
        let mut entry = self.node_instances
                            .get_mut(id)
                            .ok_or_else(|| StorageError::NotFound { kind: "node instance",
                                                                    id: id.to_string() })?;
        entry.state = state.to_string();
        Ok(entry.clone())
    }

    fn update_node_instance(&self,
                            id: &str,
                            runtime_properties: Option<Value>,
                            expected_version: Option<u32>)
                            -> Result<NodeInstance, StorageError> {
        let mut entry = self.node_instances
                            .get_mut(id)
                            .ok_or_else(|| StorageError::NotFound { kind: "node instance",
                                                                    id: id.to_string() })?;
        if entry.version != expected_version {
            return Err(StorageError::VersionConflict { id: id.to_string() });
        }
        entry.runtime_properties = runtime_properties;
        entry.version = Some(expected_version.map_or(1, |v| v + 1));
        Ok(entry.clone())
    }

    fn put_execution(&self, execution: Execution) -> Result<(), StorageError> {
        try_insert(&self.executions, execution.id.clone(), execution, "execution")
    }

    fn get_execution(&self, id: &str) -> Result<Execution, StorageError> {
        self.executions
            .get(id)
            .map(|e| e.clone())
            .ok_or_else(|| StorageError::NotFound { kind: "execution", id: id.to_string() })
    }

    fn executions_list(&self) -> Result<Vec<Execution>, StorageError> {
        Ok(self.executions.iter().map(|e| e.clone()).collect())
    }

    fn get_deployment_executions(&self, deployment_id: &str) -> Result<Vec<Execution>, StorageError> {
        Ok(self.executions
               .iter()
               .filter(|e| e.deployment_id == deployment_id)
               .map(|e| e.clone())
               .collect())
    }

    fn update_execution(&self,
                        id: &str,
                        status: ExecutionStatus,
                        error: Option<String>)
                        -> Result<Execution, StorageError> {
        let mut entry = self.executions
                            .get_mut(id)
                            .ok_or_else(|| StorageError::NotFound { kind: "execution",
                                                                    id: id.to_string() })?;
        entry.status = status;
        entry.error = error;
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_domain::node::STATE_UNINITIALIZED;

    fn sample_instance(id: &str, deployment_id: &str) -> NodeInstance {
        NodeInstance { id: id.into(),
                       node_id: "vm".into(),
                       deployment_id: deployment_id.into(),
                       host_id: None,
                       relationships: vec![],
                       state: STATE_UNINITIALIZED.into(),
                       runtime_properties: None,
                       version: None }
    }

    #[test]
    fn put_twice_fails_with_already_exists() {
        let sm = InMemoryStorageManager::new();
        sm.put_node_instance(sample_instance("i1", "d")).unwrap();
        let err = sm.put_node_instance(sample_instance("i1", "d")).unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { kind: "node instance", .. }));
    }

    #[test]
    fn optimistic_update_checks_and_bumps_version() {
        let sm = InMemoryStorageManager::new();
        sm.put_node_instance(sample_instance("i1", "d")).unwrap();

        let updated = sm.update_node_instance("i1", Some(serde_json::json!({"ip": "10.0.0.5"})), None)
                        .unwrap();
        assert_eq!(updated.version, Some(1));

        // stale writer loses
        let err = sm.update_node_instance("i1", Some(serde_json::json!({})), None).unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict { .. }));

        let updated = sm.update_node_instance("i1", Some(serde_json::json!({})), Some(1)).unwrap();
        assert_eq!(updated.version, Some(2));
    }

    #[test]
    fn delete_deployment_cascades() {
        let sm = InMemoryStorageManager::new();
        let plan: nimbus_domain::DeploymentPlan = serde_json::from_value(serde_json::json!({"name": "p"})).unwrap();
        sm.put_deployment(Deployment::new("d", "bp", plan)).unwrap();
        sm.put_node_instance(sample_instance("i1", "d")).unwrap();
        sm.put_node_instance(sample_instance("i2", "other")).unwrap();
        sm.put_execution(Execution::pending("e1", "bp", "d", "install")).unwrap();

        sm.delete_deployment("d").unwrap();
        assert!(sm.get_node_instance("i1").is_err());
        assert!(sm.get_node_instance("i2").is_ok());
        assert!(sm.get_execution("e1").is_err());
    }

    #[test]
    fn clones_share_state() {
        let sm = InMemoryStorageManager::new();
        let other = sm.clone();
        sm.put_execution(Execution::pending("e1", "bp", "d", "install")).unwrap();
        assert!(other.get_execution("e1").is_ok());
    }
}

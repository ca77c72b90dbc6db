//! Storage contract and the in-memory reference implementation.
pub mod memory;

pub use memory::InMemoryStorageManager;

use nimbus_domain::{Blueprint, Deployment, Execution, ExecutionStatus, Node, NodeInstance};
use serde_json::Value;

use crate::errors::StorageError;

/// Persistent key-value store of orchestration entities.
///
/// Contract notes:
/// - Every `put_*` has create-once semantics: an existing id fails with
///   `AlreadyExists` instead of overwriting. Conflict detection is the
///   storage layer's job so that concurrent creates race safely.
/// - Executions and node instances have explicit update paths; everything
///   else is immutable after creation.
/// - `delete_deployment` cascades to the deployment's nodes, node instances
///   and executions.
/// - The backend may be eventually consistent: a `get_*` immediately after a
///   `put_*` may miss the row. Callers that depend on visibility fence on
///   counts (see the manager's count fence).
pub trait StorageManager: Send + Sync {
    fn put_blueprint(&self, blueprint: Blueprint) -> Result<(), StorageError>;
    fn get_blueprint(&self, id: &str) -> Result<Blueprint, StorageError>;
    fn blueprints_list(&self) -> Result<Vec<Blueprint>, StorageError>;
    fn delete_blueprint(&self, id: &str) -> Result<Blueprint, StorageError>;
    /// Deployments referencing the given blueprint (dependency check for
    /// blueprint deletion).
    fn get_blueprint_deployments(&self, blueprint_id: &str) -> Result<Vec<Deployment>, StorageError>;

    fn put_deployment(&self, deployment: Deployment) -> Result<(), StorageError>;
    fn get_deployment(&self, id: &str) -> Result<Deployment, StorageError>;
    fn deployments_list(&self) -> Result<Vec<Deployment>, StorageError>;
    fn delete_deployment(&self, id: &str) -> Result<Deployment, StorageError>;

    fn put_node(&self, node: Node) -> Result<(), StorageError>;
    fn get_nodes(&self, deployment_id: &str) -> Result<Vec<Node>, StorageError>;

    fn put_node_instance(&self, instance: NodeInstance) -> Result<(), StorageError>;
    fn get_node_instance(&self, id: &str) -> Result<NodeInstance, StorageError>;
    fn get_node_instances(&self, deployment_id: &str) -> Result<Vec<NodeInstance>, StorageError>;
    /// Lifecycle-state transition, written by workflow task callbacks.
    fn update_node_instance_state(&self, id: &str, state: &str) -> Result<NodeInstance, StorageError>;
    /// Runtime-properties update guarded by optimistic concurrency: fails
    /// with `VersionConflict` unless `expected_version` matches the stored
    /// version; the version increments on success.
    fn update_node_instance(&self,
                            id: &str,
                            runtime_properties: Option<Value>,
                            expected_version: Option<u32>)
                            -> Result<NodeInstance, StorageError>;

    fn put_execution(&self, execution: Execution) -> Result<(), StorageError>;
    fn get_execution(&self, id: &str) -> Result<Execution, StorageError>;
    fn executions_list(&self) -> Result<Vec<Execution>, StorageError>;
    fn get_deployment_executions(&self, deployment_id: &str) -> Result<Vec<Execution>, StorageError>;
    /// Status-update callback path. A status-only update (error `None`)
    /// clears any previously stored error.
    fn update_execution(&self,
                        id: &str,
                        status: ExecutionStatus,
                        error: Option<String>)
                        -> Result<Execution, StorageError>;
}

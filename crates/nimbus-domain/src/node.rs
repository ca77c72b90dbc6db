//! Node templates vs. node instances: the template is written once per
//! deployment and never mutated; instances carry the evolving lifecycle
//! state and runtime properties.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle tags that are structurally significant to deletion checks.
/// Everything in between is workflow-defined and opaque to the manager.
pub const STATE_UNINITIALIZED: &str = "uninitialized";
pub const STATE_DELETED: &str = "deleted";

/// Per-deployment node type definition, one per template in the plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub deployment_id: String,
    pub blueprint_id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub type_hierarchy: Vec<String>,
    pub number_of_instances: u32,
    pub host_id: Option<String>,
    pub properties: Value,
    pub operations: Value,
    pub plugins: Value,
    pub plugins_to_install: Option<Value>,
    pub relationships: Vec<NodeRelationship>,
}

/// Flattened relationship entry stored on a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeRelationship {
    pub target_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub type_hierarchy: Vec<String>,
    pub properties: Value,
    pub source_operations: Value,
    pub target_operations: Value,
}

/// Concrete running unit of a node. Mutated by workflow task callbacks;
/// `version` backs optimistic-concurrency updates of `runtime_properties`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeInstance {
    pub id: String,
    pub node_id: String,
    pub deployment_id: String,
    pub host_id: Option<String>,
    pub relationships: Vec<Value>,
    pub state: String,
    pub runtime_properties: Option<Value>,
    pub version: Option<u32>,
}

impl NodeInstance {
    /// A live instance blocks deployment deletion unless overridden.
    pub fn is_live(&self) -> bool {
        self.state != STATE_UNINITIALIZED && self.state != STATE_DELETED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(state: &str) -> NodeInstance {
        NodeInstance { id: "vm_1".into(),
                       node_id: "vm".into(),
                       deployment_id: "dep".into(),
                       host_id: None,
                       relationships: vec![],
                       state: state.into(),
                       runtime_properties: None,
                       version: None }
    }

    #[test]
    fn only_uninitialized_and_deleted_are_not_live() {
        assert!(!instance(STATE_UNINITIALIZED).is_live());
        assert!(!instance(STATE_DELETED).is_live());
        assert!(instance("started").is_live());
        assert!(instance("stopping").is_live());
    }
}

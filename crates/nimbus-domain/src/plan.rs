//! Typed plan documents produced by the external DSL parser.
//!
//! The parser is a black box that hands back structured documents; this
//! module pins down the fields the orchestration core actually depends on
//! and leaves everything else as raw JSON. Plan keys stay snake_case (the
//! parser's convention), unlike the camelCased entity wire format.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parsed blueprint topology: node templates plus the workflow map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeTemplate>,
    #[serde(default)]
    pub workflows: IndexMap<String, WorkflowDef>,
    #[serde(default)]
    pub management_plugins_to_install: Vec<Value>,
    #[serde(default)]
    pub workflow_plugins_to_install: Vec<Value>,
}

/// Deployment-specific expansion of a blueprint plan: multiplicities are
/// resolved into concrete `node_instances`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentPlan {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeTemplate>,
    #[serde(default)]
    pub workflows: IndexMap<String, WorkflowDef>,
    #[serde(default)]
    pub management_plugins_to_install: Vec<Value>,
    #[serde(default)]
    pub workflow_plugins_to_install: Vec<Value>,
    #[serde(default)]
    pub node_instances: Vec<NodeInstancePlan>,
}

/// One node template as declared in the blueprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeTemplate {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub type_hierarchy: Vec<String>,
    pub instances: InstanceCount,
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub properties: Value,
    #[serde(default)]
    pub operations: Value,
    #[serde(default)]
    pub plugins: Value,
    #[serde(default)]
    pub plugins_to_install: Option<Value>,
    #[serde(default)]
    pub relationships: Option<Vec<RelationshipTemplate>>,
}

/// Declared instance counts for a node template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceCount {
    pub deploy: u32,
}

/// Relationship entry on a node template. `target_id` is the canonical key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationshipTemplate {
    pub target_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub type_hierarchy: Vec<String>,
    #[serde(default)]
    pub properties: Value,
    #[serde(default)]
    pub source_operations: Value,
    #[serde(default)]
    pub target_operations: Value,
}

/// A named workflow: plugin + operation resolved to a dispatchable task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDef {
    pub plugin: String,
    pub operation: String,
    #[serde(default)]
    pub properties: IndexMap<String, Value>,
}

impl WorkflowDef {
    /// Fully qualified task name (`plugin.operation`).
    pub fn task_name(&self) -> String {
        format!("{}.{}", self.plugin, self.operation)
    }
}

/// Concrete node instance declared by the deployment plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeInstancePlan {
    pub id: String,
    /// Name of the node template this instance belongs to.
    pub name: String,
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub relationships: Vec<Value>,
}

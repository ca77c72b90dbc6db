use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::Plan;

/// Immutable parsed topology template. Created once at publication and never
/// mutated; deletable only while no deployment references it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blueprint {
    pub id: String,
    pub plan: Plan,
    /// Raw DSL text stored verbatim for later retrieval/audit.
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Blueprint {
    pub fn new(id: impl Into<String>, plan: Plan, source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self { id: id.into(),
               plan,
               source: source.into(),
               created_at: now,
               updated_at: now }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn wire_field_names_are_camel_cased() {
        let bp = Blueprint::new("bp", Plan { name: "bp".into(),
                                             nodes: vec![],
                                             workflows: IndexMap::new(),
                                             management_plugins_to_install: vec![],
                                             workflow_plugins_to_install: vec![] },
                                "node_templates: {}");
        let v = serde_json::to_value(&bp).unwrap();
        assert!(v.get("createdAt").is_some());
        assert!(v.get("updatedAt").is_some());
        assert!(v.get("created_at").is_none());
    }
}

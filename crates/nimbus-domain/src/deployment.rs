use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::DeploymentPlan;

/// One instantiation of a blueprint, owning nodes, node instances and
/// executions by foreign key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    pub blueprint_id: String,
    pub plan: DeploymentPlan,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    pub fn new(id: impl Into<String>, blueprint_id: impl Into<String>, plan: DeploymentPlan) -> Self {
        let now = Utc::now();
        Self { id: id.into(),
               blueprint_id: blueprint_id.into(),
               plan,
               created_at: now,
               updated_at: now }
    }
}

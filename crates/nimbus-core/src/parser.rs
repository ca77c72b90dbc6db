//! External DSL parser seam.
//!
//! Parsing itself is out of scope; the manager only depends on this
//! contract: a location in, a typed plan plus the verbatim source out, and a
//! deployment-specific expansion of the plan. Any failure crossing this
//! boundary becomes `ManagerError::DslParse` — raw parser errors must not
//! escape the manager.

use nimbus_domain::{DeploymentPlan, Plan};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ParseError(pub String);

/// Parse result: the structured plan and the raw DSL text, fetched by the
/// parser from the same location and stored verbatim for audit.
#[derive(Debug, Clone)]
pub struct ParsedDsl {
    pub plan: Plan,
    pub source: String,
}

pub trait DslParser: Send + Sync {
    fn parse(&self,
             dsl_location: &str,
             alias_mapping_url: &str,
             resources_base_url: &str)
             -> Result<ParsedDsl, ParseError>;

    /// Expands a blueprint plan into a deployment plan: resolves
    /// multiplicities, instance ids and relationship bindings.
    fn prepare_deployment_plan(&self, plan: &Plan) -> Result<DeploymentPlan, ParseError>;
}

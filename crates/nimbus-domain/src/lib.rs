// nimbus-domain library entry point
pub mod blueprint;
pub mod deployment;
pub mod execution;
pub mod node;
pub mod plan;
pub use blueprint::Blueprint;
pub use deployment::Deployment;
pub use execution::{Execution, ExecutionStatus, WORKERS_INSTALLATION, WORKERS_UNINSTALLATION};
pub use node::{Node, NodeInstance, NodeRelationship};
pub use plan::{DeploymentPlan, InstanceCount, NodeInstancePlan, NodeTemplate, Plan, RelationshipTemplate, WorkflowDef};

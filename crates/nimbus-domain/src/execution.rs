use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved system workflow id gating user workflows on a deployment.
pub const WORKERS_INSTALLATION: &str = "workers_installation";
/// Reserved system workflow id run while deleting a deployment.
pub const WORKERS_UNINSTALLATION: &str = "workers_uninstallation";

/// Status vocabulary of a tracked workflow run. The manager only branches on
/// terminal-success (`Terminated`), terminal-failure (`Failed`) and
/// non-terminal; the rest is workflow-system-defined.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Launched,
    Terminated,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Launched => "launched",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A tracked run of a named workflow against a deployment. Never deleted
/// individually; removed with its deployment, if at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub blueprint_id: String,
    pub workflow_id: String,
    pub deployment_id: String,
    pub internal_workflow_id: Option<String>,
    pub error: Option<String>,
}

impl Execution {
    pub fn pending(id: impl Into<String>,
                   blueprint_id: impl Into<String>,
                   deployment_id: impl Into<String>,
                   workflow_id: impl Into<String>)
                   -> Self {
        Self { id: id.into(),
               status: ExecutionStatus::Pending,
               created_at: Utc::now(),
               blueprint_id: blueprint_id.into(),
               workflow_id: workflow_id.into(),
               deployment_id: deployment_id.into(),
               internal_workflow_id: None,
               error: None }
    }

    pub fn is_system_workflow(&self) -> bool {
        self.workflow_id == WORKERS_INSTALLATION || self.workflow_id == WORKERS_UNINSTALLATION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(ExecutionStatus::Terminated.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Launched.is_terminal());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(ExecutionStatus::Terminated).unwrap(), "terminated");
        let s: ExecutionStatus = serde_json::from_value(serde_json::json!("launched")).unwrap();
        assert_eq!(s, ExecutionStatus::Launched);
    }
}

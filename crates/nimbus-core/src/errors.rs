//! Error taxonomy of the orchestration core.
//!
//! Collaborator failures (storage, dispatcher, parser) are converted at the
//! boundary into one of these kinds; nothing raw escapes. The REST layer
//! upstream maps kinds to status codes: parse/conflict/dependent/nonexistent
//! workflow → 400/409, not-found → 404, the retryable workers gate → a
//! distinguished retry-later signal, everything else → 500.

use thiserror::Error;

/// Storage contract errors. `AlreadyExists` is load-bearing: the put/create
/// path must fail rather than overwrite on id collision.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: &'static str, id: String },
    #[error("version conflict updating node instance {id}")]
    VersionConflict { id: String },
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ManagerError {
    /// Blueprint parsing/publication failure, wrapping the parser's message.
    #[error("failed parsing dsl: {0}")]
    DslParse(String),
    #[error("blueprint {0} already exists")]
    BlueprintAlreadyExists(String),
    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: &'static str, id: String },
    /// Delete blocked by live dependents; the message enumerates their ids.
    #[error("{0}")]
    DependentExists(String),
    #[error("workflow {workflow_id} does not exist in deployment {deployment_id}")]
    NonexistentWorkflow { workflow_id: String, deployment_id: String },
    /// Workers installation still in flight; retryable by the caller.
    #[error("deployment {0} workers are still being installed, try again in a minute")]
    WorkersNotYetInstalled(String),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("version conflict updating node instance {0}")]
    VersionConflict(String),
    #[error("task dispatch failed: {0}")]
    Dispatch(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl ManagerError {
    /// True when the caller may simply retry later (the async-not-ready
    /// state), false for everything fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WorkersNotYetInstalled(_))
    }
}

impl From<StorageError> for ManagerError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { kind, id } => Self::NotFound { kind, id },
            StorageError::AlreadyExists { kind: "blueprint", id } => Self::BlueprintAlreadyExists(id),
            StorageError::AlreadyExists { kind, id } => Self::AlreadyExists { kind, id },
            StorageError::VersionConflict { id } => Self::VersionConflict(id),
            StorageError::Backend(msg) => Self::Internal(msg),
        }
    }
}

//! Asynchronous remote task execution seam.
//!
//! Submit a named task against a queue and get back an awaitable handle;
//! status and failure details stay queryable by task id afterwards. The
//! broker transport behind this trait is out of scope.
pub mod local;

pub use local::LocalTaskDispatcher;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

/// One remote task submission.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub task_name: String,
    pub task_queue: String,
    pub task_id: String,
    pub kwargs: Value,
}

/// Broker-side task state, queryable after submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Started,
    Success,
    Failure,
    Revoked,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Revoked => "REVOKED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("task {0} not found")]
    UnknownTask(String),
    #[error("task failed: {0}")]
    TaskFailed(String),
    #[error("timed out after {0:?} waiting for task result")]
    Timeout(Duration),
    #[error("dispatch transport error: {0}")]
    Transport(String),
}

/// Awaitable result of a submitted task.
pub struct TaskHandle {
    pub task_id: String,
    rx: oneshot::Receiver<Result<Value, String>>,
}

impl TaskHandle {
    pub fn new(task_id: impl Into<String>, rx: oneshot::Receiver<Result<Value, String>>) -> Self {
        Self { task_id: task_id.into(), rx }
    }

    /// Blocks (async) until the task produces a result or `timeout` elapses.
    /// Failures propagate as `TaskFailed`.
    pub async fn get(self, timeout: Duration) -> Result<Value, DispatchError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Err(_) => Err(DispatchError::Timeout(timeout)),
            Ok(Err(_)) => Err(DispatchError::Transport("result channel dropped".into())),
            Ok(Ok(Err(e))) => Err(DispatchError::TaskFailed(e)),
            Ok(Ok(Ok(value))) => Ok(value),
        }
    }
}

/// Capability contract: submit named task to queue, get future result.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn execute_task(&self, spec: TaskSpec) -> Result<TaskHandle, DispatchError>;
    async fn get_task_status(&self, task_id: &str) -> Result<TaskStatus, DispatchError>;
    /// Error detail of a failed task, when the broker still has it.
    async fn get_failed_task_error(&self, task_id: &str) -> Option<String>;
    /// Fire-and-forget cancellation signal; takes effect eventually.
    async fn cancel_task(&self, task_id: &str) -> Result<(), DispatchError>;
}

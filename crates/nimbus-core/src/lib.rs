//! nimbus-core: deployment lifecycle and execution-orchestration core.
//!
//! The `BlueprintsManager` drives blueprints → deployments → node instances
//! → executions against two injected collaborators: a `StorageManager`
//! (persistent entity store) and a `TaskDispatcher` (asynchronous remote
//! task execution). The worker installation workflow is a two-track task
//! dependency graph executed by a generic `GraphRunner`.
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod graph;
pub mod manager;
pub mod parser;
pub mod retry;
pub mod storage;
pub mod workers;

pub use config::ManagerConfig;
pub use dispatch::{DispatchError, LocalTaskDispatcher, TaskDispatcher, TaskHandle, TaskSpec, TaskStatus};
pub use errors::{ManagerError, StorageError};
pub use graph::{GraphRunner, GraphStep, TaskGraph};
pub use manager::BlueprintsManager;
pub use parser::{DslParser, ParsedDsl};
pub use retry::{wait_until, RetryPolicy};
pub use storage::{InMemoryStorageManager, StorageManager};

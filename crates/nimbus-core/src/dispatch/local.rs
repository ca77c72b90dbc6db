//! In-process `TaskDispatcher` used by tests and the demo binary.
//!
//! Records every submission and lets the caller script outcomes: tasks can
//! auto-complete, be completed/failed explicitly, or trigger an `on_execute`
//! hook standing in for the out-of-band status-callback path a real broker
//! would drive.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use log::debug;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::dispatch::{DispatchError, TaskDispatcher, TaskHandle, TaskSpec, TaskStatus};

type ExecuteHook = dyn Fn(&TaskSpec) + Send + Sync;

struct TaskRecord {
    spec: TaskSpec,
    status: TaskStatus,
    error: Option<String>,
    tx: Option<oneshot::Sender<Result<Value, String>>>,
}

#[derive(Clone, Default)]
pub struct LocalTaskDispatcher {
    tasks: Arc<DashMap<String, TaskRecord>>,
    submissions: Arc<DashMap<usize, TaskSpec>>,
    seq: Arc<AtomicUsize>,
    auto_complete: bool,
    on_execute: Option<Arc<ExecuteHook>>,
}

impl LocalTaskDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every submitted task immediately succeeds with a null result.
    pub fn auto_completing() -> Self {
        Self { auto_complete: true, ..Self::default() }
    }

    /// Installs a hook invoked on every submission, before completion.
    pub fn with_hook(mut self, hook: impl Fn(&TaskSpec) + Send + Sync + 'static) -> Self {
        self.on_execute = Some(Arc::new(hook));
        self
    }

    /// Submissions in order, for asserting on dispatch behavior.
    pub fn submitted(&self) -> Vec<TaskSpec> {
        let mut specs: Vec<(usize, TaskSpec)> = self.submissions.iter().map(|e| (*e.key(), e.clone())).collect();
        specs.sort_by_key(|(seq, _)| *seq);
        specs.into_iter().map(|(_, s)| s).collect()
    }

    pub fn complete(&self, task_id: &str, result: Value) {
        if let Some(mut record) = self.tasks.get_mut(task_id) {
            record.status = TaskStatus::Success;
            if let Some(tx) = record.tx.take() {
                let _ = tx.send(Ok(result));
            }
        }
    }

    pub fn fail(&self, task_id: &str, error: impl Into<String>) {
        if let Some(mut record) = self.tasks.get_mut(task_id) {
            let error = error.into();
            record.status = TaskStatus::Failure;
            record.error = Some(error.clone());
            if let Some(tx) = record.tx.take() {
                let _ = tx.send(Err(error));
            }
        }
    }

    /// Forces a broker-side status without resolving the handle (e.g. to
    /// simulate a task stuck in PENDING/STARTED).
    pub fn set_status(&self, task_id: &str, status: TaskStatus) {
        if let Some(mut record) = self.tasks.get_mut(task_id) {
            record.status = status;
        }
    }
}

#[async_trait]
impl TaskDispatcher for LocalTaskDispatcher {
    async fn execute_task(&self, spec: TaskSpec) -> Result<TaskHandle, DispatchError> {
        debug!("execute_task name={} queue={} id={}", spec.task_name, spec.task_queue, spec.task_id);
        let (tx, rx) = oneshot::channel();
        let handle = TaskHandle::new(spec.task_id.clone(), rx);
        self.submissions.insert(self.seq.fetch_add(1, Ordering::SeqCst), spec.clone());
        self.tasks.insert(spec.task_id.clone(),
                          TaskRecord { spec: spec.clone(),
                                       status: TaskStatus::Pending,
                                       error: None,
                                       tx: Some(tx) });
        if let Some(hook) = &self.on_execute {
            hook(&spec);
        }
        if self.auto_complete {
            self.complete(&spec.task_id, Value::Null);
        }
        Ok(handle)
    }

    async fn get_task_status(&self, task_id: &str) -> Result<TaskStatus, DispatchError> {
        self.tasks
            .get(task_id)
            .map(|r| r.status)
            .ok_or_else(|| DispatchError::UnknownTask(task_id.to_string()))
    }

    async fn get_failed_task_error(&self, task_id: &str) -> Option<String> {
        self.tasks.get(task_id).and_then(|r| r.error.clone())
    }

    async fn cancel_task(&self, task_id: &str) -> Result<(), DispatchError> {
        if let Some(mut record) = self.tasks.get_mut(task_id) {
            debug!("cancel_task id={} name={}", task_id, record.spec.task_name);
            record.status = TaskStatus::Revoked;
        }
        Ok(())
    }
}

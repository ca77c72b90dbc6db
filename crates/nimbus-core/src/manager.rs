//! The blueprints manager: lifecycle of blueprints, deployments, node
//! instances and executions.
//!
//! Collaborators are injected explicitly — storage, task dispatcher and DSL
//! parser — so request-scoped construction is the serving layer's choice,
//! not a process-wide singleton. Every operation is synchronous from the
//! caller's point of view; everything touching remote workers is
//! asynchronous underneath, observed through execution records updated
//! out-of-band or by querying the dispatcher directly.

use log::{info, warn};
use nimbus_domain::{Blueprint, Deployment, Execution, ExecutionStatus, Node, NodeInstance, NodeRelationship,
                    WORKERS_INSTALLATION, WORKERS_UNINSTALLATION};
use serde_json::{json, Map, Value};
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::ManagerConfig;
use crate::dispatch::{TaskDispatcher, TaskSpec, TaskStatus};
use crate::errors::{ManagerError, StorageError};
use crate::parser::DslParser;
use crate::retry::wait_until;
use crate::storage::StorageManager;
use crate::workers;

pub struct BlueprintsManager<S, D, P>
    where S: StorageManager,
          D: TaskDispatcher,
          P: DslParser
{
    storage: S,
    dispatcher: D,
    parser: P,
    config: ManagerConfig,
}

impl<S, D, P> BlueprintsManager<S, D, P>
    where S: StorageManager,
          D: TaskDispatcher,
          P: DslParser
{
    pub fn new(storage: S, dispatcher: D, parser: P, config: ManagerConfig) -> Self {
        Self { storage, dispatcher, parser, config }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    // ------------------------------------------------------------------
    // read surface (feeds the REST layer)

    pub fn blueprints_list(&self) -> Result<Vec<Blueprint>, ManagerError> {
        Ok(self.storage.blueprints_list()?)
    }

    pub fn deployments_list(&self) -> Result<Vec<Deployment>, ManagerError> {
        Ok(self.storage.deployments_list()?)
    }

    pub fn executions_list(&self) -> Result<Vec<Execution>, ManagerError> {
        Ok(self.storage.executions_list()?)
    }

    pub fn get_blueprint(&self, blueprint_id: &str) -> Result<Blueprint, ManagerError> {
        Ok(self.storage.get_blueprint(blueprint_id)?)
    }

    pub fn get_deployment(&self, deployment_id: &str) -> Result<Deployment, ManagerError> {
        Ok(self.storage.get_deployment(deployment_id)?)
    }

    pub fn get_execution(&self, execution_id: &str) -> Result<Execution, ManagerError> {
        Ok(self.storage.get_execution(execution_id)?)
    }

    pub fn get_deployment_executions(&self, deployment_id: &str) -> Result<Vec<Execution>, ManagerError> {
        Ok(self.storage.get_deployment_executions(deployment_id)?)
    }

    pub fn get_nodes(&self, deployment_id: &str) -> Result<Vec<Node>, ManagerError> {
        Ok(self.storage.get_nodes(deployment_id)?)
    }

    pub fn get_node_instances(&self, deployment_id: &str) -> Result<Vec<NodeInstance>, ManagerError> {
        Ok(self.storage.get_node_instances(deployment_id)?)
    }

    pub fn get_node_instance(&self, instance_id: &str) -> Result<NodeInstance, ManagerError> {
        Ok(self.storage.get_node_instance(instance_id)?)
    }

    // ------------------------------------------------------------------
    // callback surface (status updates from the task system)

    /// Status-update path for executions. A status-only update clears any
    /// previously stored error.
    pub fn update_execution_status(&self,
                                   execution_id: &str,
                                   status: ExecutionStatus,
                                   error: Option<String>)
                                   -> Result<Execution, ManagerError> {
        Ok(self.storage.update_execution(execution_id, status, error)?)
    }

    pub fn update_node_instance_state(&self, instance_id: &str, state: &str) -> Result<NodeInstance, ManagerError> {
        Ok(self.storage.update_node_instance_state(instance_id, state)?)
    }

    /// Optimistic-concurrency update of runtime properties.
    pub fn update_node_instance(&self,
                                instance_id: &str,
                                runtime_properties: Option<Value>,
                                version: Option<u32>)
                                -> Result<NodeInstance, ManagerError> {
        Ok(self.storage.update_node_instance(instance_id, runtime_properties, version)?)
    }

    // ------------------------------------------------------------------
    // blueprints

    /// Parses and stores a blueprint. The blueprint id defaults to the
    /// plan's declared name; parser failures of any kind surface as
    /// `DslParse`, never raw.
    pub fn publish_blueprint(&self,
                             dsl_location: &str,
                             alias_mapping_url: &str,
                             resources_base_url: &str,
                             blueprint_id: Option<&str>)
                             -> Result<Blueprint, ManagerError> {
        let parsed = self.parser
                         .parse(dsl_location, alias_mapping_url, resources_base_url)
                         .map_err(|e| ManagerError::DslParse(e.to_string()))?;

        let id = blueprint_id.map(str::to_string).unwrap_or_else(|| parsed.plan.name.clone());
        let blueprint = Blueprint::new(id, parsed.plan, parsed.source);
        // storage put is atomic-create; a concurrent publish with the same
        // id loses here rather than overwriting
        self.storage.put_blueprint(blueprint.clone())?;
        info!("published blueprint {}", blueprint.id);
        Ok(blueprint)
    }

    pub fn delete_blueprint(&self, blueprint_id: &str) -> Result<Blueprint, ManagerError> {
        self.storage.get_blueprint(blueprint_id)?;
        let dependents = self.storage.get_blueprint_deployments(blueprint_id)?;
        if !dependents.is_empty() {
            let ids: Vec<&str> = dependents.iter().map(|d| d.id.as_str()).collect();
            return Err(ManagerError::DependentExists(format!(
                "Can't delete blueprint {} - There exist deployments for this blueprint; deployments ids: {}",
                blueprint_id,
                ids.join(","))));
        }
        Ok(self.storage.delete_blueprint(blueprint_id)?)
    }

    // ------------------------------------------------------------------
    // deployments

    /// Creates a deployment from a blueprint: expands the plan, writes the
    /// deployment, materializes nodes and node instances, and launches
    /// worker installation. Returns only once the node and node-instance
    /// counts are visible through storage (the consistency fence).
    pub async fn create_deployment(&self, blueprint_id: &str, deployment_id: &str) -> Result<Deployment, ManagerError> {
        let blueprint = self.storage.get_blueprint(blueprint_id)?;
        let plan = self.parser
                       .prepare_deployment_plan(&blueprint.plan)
                       .map_err(|e| ManagerError::DslParse(e.to_string()))?;

        let deployment = Deployment::new(deployment_id, blueprint_id, plan);
        self.storage.put_deployment(deployment.clone())?;

        self.create_deployment_nodes(&deployment).await?;

        // tracking execution is created synchronously; the install itself
        // runs remotely and is observed through that execution's status
        self.install_deployment_workers(&deployment).await?;

        for instance_plan in &deployment.plan.node_instances {
            self.storage.put_node_instance(NodeInstance {
                id: instance_plan.id.clone(),
                node_id: instance_plan.name.clone(),
                deployment_id: deployment.id.clone(),
                host_id: instance_plan.host_id.clone(),
                relationships: instance_plan.relationships.clone(),
                state: nimbus_domain::node::STATE_UNINITIALIZED.to_string(),
                runtime_properties: None,
                version: None,
            })?;
        }
        let expected = deployment.plan.node_instances.len();
        self.wait_for_count(expected, "node instances", &deployment.id, || {
                self.storage.get_node_instances(&deployment.id).map(|v| v.len())
            })
            .await?;

        info!("created deployment {} from blueprint {}", deployment.id, blueprint_id);
        Ok(deployment)
    }

    async fn create_deployment_nodes(&self, deployment: &Deployment) -> Result<(), ManagerError> {
        for template in &deployment.plan.nodes {
            let relationships: Vec<NodeRelationship> =
                template.relationships
                        .as_deref()
                        .unwrap_or(&[])
                        .iter()
                        .map(|r| NodeRelationship { target_id: r.target_id.clone(),
                                                    kind: r.kind.clone(),
                                                    type_hierarchy: r.type_hierarchy.clone(),
                                                    properties: r.properties.clone(),
                                                    source_operations: r.source_operations.clone(),
                                                    target_operations: r.target_operations.clone() })
                        .collect();
            self.storage.put_node(Node { id: template.name.clone(),
                                         deployment_id: deployment.id.clone(),
                                         blueprint_id: deployment.blueprint_id.clone(),
                                         node_type: template.node_type.clone(),
                                         type_hierarchy: template.type_hierarchy.clone(),
                                         number_of_instances: template.instances.deploy,
                                         host_id: template.host_id.clone(),
                                         properties: template.properties.clone(),
                                         operations: template.operations.clone(),
                                         plugins: template.plugins.clone(),
                                         plugins_to_install: template.plugins_to_install.clone(),
                                         relationships })?;
        }
        let expected = deployment.plan.nodes.len();
        self.wait_for_count(expected, "nodes", &deployment.id, || {
                self.storage.get_nodes(&deployment.id).map(|v| v.len())
            })
            .await
    }

    /// Deletes a deployment after verifying nothing live depends on it, and
    /// after a synchronous workers uninstall. Storage state is only removed
    /// once the uninstall execution reached `terminated`.
    pub async fn delete_deployment(&self, deployment_id: &str, ignore_live_nodes: bool) -> Result<Deployment, ManagerError> {
        let deployment = self.storage.get_deployment(deployment_id)?;

        let executions = self.storage.get_deployment_executions(deployment_id)?;
        let running: Vec<&str> = executions.iter()
                                           .filter(|e| !e.status.is_terminal())
                                           .map(|e| e.id.as_str())
                                           .collect();
        if !running.is_empty() {
            return Err(ManagerError::DependentExists(format!(
                "Can't delete deployment {} - There are running executions for this deployment; executions ids: {}",
                deployment_id,
                running.join(","))));
        }

        if !ignore_live_nodes {
            let instances = self.storage.get_node_instances(deployment_id)?;
            let live: Vec<&str> = instances.iter().filter(|i| i.is_live()).map(|i| i.id.as_str()).collect();
            if !live.is_empty() {
                return Err(ManagerError::DependentExists(format!(
                    "Can't delete deployment {} - There are live nodes for this deployment; live nodes ids: {}",
                    deployment_id,
                    live.join(","))));
            }
        }

        self.uninstall_deployment_workers(&deployment).await?;
        let deleted = self.storage.delete_deployment(deployment_id)?;
        info!("deleted deployment {deployment_id}");
        Ok(deleted)
    }

    // ------------------------------------------------------------------
    // executions

    /// Dispatches a named workflow against the deployment's workflows
    /// worker. Gated on the workers-installation execution having reached
    /// `terminated`. The execution record is written only after the task
    /// submission succeeded — a failed submit leaves no row behind.
    pub async fn execute_workflow(&self, deployment_id: &str, workflow_id: &str) -> Result<Execution, ManagerError> {
        let deployment = self.storage.get_deployment(deployment_id)?;

        let workflow = deployment.plan
                                 .workflows
                                 .get(workflow_id)
                                 .ok_or_else(|| ManagerError::NonexistentWorkflow {
                                     workflow_id: workflow_id.to_string(),
                                     deployment_id: deployment_id.to_string(),
                                 })?;

        self.verify_workers_installed(deployment_id).await?;

        let execution_id = Uuid::new_v4().to_string();
        let mut kwargs = Map::new();
        for (key, value) in &workflow.properties {
            kwargs.insert(key.clone(), value.clone());
        }
        kwargs.insert("context".to_string(),
                      json!({
                          "workflow_id": workflow_id,
                          "blueprint_id": deployment.blueprint_id,
                          "deployment_id": deployment_id,
                          "execution_id": execution_id,
                      }));
        self.dispatcher
            .execute_task(TaskSpec { task_name: workflow.task_name(),
                                     task_queue: workers::workflows_queue(deployment_id),
                                     task_id: execution_id.clone(),
                                     kwargs: Value::Object(kwargs) })
            .await
            .map_err(|e| ManagerError::Dispatch(e.to_string()))?;

        let execution = Execution::pending(execution_id, &deployment.blueprint_id, deployment_id, workflow_id);
        self.storage.put_execution(execution.clone())?;
        info!("execution {} dispatched: workflow {} on deployment {}", execution.id, workflow_id, deployment_id);
        Ok(execution)
    }

    /// Fire-and-forget cancellation: signals the dispatcher and returns the
    /// unmodified execution snapshot. The stored status only changes when
    /// the task system reports back through the callback path.
    pub async fn cancel_workflow(&self, execution_id: &str) -> Result<Execution, ManagerError> {
        let execution = self.storage.get_execution(execution_id)?;
        self.dispatcher
            .cancel_task(&execution.id)
            .await
            .map_err(|e| ManagerError::Dispatch(e.to_string()))?;
        Ok(execution)
    }

    // ------------------------------------------------------------------
    // worker installation

    async fn install_deployment_workers(&self, deployment: &Deployment) -> Result<Execution, ManagerError> {
        let task_id = Uuid::new_v4().to_string();
        let execution = Execution::pending(task_id.clone(),
                                           &deployment.blueprint_id,
                                           &deployment.id,
                                           WORKERS_INSTALLATION);
        self.storage.put_execution(execution.clone())?;

        let context = self.system_task_context(deployment, &task_id, WORKERS_INSTALLATION, workers::WORKERS_INSTALL_TASK);
        self.dispatcher
            .execute_task(TaskSpec {
                task_name: workers::WORKERS_INSTALL_TASK.to_string(),
                task_queue: workers::MANAGEMENT_QUEUE.to_string(),
                task_id,
                kwargs: json!({
                    "management_plugins_to_install": deployment.plan.management_plugins_to_install,
                    "workflow_plugins_to_install": deployment.plan.workflow_plugins_to_install,
                    "context": context,
                }),
            })
            .await
            .map_err(|e| ManagerError::Dispatch(e.to_string()))?;
        Ok(execution)
    }

    /// Submits the workers uninstall and blocks until it completed. Raises
    /// rather than deleting state while remote workers may still exist.
    async fn uninstall_deployment_workers(&self, deployment: &Deployment) -> Result<(), ManagerError> {
        let task_id = Uuid::new_v4().to_string();
        let execution = Execution::pending(task_id.clone(),
                                           &deployment.blueprint_id,
                                           &deployment.id,
                                           WORKERS_UNINSTALLATION);
        self.storage.put_execution(execution)?;

        let context = self.system_task_context(deployment, &task_id, WORKERS_UNINSTALLATION, workers::WORKERS_UNINSTALL_TASK);
        let handle = self.dispatcher
                         .execute_task(TaskSpec { task_name: workers::WORKERS_UNINSTALL_TASK.to_string(),
                                                  task_queue: workers::MANAGEMENT_QUEUE.to_string(),
                                                  task_id: task_id.clone(),
                                                  kwargs: json!({ "context": context }) })
                         .await
                         .map_err(|e| ManagerError::Dispatch(e.to_string()))?;

        handle.get(self.config.uninstall_timeout)
              .await
              .map_err(|e| ManagerError::Internal(format!(
                  "failed to uninstall workers for deployment {}: {e}", deployment.id)))?;

        // the task result alone is not authoritative; require the tracked
        // execution to have reached terminated
        let execution = self.storage.get_execution(&task_id)?;
        if execution.status != ExecutionStatus::Terminated {
            return Err(ManagerError::Internal(format!(
                "failed to uninstall workers for deployment {} (uninstall execution status is {})",
                deployment.id, execution.status)));
        }
        Ok(())
    }

    fn system_task_context(&self, deployment: &Deployment, task_id: &str, workflow_id: &str, task_name: &str) -> Value {
        json!({
            "task_id": task_id,
            "task_name": task_name,
            "task_target": workers::MANAGEMENT_QUEUE,
            "blueprint_id": deployment.blueprint_id,
            "deployment_id": deployment.id,
            "execution_id": task_id,
            "workflow_id": workflow_id,
        })
    }

    /// The workers-installed gate. Two-phase by design: a cheap status read
    /// first, then — only after one delayed re-check of a still-`pending`
    /// record — a fallback to the task system for a real diagnostic, so the
    /// broker is not hammered on every dispatch attempt.
    async fn verify_workers_installed(&self, deployment_id: &str) -> Result<(), ManagerError> {
        let mut is_retry = false;
        loop {
            let execution = self.storage
                                .get_deployment_executions(deployment_id)?
                                .into_iter()
                                .find(|e| e.workflow_id == WORKERS_INSTALLATION)
                                .ok_or_else(|| ManagerError::Internal(format!(
                                    "failed to find workers_installation execution for deployment {deployment_id}")))?;

            match execution.status {
                ExecutionStatus::Terminated => return Ok(()),
                ExecutionStatus::Launched => {
                    return Err(ManagerError::WorkersNotYetInstalled(deployment_id.to_string()));
                }
                ExecutionStatus::Failed => {
                    return Err(ManagerError::Internal(format!(
                        "can't launch executions since workers for deployment {deployment_id} failed to be installed: {}",
                        execution.error.as_deref().unwrap_or("unknown error"))));
                }
                ExecutionStatus::Cancelled => {
                    return Err(ManagerError::Internal(format!(
                        "can't launch executions since workers installation for deployment {deployment_id} was cancelled")));
                }
                ExecutionStatus::Pending if !is_retry => {
                    // absorb async-dispatch lag before concluding anything
                    sleep(self.config.precheck_delay).await;
                    is_retry = true;
                }
                ExecutionStatus::Pending => {
                    return Err(self.pending_workers_diagnostic(deployment_id, &execution.id).await);
                }
            }
        }
    }

    /// Still `pending` after the delayed re-check: the workflow never made
    /// it past submission. Ask the task system what actually happened.
    async fn pending_workers_diagnostic(&self, deployment_id: &str, task_id: &str) -> ManagerError {
        let base = format!("can't launch executions since workers for deployment {deployment_id} haven't been \
                            installed (execution status is still 'pending')");
        match self.dispatcher.get_task_status(task_id).await {
            Ok(TaskStatus::Failure) => {
                let detail = self.dispatcher
                                 .get_failed_task_error(task_id)
                                 .await
                                 .unwrap_or_else(|| "no error available".to_string());
                ManagerError::Internal(format!("{base}; task status is FAILURE; error: {detail}"))
            }
            Ok(status) => ManagerError::Internal(format!("{base}; task status is {status}")),
            Err(e) => {
                warn!("workers installation task {task_id} unknown to the dispatcher: {e}");
                ManagerError::Internal(format!("{base}; task status unavailable: {e}"))
            }
        }
    }

    // ------------------------------------------------------------------

    /// Count-reconciliation fence against an eventually-consistent backend:
    /// poll until the visible count reaches the expected one, hard error on
    /// expiry.
    async fn wait_for_count<F>(&self,
                               expected: usize,
                               what: &str,
                               deployment_id: &str,
                               fetch: F)
                               -> Result<(), ManagerError>
        where F: Fn() -> Result<usize, StorageError>
    {
        let outcome = wait_until(self.config.count_fence, || {
                          let current = fetch();
                          async move {
                              match current {
                                  Ok(count) if count >= expected => Some(Ok(())),
                                  Ok(_) => None,
                                  Err(e) => Some(Err(e)),
                              }
                          }
                      }).await;
        match outcome {
            Ok(inner) => inner.map_err(ManagerError::from),
            Err(_) => Err(ManagerError::Timeout(format!(
                "timed out while waiting for {what} count for deployment {deployment_id}"))),
        }
    }
}

//! Postgres (Diesel) implementation of the core's `StorageManager`.
//!
//! Design notes:
//! - Parity with the in-memory backend: same create-once conflicts, same
//!   optimistic-versioning rules, same cascade on deployment deletion. The
//!   core's tests define the contract; this module only changes where the
//!   rows live.
//! - Plan-shaped payloads (plans, properties, relationships) are stored as
//!   JSONB and round-tripped through serde, so schema churn in the plan
//!   format does not require migrations.
//! - Transient connection errors are retried with a small backoff before
//!   surfacing as `StorageError::Backend`.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use log::{debug, warn};
use serde_json::Value;

use nimbus_core::errors::StorageError;
use nimbus_core::storage::StorageManager;
use nimbus_domain::{Blueprint, Deployment, Execution, ExecutionStatus, Node, NodeInstance};

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::{blueprints, deployments, executions, node_instances, nodes};

/// r2d2 pool of Postgres connections. Pending migrations run once when the
/// pool is built.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Connection seam: lets tests inject something other than a live pool.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError>;
}

/// `ConnectionProvider` backed by an r2d2 pool.
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict => true,
        PersistenceError::TransientIo(_) => true,
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
            || m.contains("connection closed")
            || m.contains("connection refused")
            || m.contains("timeout")
        }
        _ => false,
    }
}

/// Up to 3 extra attempts with 15ms/30ms/45ms backoff for transient errors.
fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable error (attempt {}): {:?} -> sleeping {}ms", attempts + 1, e, delay_ms);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

/// Translates a persistence failure into the core's storage vocabulary,
/// attaching the entity kind and id the caller was working with.
fn storage_err(kind: &'static str, id: &str, e: PersistenceError) -> StorageError {
    match e {
        PersistenceError::NotFound => StorageError::NotFound { kind, id: id.to_string() },
        PersistenceError::UniqueViolation(_) => StorageError::AlreadyExists { kind, id: id.to_string() },
        other => StorageError::Backend(other.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, PersistenceError> {
    serde_json::to_value(value).map_err(|e| PersistenceError::Unknown(format!("serialize: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, PersistenceError> {
    serde_json::from_value(value).map_err(|e| PersistenceError::Unknown(format!("deserialize: {e}")))
}

fn status_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Pending => "pending",
        ExecutionStatus::Launched => "launched",
        ExecutionStatus::Terminated => "terminated",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Cancelled => "cancelled",
    }
}

fn parse_status(s: &str) -> Result<ExecutionStatus, PersistenceError> {
    match s {
        "pending" => Ok(ExecutionStatus::Pending),
        "launched" => Ok(ExecutionStatus::Launched),
        "terminated" => Ok(ExecutionStatus::Terminated),
        "failed" => Ok(ExecutionStatus::Failed),
        "cancelled" => Ok(ExecutionStatus::Cancelled),
        other => Err(PersistenceError::Unknown(format!("unknown execution status '{other}'"))),
    }
}

// ---------------------------------------------------------------------------
// row types

#[derive(Queryable, Debug)]
struct BlueprintRow {
    id: String,
    plan: Value,
    source: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BlueprintRow {
    fn into_domain(self) -> Result<Blueprint, PersistenceError> {
        Ok(Blueprint { id: self.id,
                       plan: from_json(self.plan)?,
                       source: self.source,
                       created_at: self.created_at,
                       updated_at: self.updated_at })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = blueprints)]
struct NewBlueprintRow<'a> {
    id: &'a str,
    plan: &'a Value,
    source: &'a str,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Queryable, Debug)]
struct DeploymentRow {
    id: String,
    blueprint_id: String,
    plan: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DeploymentRow {
    fn into_domain(self) -> Result<Deployment, PersistenceError> {
        Ok(Deployment { id: self.id,
                        blueprint_id: self.blueprint_id,
                        plan: from_json(self.plan)?,
                        created_at: self.created_at,
                        updated_at: self.updated_at })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = deployments)]
struct NewDeploymentRow<'a> {
    id: &'a str,
    blueprint_id: &'a str,
    plan: &'a Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Queryable, Debug)]
struct NodeRow {
    id: String,
    deployment_id: String,
    blueprint_id: String,
    node_type: String,
    type_hierarchy: Value,
    number_of_instances: i32,
    host_id: Option<String>,
    properties: Value,
    operations: Value,
    plugins: Value,
    plugins_to_install: Option<Value>,
    relationships: Value,
}

impl NodeRow {
    fn into_domain(self) -> Result<Node, PersistenceError> {
        Ok(Node { id: self.id,
                  deployment_id: self.deployment_id,
                  blueprint_id: self.blueprint_id,
                  node_type: self.node_type,
                  type_hierarchy: from_json(self.type_hierarchy)?,
                  number_of_instances: self.number_of_instances as u32,
                  host_id: self.host_id,
                  properties: self.properties,
                  operations: self.operations,
                  plugins: self.plugins,
                  plugins_to_install: self.plugins_to_install,
                  relationships: from_json(self.relationships)? })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = nodes)]
struct NewNodeRow<'a> {
    id: &'a str,
    deployment_id: &'a str,
    blueprint_id: &'a str,
    node_type: &'a str,
    type_hierarchy: Value,
    number_of_instances: i32,
    host_id: Option<&'a str>,
    properties: &'a Value,
    operations: &'a Value,
    plugins: &'a Value,
    plugins_to_install: Option<&'a Value>,
    relationships: Value,
}

#[derive(Queryable, Debug)]
struct NodeInstanceRow {
    id: String,
    node_id: String,
    deployment_id: String,
    host_id: Option<String>,
    relationships: Value,
    state: String,
    runtime_properties: Option<Value>,
    version: Option<i32>,
}

impl NodeInstanceRow {
    fn into_domain(self) -> Result<NodeInstance, PersistenceError> {
        Ok(NodeInstance { id: self.id,
                          node_id: self.node_id,
                          deployment_id: self.deployment_id,
                          host_id: self.host_id,
                          relationships: from_json(self.relationships)?,
                          state: self.state,
                          runtime_properties: self.runtime_properties,
                          version: self.version.map(|v| v as u32) })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = node_instances)]
struct NewNodeInstanceRow<'a> {
    id: &'a str,
    node_id: &'a str,
    deployment_id: &'a str,
    host_id: Option<&'a str>,
    relationships: Value,
    state: &'a str,
    runtime_properties: Option<&'a Value>,
    version: Option<i32>,
}

#[derive(Queryable, Debug)]
struct ExecutionRow {
    id: String,
    status: String,
    created_at: DateTime<Utc>,
    blueprint_id: String,
    workflow_id: String,
    deployment_id: String,
    internal_workflow_id: Option<String>,
    error: Option<String>,
}

impl ExecutionRow {
    fn into_domain(self) -> Result<Execution, PersistenceError> {
        Ok(Execution { id: self.id,
                       status: parse_status(&self.status)?,
                       created_at: self.created_at,
                       blueprint_id: self.blueprint_id,
                       workflow_id: self.workflow_id,
                       deployment_id: self.deployment_id,
                       internal_workflow_id: self.internal_workflow_id,
                       error: self.error })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = executions)]
struct NewExecutionRow<'a> {
    id: &'a str,
    status: &'a str,
    created_at: DateTime<Utc>,
    blueprint_id: &'a str,
    workflow_id: &'a str,
    deployment_id: &'a str,
    internal_workflow_id: Option<&'a str>,
    error: Option<&'a str>,
}

// ---------------------------------------------------------------------------

/// Diesel-backed `StorageManager`. Generic over the connection seam so unit
/// tests can simulate connection failures without a database.
pub struct PgStorageManager<P: ConnectionProvider> {
    provider: P,
}

impl PgStorageManager<PoolProvider> {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { provider: PoolProvider { pool } }
    }
}

impl<P: ConnectionProvider> PgStorageManager<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    fn run<T, F>(&self, f: F) -> Result<T, PersistenceError>
        where F: Fn(&mut PgConnection) -> Result<T, PersistenceError>
    {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            f(&mut conn)
        })
    }
}

impl<P: ConnectionProvider> StorageManager for PgStorageManager<P> {
    fn put_blueprint(&self, blueprint: Blueprint) -> Result<(), StorageError> {
        debug!("put_blueprint id={}", blueprint.id);
        let plan = to_json(&blueprint.plan).map_err(|e| storage_err("blueprint", &blueprint.id, e))?;
        self.run(|conn| {
                let row = NewBlueprintRow { id: &blueprint.id,
                                            plan: &plan,
                                            source: &blueprint.source,
                                            created_at: blueprint.created_at,
                                            updated_at: blueprint.updated_at };
                diesel::insert_into(blueprints::table).values(&row).execute(conn)?;
                Ok(())
            })
            .map_err(|e| storage_err("blueprint", &blueprint.id, e))
    }

    fn get_blueprint(&self, id: &str) -> Result<Blueprint, StorageError> {
        self.run(|conn| {
                let row: BlueprintRow = blueprints::table.find(id).first(conn)?;
                row.into_domain()
            })
            .map_err(|e| storage_err("blueprint", id, e))
    }

    fn blueprints_list(&self) -> Result<Vec<Blueprint>, StorageError> {
        self.run(|conn| {
                let rows: Vec<BlueprintRow> = blueprints::table.order(blueprints::created_at.asc()).load(conn)?;
                rows.into_iter().map(BlueprintRow::into_domain).collect()
            })
            .map_err(|e| storage_err("blueprint", "*", e))
    }

    fn delete_blueprint(&self, id: &str) -> Result<Blueprint, StorageError> {
        debug!("delete_blueprint id={id}");
        self.run(|conn| {
                conn.build_transaction().read_write().run(|tx| {
                    let row: BlueprintRow = blueprints::table.find(id).first(tx)?;
                    diesel::delete(blueprints::table.find(id)).execute(tx)?;
                    Ok::<BlueprintRow, diesel::result::Error>(row)
                })
                .map_err(PersistenceError::from)?
                .into_domain()
            })
            .map_err(|e| storage_err("blueprint", id, e))
    }

    fn get_blueprint_deployments(&self, blueprint_id: &str) -> Result<Vec<Deployment>, StorageError> {
        self.run(|conn| {
                let rows: Vec<DeploymentRow> = deployments::table.filter(deployments::blueprint_id.eq(blueprint_id))
                                                                 .order(deployments::created_at.asc())
                                                                 .load(conn)?;
                rows.into_iter().map(DeploymentRow::into_domain).collect()
            })
            .map_err(|e| storage_err("deployment", blueprint_id, e))
    }

    fn put_deployment(&self, deployment: Deployment) -> Result<(), StorageError> {
        debug!("put_deployment id={} blueprint_id={}", deployment.id, deployment.blueprint_id);
        let plan = to_json(&deployment.plan).map_err(|e| storage_err("deployment", &deployment.id, e))?;
        self.run(|conn| {
                let row = NewDeploymentRow { id: &deployment.id,
                                             blueprint_id: &deployment.blueprint_id,
                                             plan: &plan,
                                             created_at: deployment.created_at,
                                             updated_at: deployment.updated_at };
                diesel::insert_into(deployments::table).values(&row).execute(conn)?;
                Ok(())
            })
            .map_err(|e| storage_err("deployment", &deployment.id, e))
    }

    fn get_deployment(&self, id: &str) -> Result<Deployment, StorageError> {
        self.run(|conn| {
                let row: DeploymentRow = deployments::table.find(id).first(conn)?;
                row.into_domain()
            })
            .map_err(|e| storage_err("deployment", id, e))
    }

    fn deployments_list(&self) -> Result<Vec<Deployment>, StorageError> {
        self.run(|conn| {
                let rows: Vec<DeploymentRow> = deployments::table.order(deployments::created_at.asc()).load(conn)?;
                rows.into_iter().map(DeploymentRow::into_domain).collect()
            })
            .map_err(|e| storage_err("deployment", "*", e))
    }

    fn delete_deployment(&self, id: &str) -> Result<Deployment, StorageError> {
        debug!("delete_deployment id={id}");
        // one transaction: the deployment row and everything hanging off it
        self.run(|conn| {
                conn.build_transaction().read_write().run(|tx| {
                    let row: DeploymentRow = deployments::table.find(id).first(tx)?;
                    diesel::delete(executions::table.filter(executions::deployment_id.eq(id))).execute(tx)?;
                    diesel::delete(node_instances::table.filter(node_instances::deployment_id.eq(id))).execute(tx)?;
                    diesel::delete(nodes::table.filter(nodes::deployment_id.eq(id))).execute(tx)?;
                    diesel::delete(deployments::table.find(id)).execute(tx)?;
                    Ok::<DeploymentRow, diesel::result::Error>(row)
                })
                .map_err(PersistenceError::from)?
                .into_domain()
            })
            .map_err(|e| storage_err("deployment", id, e))
    }

    fn put_node(&self, node: Node) -> Result<(), StorageError> {
        let type_hierarchy = to_json(&node.type_hierarchy).map_err(|e| storage_err("node", &node.id, e))?;
        let relationships = to_json(&node.relationships).map_err(|e| storage_err("node", &node.id, e))?;
        self.run(|conn| {
                let row = NewNodeRow { id: &node.id,
                                       deployment_id: &node.deployment_id,
                                       blueprint_id: &node.blueprint_id,
                                       node_type: &node.node_type,
                                       type_hierarchy: type_hierarchy.clone(),
                                       number_of_instances: node.number_of_instances as i32,
                                       host_id: node.host_id.as_deref(),
                                       properties: &node.properties,
                                       operations: &node.operations,
                                       plugins: &node.plugins,
                                       plugins_to_install: node.plugins_to_install.as_ref(),
                                       relationships: relationships.clone() };
                diesel::insert_into(nodes::table).values(&row).execute(conn)?;
                Ok(())
            })
            .map_err(|e| storage_err("node", &node.id, e))
    }

    fn get_nodes(&self, deployment_id: &str) -> Result<Vec<Node>, StorageError> {
        self.run(|conn| {
                let rows: Vec<NodeRow> = nodes::table.filter(nodes::deployment_id.eq(deployment_id))
                                                     .order(nodes::id.asc())
                                                     .load(conn)?;
                rows.into_iter().map(NodeRow::into_domain).collect()
            })
            .map_err(|e| storage_err("node", deployment_id, e))
    }

    fn put_node_instance(&self, instance: NodeInstance) -> Result<(), StorageError> {
        let relationships = to_json(&instance.relationships).map_err(|e| storage_err("node instance", &instance.id, e))?;
        self.run(|conn| {
                let row = NewNodeInstanceRow { id: &instance.id,
                                               node_id: &instance.node_id,
                                               deployment_id: &instance.deployment_id,
                                               host_id: instance.host_id.as_deref(),
                                               relationships: relationships.clone(),
                                               state: &instance.state,
                                               runtime_properties: instance.runtime_properties.as_ref(),
                                               version: instance.version.map(|v| v as i32) };
                diesel::insert_into(node_instances::table).values(&row).execute(conn)?;
                Ok(())
            })
            .map_err(|e| storage_err("node instance", &instance.id, e))
    }

    fn get_node_instance(&self, id: &str) -> Result<NodeInstance, StorageError> {
        self.run(|conn| {
                let row: NodeInstanceRow = node_instances::table.find(id).first(conn)?;
                row.into_domain()
            })
            .map_err(|e| storage_err("node instance", id, e))
    }

    fn get_node_instances(&self, deployment_id: &str) -> Result<Vec<NodeInstance>, StorageError> {
        self.run(|conn| {
                let rows: Vec<NodeInstanceRow> =
                    node_instances::table.filter(node_instances::deployment_id.eq(deployment_id))
                                         .order(node_instances::id.asc())
                                         .load(conn)?;
                rows.into_iter().map(NodeInstanceRow::into_domain).collect()
            })
            .map_err(|e| storage_err("node instance", deployment_id, e))
    }

    fn update_node_instance_state(&self, id: &str, state: &str) -> Result<NodeInstance, StorageError> {
        debug!("update_node_instance_state id={id} state={state}");
        self.run(|conn| {
                let row: NodeInstanceRow = diesel::update(node_instances::table.find(id))
                    .set(node_instances::state.eq(state))
                    .get_result(conn)?;
                row.into_domain()
            })
            .map_err(|e| storage_err("node instance", id, e))
    }

    fn update_node_instance(&self,
                            id: &str,
                            runtime_properties: Option<Value>,
                            expected_version: Option<u32>)
                            -> Result<NodeInstance, StorageError> {
        debug!("update_node_instance id={id} expected_version={expected_version:?}");
        // row lock + compare inside one transaction; None means the stored
        // version did not match
        let updated = self.run(|conn| {
                              conn.build_transaction().read_write().run(|tx| {
                                  let row: NodeInstanceRow =
                                      node_instances::table.find(id).for_update().first(tx)?;
                                  if row.version != expected_version.map(|v| v as i32) {
                                      return Ok::<Option<NodeInstanceRow>, diesel::result::Error>(None);
                                  }
                                  let next_version = expected_version.map_or(1, |v| v + 1) as i32;
                                  let row: NodeInstanceRow = diesel::update(node_instances::table.find(id))
                                      .set((node_instances::runtime_properties.eq(runtime_properties.as_ref()),
                                            node_instances::version.eq(Some(next_version))))
                                      .get_result(tx)?;
                                  Ok(Some(row))
                              })
                              .map_err(PersistenceError::from)
                          })
                          .map_err(|e| storage_err("node instance", id, e))?;
        match updated {
            Some(row) => row.into_domain().map_err(|e| storage_err("node instance", id, e)),
            None => Err(StorageError::VersionConflict { id: id.to_string() }),
        }
    }

    fn put_execution(&self, execution: Execution) -> Result<(), StorageError> {
        debug!("put_execution id={} workflow_id={}", execution.id, execution.workflow_id);
        self.run(|conn| {
                let row = NewExecutionRow { id: &execution.id,
                                            status: status_str(execution.status),
                                            created_at: execution.created_at,
                                            blueprint_id: &execution.blueprint_id,
                                            workflow_id: &execution.workflow_id,
                                            deployment_id: &execution.deployment_id,
                                            internal_workflow_id: execution.internal_workflow_id.as_deref(),
                                            error: execution.error.as_deref() };
                diesel::insert_into(executions::table).values(&row).execute(conn)?;
                Ok(())
            })
            .map_err(|e| storage_err("execution", &execution.id, e))
    }

    fn get_execution(&self, id: &str) -> Result<Execution, StorageError> {
        self.run(|conn| {
                let row: ExecutionRow = executions::table.find(id).first(conn)?;
                row.into_domain()
            })
            .map_err(|e| storage_err("execution", id, e))
    }

    fn executions_list(&self) -> Result<Vec<Execution>, StorageError> {
        self.run(|conn| {
                let rows: Vec<ExecutionRow> = executions::table.order(executions::created_at.asc()).load(conn)?;
                rows.into_iter().map(ExecutionRow::into_domain).collect()
            })
            .map_err(|e| storage_err("execution", "*", e))
    }

    fn get_deployment_executions(&self, deployment_id: &str) -> Result<Vec<Execution>, StorageError> {
        self.run(|conn| {
                let rows: Vec<ExecutionRow> = executions::table.filter(executions::deployment_id.eq(deployment_id))
                                                               .order(executions::created_at.asc())
                                                               .load(conn)?;
                rows.into_iter().map(ExecutionRow::into_domain).collect()
            })
            .map_err(|e| storage_err("execution", deployment_id, e))
    }

    fn update_execution(&self,
                        id: &str,
                        status: ExecutionStatus,
                        error: Option<String>)
                        -> Result<Execution, StorageError> {
        debug!("update_execution id={id} status={status}");
        self.run(|conn| {
                let row: ExecutionRow = diesel::update(executions::table.find(id))
                    .set((executions::status.eq(status_str(status)), executions::error.eq(error.as_deref())))
                    .get_result(conn)?;
                row.into_domain()
            })
            .map_err(|e| storage_err("execution", id, e))
    }
}

/// Builds an r2d2 pool and applies pending migrations on the first checkout.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = if min_size == 0 { 1 } else { min_size };
    let validated_max = if max_size == 0 { 1 } else { max_size };
    if validated_min > validated_max {
        warn!("min_size > max_size ({validated_min} > {validated_max}), clamping min to max");
    }
    let final_min = validated_min.min(validated_max);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(final_min))
                                    .max_size(validated_max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Development helper: `.env` + `DATABASE_URL` to a migrated pool.
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env()?;
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}

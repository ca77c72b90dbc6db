//! Maintenance CLI over the persistent store.
//!
//! Read and callback-style operations only; anything that dispatches remote
//! tasks goes through the manager service, not this tool.
//!
//! Usage:
//!   nimbus-cli blueprints
//!   nimbus-cli deployments [--blueprint <ID>]
//!   nimbus-cli executions --deployment <ID>
//!   nimbus-cli instances --deployment <ID>
//!   nimbus-cli set-execution-status --id <ID> --status <STATUS> [--error <TXT>]
//!   nimbus-cli set-instance-state --id <ID> --state <STATE>

use nimbus_core::storage::StorageManager;
use nimbus_domain::ExecutionStatus;
use nimbus_persistence::pg::PgStorageManager;
use nimbus_persistence::PoolProvider;

fn storage() -> PgStorageManager<PoolProvider> {
    let _ = dotenvy::dotenv();
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("[nimbus-cli] DATABASE_URL is required");
        std::process::exit(4);
    }
    let pool = match nimbus_persistence::build_dev_pool_from_env() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("[nimbus-cli] pool error: {e}");
            std::process::exit(5);
        }
    };
    PgStorageManager::from_pool(pool)
}

/// `--key value` option scanner over the remaining args.
fn opt(args: &[String], key: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == key {
            return args.get(i + 1).cloned();
        }
        i += 1;
    }
    None
}

fn parse_status(s: &str) -> ExecutionStatus {
    match s {
        "pending" => ExecutionStatus::Pending,
        "launched" => ExecutionStatus::Launched,
        "terminated" => ExecutionStatus::Terminated,
        "failed" => ExecutionStatus::Failed,
        "cancelled" => ExecutionStatus::Cancelled,
        other => {
            eprintln!("[nimbus-cli] unknown status '{other}' (expected pending|launched|terminated|failed|cancelled)");
            std::process::exit(3);
        }
    }
}

fn require(value: Option<String>, usage: &str) -> String {
    match value {
        Some(v) => v,
        None => {
            eprintln!("Usage: {usage}");
            std::process::exit(2);
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("");
    let rest = &args[2.min(args.len())..];

    match command {
        "blueprints" => {
            let storage = storage();
            match storage.blueprints_list() {
                Ok(blueprints) => {
                    for b in blueprints {
                        println!("{}\tcreated={}", b.id, b.created_at);
                    }
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(5);
                }
            }
        }
        "deployments" => {
            let storage = storage();
            let result = match opt(rest, "--blueprint") {
                Some(blueprint_id) => storage.get_blueprint_deployments(&blueprint_id),
                None => storage.deployments_list(),
            };
            match result {
                Ok(deployments) => {
                    for d in deployments {
                        println!("{}\tblueprint={}\tcreated={}", d.id, d.blueprint_id, d.created_at);
                    }
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(5);
                }
            }
        }
        "executions" => {
            let deployment = require(opt(rest, "--deployment"), "nimbus-cli executions --deployment <ID>");
            let storage = storage();
            match storage.get_deployment_executions(&deployment) {
                Ok(executions) => {
                    for e in executions {
                        println!("{}\tworkflow={}\tstatus={}\terror={}",
                                 e.id,
                                 e.workflow_id,
                                 e.status,
                                 e.error.as_deref().unwrap_or("-"));
                    }
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(5);
                }
            }
        }
        "instances" => {
            let deployment = require(opt(rest, "--deployment"), "nimbus-cli instances --deployment <ID>");
            let storage = storage();
            match storage.get_node_instances(&deployment) {
                Ok(instances) => {
                    for i in instances {
                        println!("{}\tnode={}\tstate={}\tversion={:?}", i.id, i.node_id, i.state, i.version);
                    }
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(5);
                }
            }
        }
        "set-execution-status" => {
            let usage = "nimbus-cli set-execution-status --id <ID> --status <STATUS> [--error <TXT>]";
            let id = require(opt(rest, "--id"), usage);
            let status = parse_status(&require(opt(rest, "--status"), usage));
            let error = opt(rest, "--error");
            let storage = storage();
            match storage.update_execution(&id, status, error) {
                Ok(execution) => println!("updated: {} -> {}", execution.id, execution.status),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(5);
                }
            }
        }
        "set-instance-state" => {
            let usage = "nimbus-cli set-instance-state --id <ID> --state <STATE>";
            let id = require(opt(rest, "--id"), usage);
            let state = require(opt(rest, "--state"), usage);
            let storage = storage();
            match storage.update_node_instance_state(&id, &state) {
                Ok(instance) => println!("updated: {} -> {}", instance.id, instance.state),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(5);
                }
            }
        }
        _ => {
            println!("nimbus-cli: use 'blueprints', 'deployments', 'executions', 'instances', \
                      'set-execution-status' or 'set-instance-state'");
        }
    }
}

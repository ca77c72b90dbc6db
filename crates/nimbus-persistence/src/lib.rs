//! nimbus-persistence
//!
//! Postgres implementation of the core's `StorageManager` contract, plus
//! connection and migration utilities. Entities are stored as relational
//! rows with JSONB columns for the plan-shaped payloads, so the manager's
//! create-once, cascade-delete and optimistic-versioning semantics hold
//! under concurrent access.
//!
//! Modules:
//! - `pg`: the Diesel-backed `PgStorageManager` and pool plumbing.
//! - `migrations`: embedded Diesel migration runner.
//! - `config`: connection configuration from the environment.
//! - `schema`: Diesel table declarations.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, ConnectionProvider, PgPool, PgStorageManager, PoolProvider};

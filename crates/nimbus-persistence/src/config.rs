//! Connection configuration from environment variables.
//! Uses the `DATABASE_URL` convention plus optional pool sizing.

use dotenvy::dotenv;
use once_cell::sync::Lazy;
use std::env;

// Lazy one-time load of the .env file.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // missing .env is fine
});

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn from_env() -> Result<Self, crate::error::PersistenceError> {
        Lazy::force(&DOTENV_LOADED);
        let url = env::var("DATABASE_URL")
            .map_err(|_| crate::error::PersistenceError::Unknown("DATABASE_URL not set".into()))?;
        let min_connections = env::var("DATABASE_MIN_CONNECTIONS").ok().and_then(|v| v.parse().ok()).unwrap_or(2);
        let max_connections = env::var("DATABASE_MAX_CONNECTIONS").ok().and_then(|v| v.parse().ok()).unwrap_or(16);
        Ok(Self { url, min_connections, max_connections })
    }
}

/// Force early .env loading from embedding applications.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}

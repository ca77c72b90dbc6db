//! Manager timing configuration, overridable from the environment.
//! Uses the `NIMBUS_*` convention; `.env` is loaded lazily once.

use std::env;
use std::time::Duration;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

use crate::retry::RetryPolicy;

static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // missing .env is fine
});

/// Timeouts and poll intervals for the core's bounded waits. Every blocking
/// wait in the manager is driven by one of these knobs so tests can shrink
/// them to milliseconds.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Delay before the single re-check when the workers-installation
    /// execution still reads `pending`.
    pub precheck_delay: Duration,
    /// Count-reconciliation fence for nodes / node instances after
    /// deployment creation.
    pub count_fence: RetryPolicy,
    /// Bound on the synchronous workers-uninstall wait during deployment
    /// deletion.
    pub uninstall_timeout: Duration,
    /// Per-step bound used by the graph runner.
    pub task_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self { precheck_delay: Duration::from_secs(5),
               count_fence: RetryPolicy { timeout: Duration::from_secs(30),
                                          interval: Duration::from_secs(1) },
               uninstall_timeout: Duration::from_secs(300),
               task_timeout: Duration::from_secs(60) }
    }
}

impl ManagerConfig {
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        let secs = |key: &str, default: u64| {
            env::var(key).ok().and_then(|v| v.parse().ok()).map(Duration::from_secs).unwrap_or(Duration::from_secs(default))
        };
        Self { precheck_delay: secs("NIMBUS_PRECHECK_DELAY_SECS", 5),
               count_fence: RetryPolicy { timeout: secs("NIMBUS_COUNT_FENCE_TIMEOUT_SECS", 30),
                                          interval: secs("NIMBUS_COUNT_FENCE_INTERVAL_SECS", 1) },
               uninstall_timeout: secs("NIMBUS_UNINSTALL_TIMEOUT_SECS", 300),
               task_timeout: secs("NIMBUS_TASK_TIMEOUT_SECS", 60) }
    }

    /// Shrinks every wait to milliseconds; intended for tests and demos.
    pub fn fast() -> Self {
        Self { precheck_delay: Duration::from_millis(10),
               count_fence: RetryPolicy { timeout: Duration::from_millis(500),
                                          interval: Duration::from_millis(5) },
               uninstall_timeout: Duration::from_millis(500),
               task_timeout: Duration::from_millis(500) }
    }
}

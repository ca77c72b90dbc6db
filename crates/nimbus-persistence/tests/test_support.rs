use nimbus_persistence::config::DbConfig;
use nimbus_persistence::pg::{build_pool, PgPool};
use once_cell::sync::Lazy;

pub static TEST_POOL: Lazy<Option<PgPool>> = Lazy::new(|| {
    if std::env::var("DATABASE_URL").is_err() {
        return None;
    }
    let cfg = match DbConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("test pool config unavailable: {e}");
            return None;
        }
    };
    match build_pool(&cfg.url, 1, 1) {
        Ok(p) => Some(p),
        Err(e) => {
            eprintln!("could not build test pool: {e}");
            None
        }
    }
});

/// Runs `f` against the shared test pool; `None` (skip) when no database is
/// configured.
pub fn with_pool<F, R>(f: F) -> Option<R>
    where F: FnOnce(&PgPool) -> R
{
    TEST_POOL.as_ref().map(|p| f(p))
}

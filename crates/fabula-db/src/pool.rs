//! Database connection pool management.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use fabula_core::{Error, Result};

/// Connection pool settings.
///
/// Enrichment runs hold a connection per concurrent chunk pipeline plus one
/// for the orchestrator loop, so the defaults leave headroom over the default
/// batch concurrency.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections to maintain.
    pub min_connections: u32,
    /// How long to wait for a free connection before failing the acquire.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Create pool settings from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `FABULA_DB_MAX_CONNECTIONS` | `10` | Pool connection ceiling |
    /// | `FABULA_DB_MIN_CONNECTIONS` | `1` | Connections kept warm |
    /// | `FABULA_DB_ACQUIRE_TIMEOUT_SECS` | `30` | Acquire wait before failure |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<T>().ok())
                .unwrap_or(fallback)
        }

        Self {
            max_connections: env_parse("FABULA_DB_MAX_CONNECTIONS", defaults.max_connections)
                .max(1),
            min_connections: env_parse("FABULA_DB_MIN_CONNECTIONS", defaults.min_connections),
            acquire_timeout: Duration::from_secs(env_parse(
                "FABULA_DB_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout.as_secs(),
            )),
        }
    }
}

/// Create a PostgreSQL connection pool configured from the environment.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::from_env()).await
}

/// Create a PostgreSQL connection pool with explicit settings.
pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    info!(
        subsystem = "db",
        component = "pool",
        op = "create",
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        acquire_timeout_secs = config.acquire_timeout.as_secs(),
        "Creating database connection pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections.min(config.max_connections))
        .acquire_timeout(config.acquire_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "established",
        pool_size = pool.size(),
        pool_idle = pool.num_idle(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database connection pool established"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
    }

    // Single test so env-var mutation never races a parallel sibling.
    #[test]
    fn test_pool_config_from_env() {
        std::env::set_var("FABULA_DB_MAX_CONNECTIONS", "25");
        std::env::set_var("FABULA_DB_ACQUIRE_TIMEOUT_SECS", "5");

        let config = PoolConfig::from_env();
        assert_eq!(config.max_connections, 25);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));

        std::env::set_var("FABULA_DB_MAX_CONNECTIONS", "0");
        assert_eq!(PoolConfig::from_env().max_connections, 1, "floor of one");

        std::env::remove_var("FABULA_DB_MAX_CONNECTIONS");
        std::env::remove_var("FABULA_DB_ACQUIRE_TIMEOUT_SECS");
    }
}

//! PostgreSQL connection pool.
//!
//! Every completion the dispatcher handles takes two short transactions
//! (record the outcome, claim the dispatch key), so the pool is sized from the
//! worker's concurrency rather than from a fixed guess.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use docflow_core::{Error, Result};

/// Default maximum number of connections in the pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;

/// Default time to wait for a free connection, in seconds.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Default idle timeout in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Connections kept on top of one per running job (watchdog, ingestion).
const RESERVED_CONNECTIONS: u32 = 2;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a caller waits for a free connection.
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

impl PoolConfig {
    /// Read `DOCFLOW_DB_MAX_CONNECTIONS` and `DOCFLOW_DB_ACQUIRE_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let max_connections = std::env::var("DOCFLOW_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_CONNECTIONS)
            .max(1);
        let acquire_timeout = std::env::var("DOCFLOW_DB_ACQUIRE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS);
        Self {
            max_connections,
            acquire_timeout: Duration::from_secs(acquire_timeout),
            ..Self::default()
        }
    }

    /// Grow the pool so `max_concurrent_jobs` completions never wait on
    /// each other for a connection. Never shrinks a configured size.
    pub fn sized_for_workers(mut self, max_concurrent_jobs: usize) -> Self {
        let needed = u32::try_from(max_concurrent_jobs)
            .unwrap_or(u32::MAX)
            .saturating_add(RESERVED_CONNECTIONS);
        self.max_connections = self.max_connections.max(needed);
        self
    }

    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Create a pool with default configuration.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    let target = redact_url(database_url);

    info!(
        subsystem = "db",
        component = "pool",
        op = "create",
        target = %target,
        max_connections = config.max_connections,
        acquire_timeout_secs = config.acquire_timeout.as_secs(),
        "Connecting document store"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections.min(config.max_connections))
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "create",
        target = %target,
        duration_ms = start.elapsed().as_millis() as u64,
        "Document store connected"
    );
    Ok(pool)
}

/// Drop the credentials from a connection URL so it can be logged.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

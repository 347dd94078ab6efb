//! Database connection pool management
//!
//! Builds the PostgreSQL pool for the event processor and verifies the
//! database is reachable before the service starts serving.

pub mod env_utils;
mod metrics;

use metrics::update_pool_metrics;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info};

use env_utils::{parse_env_with_default, required_env_var};

/// How often the pool gauges are refreshed
const GAUGE_REFRESH: Duration = Duration::from_secs(30);

/// Database connection pool configuration
#[derive(Clone)]
pub struct DbConfig {
    /// Service name for metrics labeling
    pub service_name: String,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection creation timeout (new connection to PostgreSQL)
    pub connect_timeout_secs: u64,
    /// Connection acquisition timeout (get connection from pool)
    pub acquire_timeout_secs: u64,
    /// Connection idle timeout
    pub idle_timeout_secs: u64,
    /// Connection maximum lifetime
    pub max_lifetime_secs: u64,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("service_name", &self.service_name)
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .field("max_lifetime_secs", &self.max_lifetime_secs)
            .finish()
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            service_name: String::from("unknown"),
            database_url: String::new(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout_secs: 5,
            acquire_timeout_secs: 10,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

impl DbConfig {
    /// Create a new DbConfig from environment variables
    ///
    /// `DATABASE_URL` is required; the legacy `DB_URL` name is accepted too.
    pub fn from_env(service_name: &str) -> Result<Self, String> {
        let database_url = required_env_var(&["DATABASE_URL", "DB_URL"])?;
        let defaults = Self::default();

        Ok(Self {
            service_name: service_name.to_string(),
            database_url,
            max_connections: parse_env_with_default(
                "DB_MAX_CONNECTIONS",
                defaults.max_connections,
            ),
            min_connections: parse_env_with_default(
                "DB_MIN_CONNECTIONS",
                defaults.min_connections,
            ),
            connect_timeout_secs: parse_env_with_default(
                "DB_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout_secs,
            ),
            acquire_timeout_secs: parse_env_with_default(
                "DB_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout_secs,
            ),
            idle_timeout_secs: parse_env_with_default(
                "DB_IDLE_TIMEOUT_SECS",
                defaults.idle_timeout_secs,
            ),
            max_lifetime_secs: parse_env_with_default(
                "DB_MAX_LIFETIME_SECS",
                defaults.max_lifetime_secs,
            ),
        })
    }

    /// Log pool configuration details
    pub fn log_config(&self) {
        info!(
            service = %self.service_name,
            max = self.max_connections,
            min = self.min_connections,
            connect_timeout_secs = self.connect_timeout_secs,
            acquire_timeout_secs = self.acquire_timeout_secs,
            idle_timeout_secs = self.idle_timeout_secs,
            max_lifetime_secs = self.max_lifetime_secs,
            "Postgres pool settings"
        );
    }
}

/// Open the pool for one service and prove the database answers
///
/// Fails if the first `SELECT 1` does not come back within
/// `connect_timeout_secs`. On success a task keeps the pool gauges current
/// until the pool is closed.
pub async fn create_pool(config: DbConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .test_before_acquire(true)
        .connect(&config.database_url)
        .await?;

    verify_connection(&pool, &config).await?;
    info!(service = %config.service_name, "Postgres reachable, pool ready");

    spawn_pool_gauges(pool.clone(), config.service_name.clone());
    Ok(pool)
}

async fn verify_connection(pool: &PgPool, config: &DbConfig) -> Result<(), sqlx::Error> {
    let select_one = sqlx::query("SELECT 1").execute(pool);
    match tokio::time::timeout(Duration::from_secs(config.connect_timeout_secs), select_one).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => {
            error!(service = %config.service_name, error = %e, "Postgres rejected SELECT 1");
            Err(e)
        }
        Err(_) => {
            error!(
                service = %config.service_name,
                timeout_secs = config.connect_timeout_secs,
                "Postgres did not answer SELECT 1 in time"
            );
            Err(verification_timed_out(config.connect_timeout_secs))
        }
    }
}

fn verification_timed_out(timeout_secs: u64) -> sqlx::Error {
    sqlx::Error::Io(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("no answer from Postgres within {}s", timeout_secs),
    ))
}

fn spawn_pool_gauges(pool: PgPool, service: String) {
    update_pool_metrics(&pool, &service);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(GAUGE_REFRESH);
        loop {
            ticker.tick().await;
            if pool.is_closed() {
                debug!(service = %service, "Pool closed, gauge refresh stopped");
                break;
            }
            update_pool_metrics(&pool, &service);
        }
    });
}

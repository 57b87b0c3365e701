pub mod config;
pub mod migrate;
pub mod operations;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

use crate::db::config::{DbConfig, DbConfigError};

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error("db config error: {0}")]
    Config(#[from] DbConfigError),

    #[error("db connection error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Snapshot of connection health for the health endpoint.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub healthy: bool,
    pub consecutive_failures: u32,
}

/// Postgres handle with a background liveness probe. Everything goes
/// through the one pool; the probe only feeds the health endpoint and logs.
pub struct DatabaseProxy {
    config: DbConfig,
    pool: PgPool,
    healthy: AtomicBool,
    consecutive_failures: AtomicU32,
}

impl DatabaseProxy {
    pub async fn from_env() -> Result<Arc<Self>, DbInitError> {
        let config = DbConfig::from_env()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(&config.primary_url)
            .await?;

        let proxy = Arc::new(Self {
            config,
            pool,
            healthy: AtomicBool::new(true),
            consecutive_failures: AtomicU32::new(0),
        });

        proxy.start_health_monitor();

        Ok(proxy)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            healthy: self.healthy.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }

    fn start_health_monitor(self: &Arc<Self>) {
        let proxy = Arc::clone(self);
        tokio::spawn(async move {
            proxy.health_monitor_loop().await;
        });
    }

    async fn health_monitor_loop(self: Arc<Self>) {
        let interval = self.config.health_check.interval;
        let timeout = self.config.health_check.timeout;
        let threshold = self.config.health_check.failure_threshold;

        loop {
            tokio::time::sleep(interval).await;

            let ping = tokio::time::timeout(
                timeout,
                sqlx::query("SELECT 1").execute(&self.pool),
            )
            .await;

            match ping {
                Ok(Ok(_)) => {
                    if self.consecutive_failures.swap(0, Ordering::Relaxed) >= threshold {
                        tracing::info!("database connection recovered");
                    }
                    self.healthy.store(true, Ordering::Relaxed);
                }
                Ok(Err(err)) => self.record_failure(threshold, &err.to_string()),
                Err(_) => self.record_failure(threshold, "health check timed out"),
            }
        }
    }

    fn record_failure(&self, threshold: u32, reason: &str) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= threshold {
            self.healthy.store(false, Ordering::Relaxed);
            tracing::error!(failures, reason, "database considered unhealthy");
        } else {
            tracing::warn!(failures, reason, "database health check failed");
        }
    }
}

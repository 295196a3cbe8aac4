//! PostgreSQL connection pool management.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::AppConfig;

/// Database connection wrapper
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    /// Connect with pool settings taken from the application config.
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        tracing::info!(
            "Connecting to database with pool config: max={}, min={}, acquire_timeout={}s",
            config.db_max_connections,
            config.db_min_connections,
            config.db_acquire_timeout_secs
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .min_connections(config.db_min_connections)
            .acquire_timeout(Duration::from_secs(config.db_acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(config.db_idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.db_max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        tracing::info!(
            "Database pool established: size={}, idle={}",
            pool.size(),
            pool.num_idle()
        );

        Ok(Self { pool })
    }

    /// Apply embedded migrations.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if database is healthy
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

//! Database module for roster persistence.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use tracing::{debug, info};

use crate::config::DatabaseConfig;

/// Schema of the single table this bot owns.
const USERS_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        jid TEXT PRIMARY KEY,
        username TEXT,
        display_name TEXT,
        alias_jid TEXT,
        profile_pic_url TEXT
    )
"#;

/// Database connection pool.
///
/// Backed by the sqlx `any` driver: Postgres in production, in-memory
/// SQLite in tests. All statements are written to run on both.
#[derive(Debug, Clone)]
pub struct Database {
    pool: AnyPool,
}

impl Database {
    /// Connect using the configured Postgres parameters and ensure the
    /// schema exists.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config.connection_url()?;
        info!("Connecting to database at {}", config.describe());

        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(config.acquire_timeout())
            .connect(&url)
            .await
            .context("connecting to database")?;

        let db = Self { pool };
        db.ensure_schema().await?;

        Ok(db)
    }

    /// Create an in-memory database (for testing).
    #[allow(dead_code)]
    pub async fn in_memory() -> Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(Duration::from_secs(5))
            .connect("sqlite::memory:")
            .await
            .context("connecting to in-memory database")?;

        let db = Self { pool };
        db.ensure_schema().await?;

        Ok(db)
    }

    /// Create the users table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        debug!("Ensuring users table exists");
        sqlx::query(USERS_SCHEMA)
            .execute(&self.pool)
            .await
            .context("creating users table")?;
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Close all connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

//! SQLite persistence for the conversation platform.
//!
//! One [`Store`] wraps the shared pool; entity repositories are grouped per
//! module. The only coordination discipline is row-level uniqueness plus
//! read-then-write idempotency checks — every find-or-create tolerates being
//! invoked twice with the same input.

pub mod campaigns;
pub mod channels;
pub mod contacts;
pub mod conversations;
pub mod error;
pub mod messages;

pub use error::{Error, Result};

use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

/// Shared handle to the relational store, acquired once at startup and
/// injected into each component.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect with a fresh pool and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// In-memory store for tests and local tooling. Uses a single pooled
    /// connection: every `:memory:` connection is its own database, so a
    /// larger pool would scatter tables across invisible databases.
    pub async fn connect_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Run database migrations. Called at application startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used)]
pub(crate) async fn test_store() -> Store {
    Store::connect_memory().await.expect("in-memory store")
}

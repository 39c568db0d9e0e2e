use anyhow::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::config::SecurityConfig;

pub mod migrator;
pub mod repositories;

pub use repositories::user::{CreateUserError, UserRepository};

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    /// Shared-cache in-memory database pinned to a single connection, so every
    /// query sees the same schema for the lifetime of the store.
    pub async fn in_memory() -> Result<Self> {
        Self::with_pool_options("sqlite::memory:", 1, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        let in_memory = db_url.contains(":memory:");

        if !in_memory {
            let path_str = db_url.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .sqlx_logging(false);

        if in_memory {
            // Dropping the last connection would drop the database with it
            opt.max_connections(1).min_connections(1);
        } else {
            opt.max_connections(max_connections)
                .min_connections(min_connections)
                .idle_timeout(Duration::from_secs(300))
                .max_lifetime(Duration::from_secs(600));
        }

        let conn = Database::connect(opt).await?;

        info!(
            "Database connected (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    /// Applies pending migrations. Safe to call repeatedly.
    pub async fn migrate(&self) -> Result<()> {
        use sea_orm_migration::MigratorTrait;

        migrator::Migrator::up(&self.conn, None).await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    #[must_use]
    pub fn user_repo(&self, security: &SecurityConfig) -> UserRepository {
        UserRepository::new(self.conn.clone(), security.clone())
    }
}

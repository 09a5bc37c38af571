//! Database layer for MoodMap
//!
//! Provides:
//! - SeaORM entity models
//! - Repository pattern for data access
//! - Connection pool management
//! - Schema bootstrap from the entity definitions

pub mod models;
mod repository;

pub use repository::{CountrySnapshotRows, RatingWrite, ReplaceSummary, Repository};

pub(crate) use repository::chrono_duration;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema,
};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection (for writes)
    pub primary: DatabaseConnection,

    /// Read replica connection (optional)
    pub replica: Option<DatabaseConnection>,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to primary database...");

        let primary = Database::connect(connect_options(&config.url, config))
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect to primary: {}", e),
            })?;

        // Connect to replica if configured
        let replica = if let Some(ref read_url) = config.read_url {
            info!("Connecting to read replica...");

            let replica_conn = Database::connect(connect_options(read_url, config))
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("Failed to connect to replica: {}", e),
                })?;

            Some(replica_conn)
        } else {
            None
        };

        info!("Database connections established");

        Ok(Self { primary, replica })
    }

    /// Wrap an already established connection
    pub fn from_connection(primary: DatabaseConnection) -> Self {
        Self {
            primary,
            replica: None,
        }
    }

    /// Get the connection for reads (replica if available, otherwise primary)
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Get the connection for writes (always primary)
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Primary ping failed: {}", e),
            })?;

        if let Some(ref replica) = self.replica {
            replica
                .execute_unprepared("SELECT 1")
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("Replica ping failed: {}", e),
                })?;
        }

        Ok(())
    }

    /// Create every table (and declared index) that does not exist yet
    pub async fn create_tables(&self) -> Result<()> {
        let db = self.write();
        let backend = db.get_database_backend();
        let schema = Schema::new(backend);

        // Parents before children so foreign keys resolve
        create_table(db, &schema, models::CountryEntity).await?;
        create_table(db, &schema, models::PostEntity).await?;
        create_table(db, &schema, models::UserMoodEntity).await?;
        create_table(db, &schema, models::FetchLockEntity).await?;
        create_table(db, &schema, models::FetchStatusEntity).await?;

        info!(backend = ?backend, "Database schema ready");
        Ok(())
    }
}

fn connect_options(url: &str, config: &DatabaseConfig) -> ConnectOptions {
    let mut opts = ConnectOptions::new(url);
    opts.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .sqlx_logging(false);
    opts
}

async fn create_table<E>(db: &DatabaseConnection, schema: &Schema, entity: E) -> Result<()>
where
    E: EntityTrait,
{
    let backend = db.get_database_backend();

    let mut table = schema.create_table_from_entity(entity);
    table.if_not_exists();
    db.execute(backend.build(&table)).await?;

    for mut index in schema.create_index_from_entity(entity) {
        index.if_not_exists();
        db.execute(backend.build(&index)).await?;
    }

    Ok(())
}

/// SQLite pools for tests
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A fresh, fully migrated in-memory database.
    ///
    /// Pinned to one connection: every pooled connection to `sqlite::memory:`
    /// would otherwise open its own empty database.
    pub async fn memory_pool() -> DbPool {
        let mut opts = ConnectOptions::new("sqlite::memory:");
        opts.max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);

        let conn = Database::connect(opts).await.expect("in-memory sqlite");
        let pool = DbPool::from_connection(conn);
        pool.create_tables().await.expect("schema");
        pool
    }

    /// A migrated SQLite file with several pooled connections, for tests
    /// where transactions must genuinely overlap. Keep the directory alive
    /// for as long as the pool is used.
    pub async fn file_pool(connections: u32) -> (DbPool, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("moodmap.db").display());

        let mut opts = ConnectOptions::new(url);
        opts.max_connections(connections)
            .min_connections(1)
            .sqlx_logging(false);

        let conn = Database::connect(opts).await.expect("sqlite file");
        let pool = DbPool::from_connection(conn);
        pool.create_tables().await.expect("schema");
        (pool, dir)
    }
}

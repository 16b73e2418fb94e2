//! Durable entity store on SQLite through sqlx

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use super::{EntityStore, StoreResult};
use crate::errors::StoreError;

mod comparisons;
mod documents;
mod helpers;
mod queue;
mod schema;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

fn is_in_memory_url(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        // Every connection to an in-memory database is a separate database
        let max_connections = if is_in_memory_url(database_url) { 1 } else { 10 };
        Self::new_with_pool_config(database_url, max_connections).await
    }

    pub async fn new_with_pool_config(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::from_sqlx(e, "connect", "database"))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(30));

        let options = if is_in_memory_url(database_url) {
            options.journal_mode(SqliteJournalMode::Memory)
        } else {
            options.journal_mode(SqliteJournalMode::Wal)
        };

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30));

        if is_in_memory_url(database_url) {
            // Closing the last connection would drop the database
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::from_sqlx(e, "connect", "database"))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn get_pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl EntityStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn migrate(&self) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::from_sqlx(e, "migrate", "schema"))?;

        for statement in schema::SCHEMA_STATEMENTS {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::from_sqlx(e, "migrate", "schema"))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::from_sqlx(e, "migrate", "schema"))?;

        info!("SQLite schema is up to date");
        Ok(())
    }

    async fn shutdown(&self) {
        self.pool.close().await;
    }
}

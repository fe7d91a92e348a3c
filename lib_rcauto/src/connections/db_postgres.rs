//! # PostgreSQL History Store
//!
//! Keeps every collection in one JSONB table:
//!
//! ```sql
//! rc_documents(id BIGSERIAL, collection TEXT, doc JSONB, inserted_at TIMESTAMPTZ)
//! ```
//!
//! `find` maps the containment filter onto `doc @> $filter`, served by a GIN
//! index. Connections come from a `deadpool_postgres` pool.

use async_trait::async_trait;
use deadpool_postgres::{Config as DeadpoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde_json::Value;
use tokio_postgres::NoTls;

use crate::connections::history_store::{HistoryStore, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS rc_documents (
    id          BIGSERIAL PRIMARY KEY,
    collection  TEXT        NOT NULL,
    doc         JSONB       NOT NULL,
    inserted_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS rc_documents_collection_idx ON rc_documents (collection, inserted_at);
CREATE INDEX IF NOT EXISTS rc_documents_doc_idx ON rc_documents USING GIN (doc jsonb_path_ops);
";

const INSERT: &str = "INSERT INTO rc_documents (collection, doc) VALUES ($1, $2)";
const FIND: &str = "SELECT doc FROM rc_documents WHERE collection = $1 AND doc @> $2 ORDER BY id";

/// History store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PostgresHistoryStore {
    pool: Pool,
}

impl PostgresHistoryStore {
    /// Creates the pool. No connection is opened until first use.
    ///
    /// # Errors
    /// `StoreError::ConnectionError` when the URL cannot be turned into a pool.
    pub fn new(database_url: &str) -> Result<Self, StoreError> {
        let mut cfg = DeadpoolConfig::new();
        cfg.url = Some(database_url.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::ConnectionError(format!("Failed to create database pool: {e}")))?;
        Ok(Self { pool })
    }

    /// Creates the table and indexes if they are missing.
    ///
    /// # Errors
    /// Fails when the database is unreachable or the DDL is rejected.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let client = self.client().await?;
        client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| StoreError::QueryError(e.to_string()))?;
        log::info!("History schema ready");
        Ok(())
    }

    async fn client(&self) -> Result<deadpool_postgres::Client, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))
    }
}

#[async_trait]
impl HistoryStore for PostgresHistoryStore {
    async fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<(), StoreError> {
        if docs.is_empty() {
            return Ok(());
        }
        let mut client = self.client().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| StoreError::QueryError(e.to_string()))?;
        let stmt = tx
            .prepare_cached(INSERT)
            .await
            .map_err(|e| StoreError::QueryError(e.to_string()))?;
        for doc in &docs {
            tx.execute(&stmt, &[&collection, doc])
                .await
                .map_err(|e| StoreError::QueryError(e.to_string()))?;
        }
        tx.commit().await.map_err(|e| StoreError::QueryError(e.to_string()))?;
        log::debug!("Stored {} documents in {}", docs.len(), collection);
        Ok(())
    }

    async fn find(&self, collection: &str, filter: &Value) -> Result<Vec<Value>, StoreError> {
        let client = self.client().await?;
        let rows = client
            .query(FIND, &[&collection, filter])
            .await
            .map_err(|e| StoreError::QueryError(e.to_string()))?;
        rows.iter()
            .map(|row| row.try_get::<_, Value>(0).map_err(|e| StoreError::QueryError(e.to_string())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unparsable_url() {
        assert!(matches!(
            PostgresHistoryStore::new("this is not a url"),
            Err(StoreError::ConnectionError(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_database_is_a_connection_error() {
        let store = PostgresHistoryStore::new("postgres://rc:rc@127.0.0.1:1/rc").expect("pool");
        let err = store.ensure_schema().await.expect_err("nothing listens on port 1");
        assert!(matches!(err, StoreError::ConnectionError(_)));
    }
}

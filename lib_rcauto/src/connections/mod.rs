//! # Connections Module
//!
//! Persistence for RC readings and confirmed delegations. The store is
//! schemaless: documents go in with `insert_many` and come back through a JSON
//! containment filter.

/// The `HistoryStore` seam and the in-memory implementation.
pub mod history_store;

/// PostgreSQL JSONB backed history store.
pub mod db_postgres;

pub use db_postgres::PostgresHistoryStore;
pub use history_store::{HistoryStore, MemoryHistoryStore, StoreError};

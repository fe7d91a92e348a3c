//! # History Store
//!
//! Document storage keyed implicitly by insertion. Writes are best effort
//! analytics: the chain stays the source of truth for delegation state.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by history stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("Failed to connect to history store: {0}")]
    ConnectionError(String),
    /// A statement failed.
    #[error("Query execution failed: {0}")]
    QueryError(String),
}

/// Insert/find document storage.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends `docs` to `collection`.
    async fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<(), StoreError>;

    /// Documents of `collection` containing `filter` (JSON containment), oldest first.
    async fn find(&self, collection: &str, filter: &Value) -> Result<Vec<Value>, StoreError>;
}

/// Process-local store used in tests and when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    collections: Mutex<HashMap<String, Vec<Value>>>,
}

impl MemoryHistoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .map(|c| c.get(collection).map_or(0, Vec::len))
            .unwrap_or_default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<(), StoreError> {
        let mut collections = self
            .collections
            .lock()
            .map_err(|e| StoreError::QueryError(e.to_string()))?;
        collections.entry(collection.to_string()).or_default().extend(docs);
        Ok(())
    }

    async fn find(&self, collection: &str, filter: &Value) -> Result<Vec<Value>, StoreError> {
        let collections = self
            .collections
            .lock()
            .map_err(|e| StoreError::QueryError(e.to_string()))?;
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| contains(d, filter)).cloned().collect())
            .unwrap_or_default())
    }
}

/// JSON containment with the semantics of PostgreSQL's `@>` operator:
/// objects match key by key, arrays match when every filter element is
/// contained in some document element, scalars compare equal.
pub fn contains(doc: &Value, filter: &Value) -> bool {
    match (doc, filter) {
        (Value::Object(d), Value::Object(f)) => f
            .iter()
            .all(|(k, fv)| d.get(k).is_some_and(|dv| contains(dv, fv))),
        (Value::Array(d), Value::Array(f)) => f.iter().all(|fv| d.iter().any(|dv| contains(dv, fv))),
        (Value::Array(d), scalar) if !scalar.is_object() => d.iter().any(|dv| dv == scalar),
        (d, f) => d == f,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_contains() {
        let doc = json!({"account": "podping", "status": "LOW", "tags": ["a", "b"], "n": {"x": 1, "y": 2}});
        assert!(contains(&doc, &json!({})));
        assert!(contains(&doc, &json!({"account": "podping"})));
        assert!(contains(&doc, &json!({"n": {"x": 1}})));
        assert!(contains(&doc, &json!({"tags": ["b"]})));
        assert!(!contains(&doc, &json!({"account": "other"})));
        assert!(!contains(&doc, &json!({"missing": null})));
    }

    #[tokio::test]
    async fn test_memory_store_insert_and_find() {
        let store = MemoryHistoryStore::new();
        store
            .insert_many("rc", vec![json!({"account": "a", "v": 1}), json!({"account": "b", "v": 2})])
            .await
            .expect("insert");
        store.insert_many("rc", vec![json!({"account": "a", "v": 3})]).await.expect("insert");

        let found = store.find("rc", &json!({"account": "a"})).await.expect("find");
        assert_eq!(found, vec![json!({"account": "a", "v": 1}), json!({"account": "a", "v": 3})]);
        assert_eq!(store.len("rc"), 3);
        assert!(store.find("other", &json!({})).await.expect("find").is_empty());
    }
}

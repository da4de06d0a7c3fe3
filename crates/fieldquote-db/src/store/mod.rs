//! # Local Durable Store
//!
//! Collection-scoped key/value storage with a multi-collection transaction
//! primitive.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       DurableStore                                      │
//! │                                                                         │
//! │  put / get / get_all / delete / count                                  │
//! │    atomic, scoped to one collection                                    │
//! │                                                                         │
//! │  begin([collections]) ──► StoreTransaction                              │
//! │    get / get_all / put / delete / next_sequence                        │
//! │    commit()        → every write lands                                 │
//! │    drop w/o commit → no write lands                                    │
//! │                                                                         │
//! │  Backends                                                              │
//! │  ├── SqliteStore  (durable, default)                                   │
//! │  └── MemoryStore  (degraded: storage unavailable, loses data on exit)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writers are serialized through one async mutex per store: a transaction
//! holds it from `begin` until commit or drop, and single-collection writes
//! take it for the duration of the statement. Transactions are meant to be
//! short; never await network I/O while holding one.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{DbError, DbResult};
use crate::pool::{Database, DbConfig};

// =============================================================================
// Collections
// =============================================================================

/// Object collections held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Actions,
    DeadLetter,
    Quotes,
    Customers,
    LineItems,
    Blobs,
    IdMap,
    Conflicts,
}

impl Collection {
    pub const ALL: [Collection; 8] = [
        Collection::Actions,
        Collection::DeadLetter,
        Collection::Quotes,
        Collection::Customers,
        Collection::LineItems,
        Collection::Blobs,
        Collection::IdMap,
        Collection::Conflicts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Actions => "actions",
            Collection::DeadLetter => "dead_letter",
            Collection::Quotes => "quotes",
            Collection::Customers => "customers",
            Collection::LineItems => "line_items",
            Collection::Blobs => "blobs",
            Collection::IdMap => "id_map",
            Collection::Conflicts => "conflicts",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether writes survive a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    Durable,
    /// In-memory only; shown to the user as a warning.
    Degraded,
}

// =============================================================================
// Traits
// =============================================================================

/// The Local Durable Store.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// False for the in-memory fallback.
    fn is_durable(&self) -> bool;

    async fn put(&self, collection: Collection, key: &str, value: Value) -> DbResult<()>;

    async fn get(&self, collection: Collection, key: &str) -> DbResult<Option<Value>>;

    /// All records in the collection, ordered by key.
    async fn get_all(&self, collection: Collection) -> DbResult<Vec<(String, Value)>>;

    /// Returns whether a record was removed.
    async fn delete(&self, collection: Collection, key: &str) -> DbResult<bool>;

    async fn count(&self, collection: Collection) -> DbResult<u64>;

    /// Starts a transaction over the given collections.
    async fn begin(&self, collections: &[Collection]) -> DbResult<Box<dyn StoreTransaction>>;

    async fn health_check(&self) -> bool;

    async fn close(&self);
}

/// An open all-or-nothing unit of work.
///
/// Operations on collections not passed to `begin` fail with
/// [`DbError::OutOfScope`]. Dropping without `commit` rolls back.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn get(&mut self, collection: Collection, key: &str) -> DbResult<Option<Value>>;

    async fn get_all(&mut self, collection: Collection) -> DbResult<Vec<(String, Value)>>;

    async fn put(&mut self, collection: Collection, key: &str, value: Value) -> DbResult<()>;

    async fn delete(&mut self, collection: Collection, key: &str) -> DbResult<bool>;

    /// Next value of a named monotonic counter, starting at 1.
    async fn next_sequence(&mut self, name: &str) -> DbResult<u64>;

    async fn commit(&mut self) -> DbResult<()>;
}

pub(crate) fn ensure_scope(scope: &[Collection], collection: Collection) -> DbResult<()> {
    if scope.contains(&collection) {
        Ok(())
    } else {
        Err(DbError::OutOfScope(collection))
    }
}

// =============================================================================
// Typed Helpers
// =============================================================================

impl dyn DurableStore + '_ {
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        collection: Collection,
        key: &str,
    ) -> DbResult<Option<T>> {
        match self.get(collection, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn get_all_as<T: DeserializeOwned>(&self, collection: Collection) -> DbResult<Vec<T>> {
        self.get_all(collection)
            .await?
            .into_iter()
            .map(|(_, value)| serde_json::from_value(value).map_err(DbError::from))
            .collect()
    }

    pub async fn put_as<T: Serialize + Sync>(
        &self,
        collection: Collection,
        key: &str,
        value: &T,
    ) -> DbResult<()> {
        let value = serde_json::to_value(value)?;
        self.put(collection, key, value).await
    }
}

impl dyn StoreTransaction + '_ {
    pub async fn get_as<T: DeserializeOwned>(
        &mut self,
        collection: Collection,
        key: &str,
    ) -> DbResult<Option<T>> {
        match self.get(collection, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn get_all_as<T: DeserializeOwned>(
        &mut self,
        collection: Collection,
    ) -> DbResult<Vec<(String, T)>> {
        self.get_all(collection)
            .await?
            .into_iter()
            .map(|(key, value)| -> DbResult<(String, T)> {
                Ok((key, serde_json::from_value(value)?))
            })
            .collect()
    }

    pub async fn put_as<T: Serialize + Sync>(
        &mut self,
        collection: Collection,
        key: &str,
        value: &T,
    ) -> DbResult<()> {
        let value = serde_json::to_value(value)?;
        self.put(collection, key, value).await
    }
}

// =============================================================================
// Opening
// =============================================================================

/// A store ready for use, with the mode it ended up in.
#[derive(Clone)]
pub struct OpenedStore {
    pub store: Arc<dyn DurableStore>,
    pub mode: StorageMode,
}

/// Opens the SQLite store, degrading to memory when storage is unavailable.
///
/// ## Fallback
/// ```text
/// Database::new(config)
///     │
///     ├── Ok ────────────────────────────► SqliteStore   (Durable)
///     │
///     └── Err(StorageUnavailable)
///             ├── allow_memory_fallback ─► MemoryStore   (Degraded, warn!)
///             └── otherwise ─────────────► Err
/// ```
pub async fn open_store(config: DbConfig, allow_memory_fallback: bool) -> DbResult<OpenedStore> {
    match Database::new(config).await {
        Ok(db) => Ok(OpenedStore {
            store: Arc::new(SqliteStore::new(db)),
            mode: StorageMode::Durable,
        }),
        Err(err) if err.is_storage_unavailable() && allow_memory_fallback => {
            warn!(
                error = %err,
                "Local storage unavailable, running in memory only: unsynced work is lost if the app exits"
            );
            Ok(OpenedStore {
                store: Arc::new(MemoryStore::new()),
                mode: StorageMode::Degraded,
            })
        }
        Err(err) => Err(err),
    }
}

// =============================================================================
// Shared Backend Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) async fn sqlite_store() -> Arc<dyn DurableStore> {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        Arc::new(SqliteStore::new(db))
    }

    pub(crate) fn memory_store() -> Arc<dyn DurableStore> {
        Arc::new(MemoryStore::new())
    }

    async fn backends() -> Vec<Arc<dyn DurableStore>> {
        vec![sqlite_store().await, memory_store()]
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        for store in backends().await {
            store.put(Collection::Quotes, "q-1", json!({"title": "Roof"})).await.unwrap();
            let value = store.get(Collection::Quotes, "q-1").await.unwrap();
            assert_eq!(value, Some(json!({"title": "Roof"})));

            // same key, different collection
            assert_eq!(store.get(Collection::Customers, "q-1").await.unwrap(), None);

            assert!(store.delete(Collection::Quotes, "q-1").await.unwrap());
            assert!(!store.delete(Collection::Quotes, "q-1").await.unwrap());
            assert_eq!(store.count(Collection::Quotes).await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_get_all_is_key_ordered() {
        for store in backends().await {
            for key in ["00000000000000000010", "00000000000000000002", "00000000000000000001"] {
                store.put(Collection::Actions, key, json!(key)).await.unwrap();
            }
            let keys: Vec<String> = store
                .get_all(Collection::Actions)
                .await
                .unwrap()
                .into_iter()
                .map(|(key, _)| key)
                .collect();
            assert_eq!(
                keys,
                vec![
                    "00000000000000000001",
                    "00000000000000000002",
                    "00000000000000000010"
                ]
            );
        }
    }

    #[tokio::test]
    async fn test_transaction_commit_and_rollback() {
        for store in backends().await {
            {
                let mut tx = store
                    .begin(&[Collection::Quotes, Collection::IdMap])
                    .await
                    .unwrap();
                tx.put(Collection::Quotes, "tmp-1", json!({"n": 1})).await.unwrap();
                tx.put(Collection::IdMap, "tmp-1", json!("q-1")).await.unwrap();
                // visible inside the transaction
                assert!(tx.get(Collection::Quotes, "tmp-1").await.unwrap().is_some());
                // dropped without commit
            }
            assert_eq!(store.count(Collection::Quotes).await.unwrap(), 0);
            assert_eq!(store.count(Collection::IdMap).await.unwrap(), 0);

            let mut tx = store
                .begin(&[Collection::Quotes, Collection::IdMap])
                .await
                .unwrap();
            tx.put(Collection::Quotes, "q-1", json!({"n": 1})).await.unwrap();
            tx.put(Collection::IdMap, "tmp-1", json!("q-1")).await.unwrap();
            tx.commit().await.unwrap();
            drop(tx);

            assert_eq!(store.count(Collection::Quotes).await.unwrap(), 1);
            assert_eq!(store.count(Collection::IdMap).await.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn test_transaction_scope_is_enforced() {
        for store in backends().await {
            let mut tx = store.begin(&[Collection::Quotes]).await.unwrap();
            let err = tx
                .put(Collection::Blobs, "b-1", json!({}))
                .await
                .unwrap_err();
            assert!(matches!(err, DbError::OutOfScope(Collection::Blobs)));
        }
    }

    #[tokio::test]
    async fn test_sequences_are_monotonic_and_survive_rollback_only_if_committed() {
        for store in backends().await {
            let mut tx = store.begin(&[Collection::Actions]).await.unwrap();
            assert_eq!(tx.next_sequence("actions").await.unwrap(), 1);
            assert_eq!(tx.next_sequence("actions").await.unwrap(), 2);
            tx.commit().await.unwrap();
            drop(tx);

            {
                let mut tx = store.begin(&[Collection::Actions]).await.unwrap();
                assert_eq!(tx.next_sequence("actions").await.unwrap(), 3);
            }

            let mut tx = store.begin(&[Collection::Actions]).await.unwrap();
            assert_eq!(tx.next_sequence("actions").await.unwrap(), 3);
            assert_eq!(tx.next_sequence("other").await.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        for store in backends().await {
            store
                .put_as(Collection::Customers, "c-1", &vec!["a".to_string()])
                .await
                .unwrap();
            let value: Option<Vec<String>> =
                store.get_as(Collection::Customers, "c-1").await.unwrap();
            assert_eq!(value, Some(vec!["a".to_string()]));

            store.put(Collection::Customers, "c-2", json!(42)).await.unwrap();
            let err = store
                .get_all_as::<Vec<String>>(Collection::Customers)
                .await
                .unwrap_err();
            assert!(matches!(err, DbError::Serialization(_)));
        }
    }

    async fn title_of(tx: &mut dyn StoreTransaction, key: &str) -> Option<String> {
        tx.get_as::<Value>(Collection::Quotes, key)
            .await
            .unwrap()
            .and_then(|value| value["title"].as_str().map(str::to_string))
    }

    #[tokio::test]
    async fn test_typed_helpers_on_borrowed_transaction() {
        for store in backends().await {
            let mut tx = store.begin(&[Collection::Quotes]).await.unwrap();
            tx.put_as(Collection::Quotes, "q-1", &json!({"title": "Roof"}))
                .await
                .unwrap();
            assert_eq!(title_of(tx.as_mut(), "q-1").await.as_deref(), Some("Roof"));
        }
    }

    #[tokio::test]
    async fn test_open_store_degrades_when_unavailable() {
        let dir = tempfile::tempdir().unwrap();

        let opened = open_store(DbConfig::new(dir.path()), true).await.unwrap();
        assert_eq!(opened.mode, StorageMode::Degraded);
        assert!(!opened.store.is_durable());

        let err = open_store(DbConfig::new(dir.path()), false).await.err().unwrap();
        assert!(err.is_storage_unavailable());

        let opened = open_store(DbConfig::new(dir.path().join("fq.db")), false)
            .await
            .unwrap();
        assert_eq!(opened.mode, StorageMode::Durable);
        assert!(opened.store.is_durable());
    }
}

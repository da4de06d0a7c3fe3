//! SQLite backend for the Local Durable Store.
//!
//! All collections share `store_records (collection, key, value)`; each
//! single-collection operation is one statement and therefore atomic.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::{Sqlite, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

use super::{ensure_scope, Collection, DurableStore, StoreTransaction};
use crate::error::{DbError, DbResult};
use crate::pool::Database;

const UPSERT_RECORD: &str = r#"
    INSERT INTO store_records (collection, key, value, updated_at)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT (collection, key) DO UPDATE SET
        value = excluded.value,
        updated_at = excluded.updated_at
"#;

const SELECT_RECORD: &str = "SELECT value FROM store_records WHERE collection = ?1 AND key = ?2";

const SELECT_COLLECTION: &str =
    "SELECT key, value FROM store_records WHERE collection = ?1 ORDER BY key ASC";

const DELETE_RECORD: &str = "DELETE FROM store_records WHERE collection = ?1 AND key = ?2";

const NEXT_SEQUENCE: &str = r#"
    INSERT INTO store_sequences (name, value) VALUES (?1, 1)
    ON CONFLICT (name) DO UPDATE SET value = value + 1
    RETURNING value
"#;

fn encode(value: &Value) -> DbResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn decode(text: &str) -> DbResult<Value> {
    Ok(serde_json::from_str(text)?)
}

fn decode_rows(rows: Vec<(String, String)>) -> DbResult<Vec<(String, Value)>> {
    rows.into_iter()
        .map(|(key, text)| decode(&text).map(|value| (key, value)))
        .collect()
}

// =============================================================================
// Store
// =============================================================================

/// Durable store over a SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
    write_lock: Arc<Mutex<()>>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        SqliteStore {
            db,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    fn is_durable(&self) -> bool {
        true
    }

    async fn put(&self, collection: Collection, key: &str, value: Value) -> DbResult<()> {
        let text = encode(&value)?;
        let _guard = self.write_lock.lock().await;

        trace!(%collection, key, "put");
        sqlx::query(UPSERT_RECORD)
            .bind(collection.as_str())
            .bind(key)
            .bind(text)
            .bind(Utc::now().to_rfc3339())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn get(&self, collection: Collection, key: &str) -> DbResult<Option<Value>> {
        let text: Option<String> = sqlx::query_scalar(SELECT_RECORD)
            .bind(collection.as_str())
            .bind(key)
            .fetch_optional(self.db.pool())
            .await?;
        text.as_deref().map(decode).transpose()
    }

    async fn get_all(&self, collection: Collection) -> DbResult<Vec<(String, Value)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(SELECT_COLLECTION)
            .bind(collection.as_str())
            .fetch_all(self.db.pool())
            .await?;
        decode_rows(rows)
    }

    async fn delete(&self, collection: Collection, key: &str) -> DbResult<bool> {
        let _guard = self.write_lock.lock().await;

        let result = sqlx::query(DELETE_RECORD)
            .bind(collection.as_str())
            .bind(key)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, collection: Collection) -> DbResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM store_records WHERE collection = ?1")
            .bind(collection.as_str())
            .fetch_one(self.db.pool())
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn begin(&self, collections: &[Collection]) -> DbResult<Box<dyn StoreTransaction>> {
        let guard = self.write_lock.clone().lock_owned().await;
        let tx = self.db.pool().begin().await?;

        debug!(?collections, "Transaction started");
        Ok(Box::new(SqliteTransaction {
            tx: Some(tx),
            scope: collections.to_vec(),
            _guard: guard,
        }))
    }

    async fn health_check(&self) -> bool {
        self.db.health_check().await
    }

    async fn close(&self) {
        self.db.close().await;
    }
}

// =============================================================================
// Transaction
// =============================================================================

struct SqliteTransaction {
    /// `None` once committed.
    tx: Option<Transaction<'static, Sqlite>>,
    scope: Vec<Collection>,
    _guard: OwnedMutexGuard<()>,
}

impl SqliteTransaction {
    fn open(&mut self, collection: Option<Collection>) -> DbResult<&mut Transaction<'static, Sqlite>> {
        if let Some(collection) = collection {
            ensure_scope(&self.scope, collection)?;
        }
        self.tx
            .as_mut()
            .ok_or_else(|| DbError::TransactionFailed("transaction already committed".to_string()))
    }
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn get(&mut self, collection: Collection, key: &str) -> DbResult<Option<Value>> {
        let tx = self.open(Some(collection))?;
        let text: Option<String> = sqlx::query_scalar(SELECT_RECORD)
            .bind(collection.as_str())
            .bind(key)
            .fetch_optional(&mut **tx)
            .await?;
        text.as_deref().map(decode).transpose()
    }

    async fn get_all(&mut self, collection: Collection) -> DbResult<Vec<(String, Value)>> {
        let tx = self.open(Some(collection))?;
        let rows: Vec<(String, String)> = sqlx::query_as(SELECT_COLLECTION)
            .bind(collection.as_str())
            .fetch_all(&mut **tx)
            .await?;
        decode_rows(rows)
    }

    async fn put(&mut self, collection: Collection, key: &str, value: Value) -> DbResult<()> {
        let text = encode(&value)?;
        let tx = self.open(Some(collection))?;
        sqlx::query(UPSERT_RECORD)
            .bind(collection.as_str())
            .bind(key)
            .bind(text)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn delete(&mut self, collection: Collection, key: &str) -> DbResult<bool> {
        let tx = self.open(Some(collection))?;
        let result = sqlx::query(DELETE_RECORD)
            .bind(collection.as_str())
            .bind(key)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn next_sequence(&mut self, name: &str) -> DbResult<u64> {
        let tx = self.open(None)?;
        let value: i64 = sqlx::query_scalar(NEXT_SEQUENCE)
            .bind(name)
            .fetch_one(&mut **tx)
            .await?;
        Ok(value.max(0) as u64)
    }

    async fn commit(&mut self) -> DbResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| DbError::TransactionFailed("transaction already committed".to_string()))?;
        tx.commit()
            .await
            .map_err(|e| match DbError::from(e) {
                DbError::StorageUnavailable(msg) => DbError::StorageUnavailable(msg),
                other => DbError::TransactionFailed(other.to_string()),
            })?;
        debug!(scope = ?self.scope, "Transaction committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DbConfig;
    use serde_json::json;

    #[tokio::test]
    async fn test_writes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fieldquote.db");

        {
            let store = SqliteStore::new(Database::new(DbConfig::new(&path)).await.unwrap());
            store.put(Collection::Quotes, "tmp-1", json!({"title": "Gutter"})).await.unwrap();
            let mut tx = store.begin(&[Collection::Actions]).await.unwrap();
            tx.next_sequence("actions").await.unwrap();
            tx.put(Collection::Actions, "00000000000000000001", json!({"id": 1}))
                .await
                .unwrap();
            tx.commit().await.unwrap();
            drop(tx);
            store.close().await;
        }

        let store = SqliteStore::new(Database::new(DbConfig::new(&path)).await.unwrap());
        assert_eq!(
            store.get(Collection::Quotes, "tmp-1").await.unwrap(),
            Some(json!({"title": "Gutter"}))
        );
        assert_eq!(store.count(Collection::Actions).await.unwrap(), 1);

        let mut tx = store.begin(&[Collection::Actions]).await.unwrap();
        assert_eq!(tx.next_sequence("actions").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_commit_twice_fails() {
        let store = SqliteStore::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let mut tx = store.begin(&[Collection::Quotes]).await.unwrap();
        tx.commit().await.unwrap();
        assert!(matches!(
            tx.commit().await.unwrap_err(),
            DbError::TransactionFailed(_)
        ));
    }
}

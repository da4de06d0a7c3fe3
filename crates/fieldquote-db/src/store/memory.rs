//! In-memory backend, used when durable storage is unavailable.
//!
//! Same contract as the SQLite backend, but nothing survives the process.
//! A transaction works on a private copy of the state and swaps it in on
//! commit, so a dropped transaction leaves no trace.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{ensure_scope, Collection, DurableStore, StoreTransaction};
use crate::error::{DbError, DbResult};

#[derive(Debug, Default, Clone)]
struct MemoryState {
    collections: HashMap<Collection, BTreeMap<String, Value>>,
    sequences: HashMap<String, u64>,
}

impl MemoryState {
    fn get(&self, collection: Collection, key: &str) -> Option<Value> {
        self.collections
            .get(&collection)
            .and_then(|records| records.get(key))
            .cloned()
    }

    fn get_all(&self, collection: Collection) -> Vec<(String, Value)> {
        self.collections
            .get(&collection)
            .map(|records| {
                records
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn put(&mut self, collection: Collection, key: &str, value: Value) {
        self.collections
            .entry(collection)
            .or_default()
            .insert(key.to_string(), value);
    }

    fn delete(&mut self, collection: Collection, key: &str) -> bool {
        self.collections
            .get_mut(&collection)
            .and_then(|records| records.remove(key))
            .is_some()
    }

    fn next_sequence(&mut self, name: &str) -> u64 {
        let value = self.sequences.entry(name.to_string()).or_insert(0);
        *value += 1;
        *value
    }
}

/// Degraded, process-lifetime store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    fn is_durable(&self) -> bool {
        false
    }

    async fn put(&self, collection: Collection, key: &str, value: Value) -> DbResult<()> {
        self.state.lock().await.put(collection, key, value);
        Ok(())
    }

    async fn get(&self, collection: Collection, key: &str) -> DbResult<Option<Value>> {
        Ok(self.state.lock().await.get(collection, key))
    }

    async fn get_all(&self, collection: Collection) -> DbResult<Vec<(String, Value)>> {
        Ok(self.state.lock().await.get_all(collection))
    }

    async fn delete(&self, collection: Collection, key: &str) -> DbResult<bool> {
        Ok(self.state.lock().await.delete(collection, key))
    }

    async fn count(&self, collection: Collection) -> DbResult<u64> {
        let state = self.state.lock().await;
        Ok(state
            .collections
            .get(&collection)
            .map_or(0, |records| records.len() as u64))
    }

    async fn begin(&self, collections: &[Collection]) -> DbResult<Box<dyn StoreTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            scope: collections.to_vec(),
            committed: false,
        }))
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    scope: Vec<Collection>,
    committed: bool,
}

impl MemoryTransaction {
    fn check(&self, collection: Option<Collection>) -> DbResult<()> {
        if self.committed {
            return Err(DbError::TransactionFailed(
                "transaction already committed".to_string(),
            ));
        }
        match collection {
            Some(collection) => ensure_scope(&self.scope, collection),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get(&mut self, collection: Collection, key: &str) -> DbResult<Option<Value>> {
        self.check(Some(collection))?;
        Ok(self.working.get(collection, key))
    }

    async fn get_all(&mut self, collection: Collection) -> DbResult<Vec<(String, Value)>> {
        self.check(Some(collection))?;
        Ok(self.working.get_all(collection))
    }

    async fn put(&mut self, collection: Collection, key: &str, value: Value) -> DbResult<()> {
        self.check(Some(collection))?;
        self.working.put(collection, key, value);
        Ok(())
    }

    async fn delete(&mut self, collection: Collection, key: &str) -> DbResult<bool> {
        self.check(Some(collection))?;
        Ok(self.working.delete(collection, key))
    }

    async fn next_sequence(&mut self, name: &str) -> DbResult<u64> {
        self.check(None)?;
        Ok(self.working.next_sequence(name))
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.check(None)?;
        *self.guard = std::mem::take(&mut self.working);
        self.committed = true;
        Ok(())
    }
}

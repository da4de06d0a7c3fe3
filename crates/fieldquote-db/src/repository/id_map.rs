//! # Id Map Repository
//!
//! Read side of the temp → real mapping table. Rows are only written by
//! [`IdRemapper`](crate::remap::IdRemapper), inside the remap transaction.

use std::sync::Arc;

use fieldquote_core::{EntityId, IdMapping};

use crate::error::DbResult;
use crate::store::{Collection, DurableStore};

/// Repository for the id mapping table.
#[derive(Clone)]
pub struct IdMapRepository {
    store: Arc<dyn DurableStore>,
}

impl IdMapRepository {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        IdMapRepository { store }
    }

    pub async fn get(&self, temp_id: &EntityId) -> DbResult<Option<IdMapping>> {
        self.store.get_as(Collection::IdMap, temp_id.as_str()).await
    }

    /// Real id for a temp id, if the server has confirmed it.
    ///
    /// Real ids resolve to themselves.
    pub async fn resolve(&self, id: &EntityId) -> DbResult<Option<EntityId>> {
        if !id.is_temporary() {
            return Ok(Some(id.clone()));
        }
        Ok(self.get(id).await?.map(|mapping| mapping.real_id))
    }

    /// Current id for `id`: the real id when known, else `id` unchanged.
    pub async fn current(&self, id: &EntityId) -> DbResult<EntityId> {
        Ok(self.resolve(id).await?.unwrap_or_else(|| id.clone()))
    }

    pub async fn list(&self) -> DbResult<Vec<IdMapping>> {
        self.store.get_all_as(Collection::IdMap).await
    }
}

//! # Conflict Repository
//!
//! Persisted list behind the Conflict Surface, so unresolved conflicts
//! survive restarts until the user clears them.

use std::sync::Arc;

use fieldquote_core::Conflict;

use crate::error::DbResult;
use crate::store::{Collection, DurableStore};

/// Repository for unresolved conflicts.
#[derive(Clone)]
pub struct ConflictRepository {
    store: Arc<dyn DurableStore>,
}

impl ConflictRepository {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        ConflictRepository { store }
    }

    pub async fn append(&self, conflict: &Conflict) -> DbResult<()> {
        self.store
            .put_as(Collection::Conflicts, &conflict.id, conflict)
            .await
    }

    /// Unresolved conflicts, oldest first.
    pub async fn list(&self) -> DbResult<Vec<Conflict>> {
        let mut conflicts: Vec<Conflict> = self.store.get_all_as(Collection::Conflicts).await?;
        conflicts.sort_by(|a, b| a.detected_at.cmp(&b.detected_at));
        Ok(conflicts)
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Conflict>> {
        self.store.get_as(Collection::Conflicts, id).await
    }

    /// Open conflict raised for a dead-lettered action, if any.
    pub async fn find_by_action(&self, action_id: u64) -> DbResult<Option<Conflict>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|conflict| conflict.action_id == Some(action_id)))
    }

    pub async fn remove(&self, id: &str) -> DbResult<bool> {
        self.store.delete(Collection::Conflicts, id).await
    }

    pub async fn count(&self) -> DbResult<u64> {
        self.store.count(Collection::Conflicts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::sqlite_store;
    use fieldquote_core::{ActionKind, ConflictEntity, ConflictReason, EntityId, EntityKind};

    #[tokio::test]
    async fn test_conflicts_persist_until_removed() {
        let repo = ConflictRepository::new(sqlite_store().await);
        let conflict = Conflict::new(
            ConflictEntity::new(EntityKind::Customer, EntityId::from("tmp-c1")),
            ConflictReason::RetriesExhausted,
            "server unavailable",
        )
        .for_action(1, ActionKind::CreateCustomer);
        repo.append(&conflict).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.find_by_action(1).await.unwrap(), Some(conflict.clone()));
        assert_eq!(repo.find_by_action(2).await.unwrap(), None);

        assert!(repo.remove(&conflict.id).await.unwrap());
        assert!(repo.list().await.unwrap().is_empty());
    }
}

//! # Temp → Real Id Remapping
//!
//! When the server confirms an entity created offline, every local trace of
//! its temporary id is rewritten in one transaction.
//!
//! ## Remap Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  remap(Quote, tmp-1 → q-42)                                             │
//! │                                                                         │
//! │  ┌────────────────────── SINGLE TRANSACTION ─────────────────────────┐ │
//! │  │ 1. id_map[tmp-1] = q-42           (or verify an existing row)     │ │
//! │  │ 2. quotes: key tmp-1 → key q-42   (entity.id rewritten)           │ │
//! │  │ 3. siblings: line_items.quote_id, blobs.quote_id                  │ │
//! │  │             (customers: quotes.customer_id)                       │ │
//! │  │ 4. actions / dead_letter: typed reference fields                  │ │
//! │  │ 5. conflicts: entity id                                           │ │
//! │  │ 6. remove the confirmed create action (when given)                │ │
//! │  └───────────────────────────────────────────────────────────────────┘ │
//! │                                                                         │
//! │  COMMIT ← all or nothing. Running it again finds no tmp-1 anywhere     │
//! │           and changes nothing.                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::Utc;
use fieldquote_core::{
    CachedBlob, Conflict, Customer, DeadLetter, EntityId, EntityKind, IdMapping, LineItem, Quote,
    QueuedAction,
};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::action_key;
use crate::store::{Collection, DurableStore, StoreTransaction};

const REMAP_SCOPE: [Collection; 8] = Collection::ALL;

/// What a remap changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemapOutcome {
    /// The entity was re-keyed from the temp id.
    pub entity_moved: bool,
    /// Reference fields rewritten across siblings, queue and dead-letter.
    pub references_rewritten: usize,
    /// The confirmed create action was removed in the same transaction.
    pub action_removed: bool,
}

impl RemapOutcome {
    pub fn is_noop(&self) -> bool {
        !self.entity_moved && self.references_rewritten == 0 && !self.action_removed
    }
}

/// Applies temp → real id swaps.
#[derive(Clone)]
pub struct IdRemapper {
    store: Arc<dyn DurableStore>,
}

impl IdRemapper {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        IdRemapper { store }
    }

    /// Rewrites `temp` to `real` everywhere. Idempotent.
    pub async fn remap(
        &self,
        kind: EntityKind,
        temp: &EntityId,
        real: &EntityId,
    ) -> DbResult<RemapOutcome> {
        self.remap_and_complete(kind, temp, real, None).await
    }

    /// Same as [`remap`](Self::remap), also removing the confirmed create
    /// action so the swap and the dequeue commit together.
    pub async fn remap_and_complete(
        &self,
        kind: EntityKind,
        temp: &EntityId,
        real: &EntityId,
        completed_action: Option<u64>,
    ) -> DbResult<RemapOutcome> {
        if !temp.is_temporary() || real.is_temporary() {
            return Err(DbError::InvariantViolation(format!(
                "cannot remap {temp} to {real}: expected temporary → real"
            )));
        }

        let mut tx = self.store.begin(&REMAP_SCOPE).await?;
        let mut outcome = RemapOutcome::default();

        record_mapping(tx.as_mut(), kind, temp, real).await?;
        outcome.entity_moved = move_entity(tx.as_mut(), kind, temp, real).await?;
        outcome.references_rewritten += rewrite_siblings(tx.as_mut(), kind, temp, real).await?;
        outcome.references_rewritten +=
            rewrite_queued(tx.as_mut(), temp, real, completed_action).await?;
        outcome.references_rewritten += rewrite_conflicts(tx.as_mut(), temp, real).await?;

        if let Some(action_id) = completed_action {
            outcome.action_removed = tx.delete(Collection::Actions, &action_key(action_id)).await?;
        }

        tx.commit().await?;

        if outcome.is_noop() {
            debug!(%temp, %real, "Remap already applied");
        } else {
            info!(
                %kind,
                %temp,
                %real,
                entity_moved = outcome.entity_moved,
                references = outcome.references_rewritten,
                "Temporary id remapped"
            );
        }
        Ok(outcome)
    }
}

async fn record_mapping(
    tx: &mut dyn StoreTransaction,
    kind: EntityKind,
    temp: &EntityId,
    real: &EntityId,
) -> DbResult<()> {
    match tx.get_as::<IdMapping>(Collection::IdMap, temp.as_str()).await? {
        Some(existing) if existing.real_id == *real => Ok(()),
        Some(existing) => Err(DbError::InvariantViolation(format!(
            "{temp} already mapped to {}, refusing {real}",
            existing.real_id
        ))),
        None => {
            let mapping = IdMapping {
                temp_id: temp.clone(),
                real_id: real.clone(),
                kind,
                mapped_at: Utc::now(),
            };
            tx.put_as(Collection::IdMap, temp.as_str(), &mapping).await
        }
    }
}

async fn move_entity(
    tx: &mut dyn StoreTransaction,
    kind: EntityKind,
    temp: &EntityId,
    real: &EntityId,
) -> DbResult<bool> {
    match kind {
        EntityKind::Quote => {
            let Some(mut quote) = tx.get_as::<Quote>(Collection::Quotes, temp.as_str()).await? else {
                return Ok(false);
            };
            quote.id = real.clone();
            tx.delete(Collection::Quotes, temp.as_str()).await?;
            tx.put_as(Collection::Quotes, real.as_str(), &quote).await?;
            Ok(true)
        }
        EntityKind::Customer => {
            let Some(mut customer) = tx
                .get_as::<Customer>(Collection::Customers, temp.as_str())
                .await?
            else {
                return Ok(false);
            };
            customer.id = real.clone();
            tx.delete(Collection::Customers, temp.as_str()).await?;
            tx.put_as(Collection::Customers, real.as_str(), &customer).await?;
            Ok(true)
        }
        EntityKind::LineItem | EntityKind::Blob => Err(DbError::InvariantViolation(format!(
            "{kind} records are keyed locally and never remapped"
        ))),
    }
}

async fn rewrite_siblings(
    tx: &mut dyn StoreTransaction,
    kind: EntityKind,
    temp: &EntityId,
    real: &EntityId,
) -> DbResult<usize> {
    let mut rewritten = 0;
    match kind {
        EntityKind::Quote => {
            for (key, mut item) in tx.get_all_as::<LineItem>(Collection::LineItems).await? {
                if item.quote_id == *temp {
                    item.quote_id = real.clone();
                    tx.put_as(Collection::LineItems, &key, &item).await?;
                    rewritten += 1;
                }
            }
            for (key, mut blob) in tx.get_all_as::<CachedBlob>(Collection::Blobs).await? {
                if blob.quote_id == *temp {
                    blob.quote_id = real.clone();
                    tx.put_as(Collection::Blobs, &key, &blob).await?;
                    rewritten += 1;
                }
            }
        }
        EntityKind::Customer => {
            for (key, mut quote) in tx.get_all_as::<Quote>(Collection::Quotes).await? {
                if quote.customer_id.as_ref() == Some(temp) {
                    quote.customer_id = Some(real.clone());
                    tx.put_as(Collection::Quotes, &key, &quote).await?;
                    rewritten += 1;
                }
            }
        }
        EntityKind::LineItem | EntityKind::Blob => {}
    }
    Ok(rewritten)
}

async fn rewrite_queued(
    tx: &mut dyn StoreTransaction,
    temp: &EntityId,
    real: &EntityId,
    completed_action: Option<u64>,
) -> DbResult<usize> {
    let mut rewritten = 0;

    for (key, mut action) in tx.get_all_as::<QueuedAction>(Collection::Actions).await? {
        if Some(action.id) == completed_action {
            continue;
        }
        let n = action.payload.remap_reference(temp, real);
        if n > 0 {
            tx.put_as(Collection::Actions, &key, &action).await?;
            rewritten += n;
        }
    }

    for (key, mut entry) in tx.get_all_as::<DeadLetter>(Collection::DeadLetter).await? {
        let n = entry.action.payload.remap_reference(temp, real);
        if n > 0 {
            tx.put_as(Collection::DeadLetter, &key, &entry).await?;
            rewritten += n;
        }
    }

    Ok(rewritten)
}

async fn rewrite_conflicts(
    tx: &mut dyn StoreTransaction,
    temp: &EntityId,
    real: &EntityId,
) -> DbResult<usize> {
    let mut rewritten = 0;
    for (key, mut conflict) in tx.get_all_as::<Conflict>(Collection::Conflicts).await? {
        if conflict.entity.id == *temp {
            conflict.entity.id = real.clone();
            tx.put_as(Collection::Conflicts, &key, &conflict).await?;
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

// =============================================================================
// Unit Tests
// =============================================================================

//! Handles shared by the write path and the replay engine.

use std::sync::Arc;

use fieldquote_core::{
    ActionPayload, Conflict, ConflictEntity, ConflictReason, EntityKind, QueuedAction,
};
use fieldquote_db::Repositories;
use tokio::sync::Mutex;

use crate::background::BackgroundSync;
use crate::conflicts::ConflictSurface;
use crate::connectivity::ConnectivityMonitor;
use crate::error::SyncResult;
use crate::queue::ActionQueue;
use crate::remote::RemoteApi;
use crate::status::StatusTracker;

#[derive(Clone)]
pub(crate) struct SyncContext {
    pub repos: Repositories,
    pub queue: ActionQueue,
    pub connectivity: ConnectivityMonitor,
    pub remote: Arc<dyn RemoteApi>,
    pub background: Arc<dyn BackgroundSync>,
    pub conflicts: ConflictSurface,
    pub status: StatusTracker,
    /// Held for a whole replay pass and for an immediate send, so the two
    /// never talk to the server at the same time.
    pub send_lock: Arc<Mutex<()>>,
    /// Held by every read-modify-write of cached entities and by every id
    /// remap, so a write never lands under an id that was just swapped out.
    /// Taken after `send_lock`, never before it.
    pub entity_lock: Arc<Mutex<()>>,
}

impl SyncContext {
    /// Asks the platform for a wake-up; absence only costs timeliness.
    pub fn request_background_sync(&self) {
        if !self.background.register() {
            tracing::debug!("Background sync unavailable, waiting for connectivity signal");
        }
    }

    /// Dead-letters the action and surfaces it.
    pub async fn fail_terminal(
        &self,
        action: &QueuedAction,
        reason: ConflictReason,
        message: &str,
    ) -> SyncResult<()> {
        self.queue.dead_letter(action.id, message).await?;
        let conflict = Conflict::new(conflict_entity(&action.payload), reason, message)
            .for_action(action.id, action.kind());
        self.conflicts.report(conflict).await
    }
}

/// The record a failed action is about.
fn conflict_entity(payload: &ActionPayload) -> ConflictEntity {
    match payload {
        ActionPayload::CreateQuote(quote) => {
            ConflictEntity::new(EntityKind::Quote, quote.temp_id.clone())
        }
        ActionPayload::UpdateQuote(update) => {
            ConflictEntity::new(EntityKind::Quote, update.quote_id.clone())
        }
        ActionPayload::CreateLineItems(items) => {
            ConflictEntity::new(EntityKind::Quote, items.quote_id.clone())
        }
        ActionPayload::CreateCustomer(customer) => {
            ConflictEntity::new(EntityKind::Customer, customer.temp_id.clone())
        }
    }
}

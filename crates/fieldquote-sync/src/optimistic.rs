//! # Optimistic Write Path
//!
//! The only way new user data enters the local store.
//!
//! ## Write Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create_quote(input)                                                    │
//! │       │                                                                 │
//! │       ├─ 1. validate (nothing stored on error)                         │
//! │       ├─ 2. entity lock: write entity under tmp-<uuid>                 │
//! │       │                  + enqueue action          ◄── durable here    │
//! │       └─ 3. return {tmp, true}                                          │
//! │                                                                         │
//! │  spawned, only when online and every reference is real:                │
//! │       ├─ replay pass running or older action queued? ──► leave queued  │
//! │       ├─ send (bounded by immediate_send_timeout)                      │
//! │       │     ├─ ok ─────────► remap tmp → real + dequeue (one tx)       │
//! │       │     ├─ rejected ───► dead-letter + conflict                    │
//! │       │     └─ err/timeout ► leave queued, register background sync    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes never wait on the network. The caller renders from the temp id and
//! follows it through [`OptimisticWriter::current_id`] once confirmed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fieldquote_core::validation::{
    validate_blob, validate_customer_input, validate_line_item, validate_quote_input,
    validate_quote_patch,
};
use fieldquote_core::{
    ActionPayload, BlobKind, CachedBlob, ConflictReason, CoreError, Customer, CustomerInput,
    EntityId, EntityKind, LineItem, LineItemInput, NewCustomer, NewLineItems, NewQuote, Quote,
    QueuedAction, QuoteInput, QuotePatch, QuoteUpdate, ValidationError, MAX_LINE_ITEMS_PER_ACTION,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::remote;
use crate::status::ReplayFailure;

/// Id to render the written record under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub id: EntityId,
    pub is_temporary: bool,
}

impl WriteOutcome {
    fn for_id(id: EntityId) -> Self {
        let is_temporary = id.is_temporary();
        WriteOutcome { id, is_temporary }
    }
}

/// Immediate-send behaviour.
#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub immediate_send: bool,
    pub send_timeout: Duration,
}

impl WriterSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        WriterSettings {
            immediate_send: config.api.immediate_send,
            send_timeout: config.immediate_send_timeout(),
        }
    }
}

/// Store-first writes with a background immediate send.
#[derive(Clone)]
pub struct OptimisticWriter {
    ctx: SyncContext,
    settings: WriterSettings,
    in_flight: Arc<Mutex<JoinSet<()>>>,
}

impl OptimisticWriter {
    pub(crate) fn new(ctx: SyncContext, settings: WriterSettings) -> Self {
        OptimisticWriter {
            ctx,
            settings,
            in_flight: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    // =========================================================================
    // Quotes
    // =========================================================================

    pub async fn create_quote(&self, input: QuoteInput) -> SyncResult<WriteOutcome> {
        validate_quote_input(&input)?;

        let guard = self.ctx.entity_lock.lock().await;
        let customer_id = match &input.customer_id {
            Some(id) => Some(self.current_id(id).await?),
            None => None,
        };
        let quote = Quote::from_input(
            EntityId::new_temporary(),
            QuoteInput {
                customer_id,
                ..input
            },
        );
        self.ctx.repos.entities().put_quote(&quote).await?;
        debug!(quote_id = %quote.id, "Quote written locally");

        let action = self
            .enqueue(ActionPayload::CreateQuote(NewQuote {
                temp_id: quote.id.clone(),
                customer_id: quote.customer_id.clone(),
                title: quote.title.clone(),
                description: quote.description.clone(),
            }))
            .await?;
        drop(guard);

        self.send_soon(action).await;
        Ok(WriteOutcome::for_id(quote.id))
    }

    /// Patches a cached quote. `quote_id` may be a temp id that has since been
    /// confirmed.
    pub async fn update_quote(
        &self,
        quote_id: &EntityId,
        mut patch: QuotePatch,
    ) -> SyncResult<WriteOutcome> {
        validate_quote_patch(&patch)?;

        let guard = self.ctx.entity_lock.lock().await;
        let mut quote = self.cached_quote(quote_id).await?;
        if let Some(customer_id) = &patch.customer_id {
            patch.customer_id = Some(self.current_id(customer_id).await?);
        }
        patch.apply_to(&mut quote);
        self.ctx.repos.entities().put_quote(&quote).await?;

        let action = self
            .enqueue(ActionPayload::UpdateQuote(QuoteUpdate {
                quote_id: quote.id.clone(),
                patch,
            }))
            .await?;
        drop(guard);

        self.send_soon(action).await;
        Ok(WriteOutcome::for_id(quote.id))
    }

    pub async fn add_line_items(
        &self,
        quote_id: &EntityId,
        items: Vec<LineItemInput>,
    ) -> SyncResult<WriteOutcome> {
        if items.is_empty() {
            return Err(ValidationError::Required {
                field: "items".to_string(),
            }
            .into());
        }
        if items.len() > MAX_LINE_ITEMS_PER_ACTION {
            return Err(CoreError::TooManyLineItems {
                max: MAX_LINE_ITEMS_PER_ACTION,
            }
            .into());
        }
        for item in &items {
            validate_line_item(item)?;
        }

        let entities = self.ctx.repos.entities();
        let guard = self.ctx.entity_lock.lock().await;
        let mut quote = self.cached_quote(quote_id).await?;
        let items: Vec<LineItem> = items
            .into_iter()
            .map(|input| LineItem::from_input(quote.id.clone(), input))
            .collect();

        let existing = entities.line_items_for(&quote.id).await?;
        quote.recompute_total(existing.iter().chain(items.iter()));
        quote.updated_at = Utc::now();
        entities.put_quote_with_items(&quote, &items).await?;

        let action = self
            .enqueue(ActionPayload::CreateLineItems(NewLineItems {
                quote_id: quote.id.clone(),
                items,
            }))
            .await?;
        drop(guard);

        self.send_soon(action).await;
        Ok(WriteOutcome::for_id(quote.id))
    }

    // =========================================================================
    // Customers
    // =========================================================================

    pub async fn create_customer(&self, input: CustomerInput) -> SyncResult<WriteOutcome> {
        validate_customer_input(&input)?;

        let customer = Customer::from_input(EntityId::new_temporary(), input);
        self.ctx.repos.entities().put_customer(&customer).await?;
        debug!(customer_id = %customer.id, "Customer written locally");

        let action = self
            .enqueue(ActionPayload::CreateCustomer(NewCustomer {
                temp_id: customer.id.clone(),
                name: customer.name.clone(),
                email: customer.email.clone(),
                phone: customer.phone.clone(),
                address: customer.address.clone(),
            }))
            .await?;

        self.send_soon(action).await;
        Ok(WriteOutcome::for_id(customer.id))
    }

    // =========================================================================
    // Media
    // =========================================================================

    /// Caches a photo or recording for upload. Never part of an action
    /// payload; the replay engine uploads it once its quote is confirmed.
    pub async fn capture_blob(
        &self,
        quote_id: &EntityId,
        kind: BlobKind,
        content_type: &str,
        data: Vec<u8>,
    ) -> SyncResult<CachedBlob> {
        validate_blob(content_type, &data)?;

        let guard = self.ctx.entity_lock.lock().await;
        let quote = self.cached_quote(quote_id).await?;
        let blob = CachedBlob::new(quote.id, kind, content_type.to_string(), data);
        self.ctx.repos.blobs().save(&blob).await?;
        drop(guard);
        info!(
            local_ref = %blob.local_ref,
            quote_id = %blob.quote_id,
            kind = blob.kind.as_str(),
            bytes = blob.data.len(),
            "Media captured"
        );

        self.ctx.request_background_sync();
        self.ctx.status.refresh_counts_quietly(&self.ctx.repos).await;
        Ok(blob)
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    async fn enqueue(&self, payload: ActionPayload) -> SyncResult<QueuedAction> {
        let action = self.ctx.queue.enqueue(payload).await?;
        debug!(action_id = action.id, kind = %action.kind(), "Action queued");
        Ok(action)
    }

    /// Starts an immediate send in the background when allowed, else leaves
    /// the action to the replay engine.
    async fn send_soon(&self, action: QueuedAction) {
        self.ctx.status.refresh_counts_quietly(&self.ctx.repos).await;

        let sendable = self.settings.immediate_send
            && self.ctx.connectivity.is_online()
            && action.payload.unresolved_references().is_empty();
        if !sendable {
            info!(action_id = action.id, kind = %action.kind(), "Action queued for replay");
            self.ctx.request_background_sync();
            return;
        }

        let ctx = self.ctx.clone();
        let limit = self.settings.send_timeout;
        let mut in_flight = self.in_flight.lock().await;
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(send_immediately(ctx, action, limit));
    }

    /// Waits for immediate sends started by earlier writes.
    ///
    /// Call before shutting down; dropping the writer abandons them and the
    /// actions stay queued.
    pub async fn flush(&self) {
        let mut in_flight = std::mem::take(&mut *self.in_flight.lock().await);
        while in_flight.join_next().await.is_some() {}
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Where a possibly temporary id lives now.
    pub async fn current_id(&self, id: &EntityId) -> SyncResult<EntityId> {
        Ok(self.ctx.repos.id_map().current(id).await?)
    }

    async fn cached_quote(&self, quote_id: &EntityId) -> SyncResult<Quote> {
        let current = self.current_id(quote_id).await?;
        self.ctx
            .repos
            .entities()
            .get_quote(&current)
            .await?
            .ok_or_else(|| {
                CoreError::EntityNotFound {
                    kind: EntityKind::Quote,
                    id: current.to_string(),
                }
                .into()
            })
    }
}

// =============================================================================
// Immediate Send
// =============================================================================

enum Immediate {
    Sent,
    /// Dead-lettered and surfaced as a conflict.
    Rejected,
    /// Still queued for the replay engine.
    Left,
}

async fn send_immediately(ctx: SyncContext, action: QueuedAction, limit: Duration) {
    match try_send(&ctx, &action, limit).await {
        Ok(Immediate::Sent) => {
            info!(action_id = action.id, kind = %action.kind(), "Action sent immediately");
            ctx.status.refresh_counts_quietly(&ctx.repos).await;
        }
        Ok(Immediate::Rejected) => ctx.status.refresh_counts_quietly(&ctx.repos).await,
        Ok(Immediate::Left) => ctx.request_background_sync(),
        Err(err) => {
            warn!(action_id = action.id, error = %err, "Immediate send aborted, action stays queued");
            ctx.request_background_sync();
        }
    }
}

async fn try_send(
    ctx: &SyncContext,
    action: &QueuedAction,
    limit: Duration,
) -> SyncResult<Immediate> {
    // a replay pass owns the connection and will pick the action up
    let Ok(_send) = ctx.send_lock.try_lock() else {
        return Ok(Immediate::Left);
    };
    if ctx.queue.peek().await?.map(|head| head.id) != Some(action.id) {
        debug!(action_id = action.id, "Older actions queued, not overtaking");
        return Ok(Immediate::Left);
    }

    let outcome = match timeout(limit, remote::send(ctx.remote.as_ref(), &action.payload)).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) if err.is_rejection() => {
            let message = err.to_string();
            ctx.fail_terminal(action, ConflictReason::Rejected, &message)
                .await?;
            ctx.status
                .record_error(ReplayFailure::ConflictDetected, message)
                .await;
            return Ok(Immediate::Rejected);
        }
        Ok(Err(err)) => {
            debug!(action_id = action.id, error = %err, "Immediate send failed, left queued");
            return Ok(Immediate::Left);
        }
        Err(_) => {
            debug!(
                action_id = action.id,
                timeout_ms = limit.as_millis() as u64,
                "Immediate send timed out, left queued"
            );
            return Ok(Immediate::Left);
        }
    };

    let _entities = ctx.entity_lock.lock().await;
    match (action.payload.created_kind(), &action.temp_id, outcome.created) {
        (Some(kind), Some(temp), Some(real)) => {
            ctx.repos
                .remapper()
                .remap_and_complete(kind, temp, &real, Some(action.id))
                .await?;
        }
        _ => {
            ctx.queue.remove(action.id).await?;
        }
    }
    Ok(Immediate::Sent)
}

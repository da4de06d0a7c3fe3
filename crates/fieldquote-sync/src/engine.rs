//! # Sync/Replay Engine
//!
//! Drains the offline queue against the remote API, one action at a time,
//! then uploads pending media.
//!
//! ## Replay Pass
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   process_offline_sync(trigger)                         │
//! │                                                                         │
//! │  offline? ─────────────────────────────────────────► skipped           │
//! │                                                                         │
//! │  QUEUE PHASE (snapshot taken at pass start, head first)                │
//! │  ──────────────────────────────────────────────────                     │
//! │  for action in snapshot:                                               │
//! │    a. resolve tmp refs through id map (may be filled this pass)        │
//! │       ├─ creator dead-lettered / blocked ──► skip, stays queued        │
//! │       └─ creator gone everywhere ──────────► dead-letter + conflict    │
//! │    b. backoff not elapsed (auto trigger) ──► stop pass (FIFO)          │
//! │    c. send                                                             │
//! │       ├─ ok ────────► remap tmp → real + dequeue (one transaction)     │
//! │       ├─ rejected ──► dead-letter + conflict, continue                 │
//! │       └─ transient ─► retry_count += 1                                 │
//! │                        ├─ below max ──► stop pass, keep at head        │
//! │                        └─ at max ─────► dead-letter + conflict, go on  │
//! │                                                                         │
//! │  BLOB PHASE (skipped after a transient stop)                           │
//! │  ─────────────────────────────────────────                              │
//! │  for blob with uploaded = false, quote id real (via id map), not       │
//! │  rejected:                                                             │
//! │    upload ──► uploaded = true ──► delete                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only one pass runs at a time. A trigger arriving mid-pass is coalesced
//! into one more pass right after the current one. Failures inside a pass
//! never escape it; they end up in [`PassReport`] and the sync status.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fieldquote_core::{
    ConflictEntity, ConflictReason, EntityId, EntityKind, QueueCount, QueuedAction, Resolution,
};
use fieldquote_db::{DurableStore, Repositories, StorageMode};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::background::{BackgroundSync, NoopBackgroundSync};
use crate::config::SyncConfig;
use crate::conflicts::{ConflictSurface, ResolveOutcome};
use crate::connectivity::ConnectivityMonitor;
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::optimistic::{OptimisticWriter, WriterSettings};
use crate::queue::{ActionQueue, RetryDecision};
use crate::remote::{self, RemoteApi, RemoteError};
use crate::retry::RetryPolicy;
use crate::status::{NoOpEmitter, ReplayFailure, StatusTracker, SyncEventEmitter, SyncStatus};

// =============================================================================
// Trigger & Report
// =============================================================================

/// Why a pass was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Startup,
    ConnectivityRestored,
    BackgroundSync,
    /// User refresh; ignores backoff windows.
    Manual,
    RetryTimer,
}

impl Trigger {
    fn ignores_backoff(&self) -> bool {
        matches!(self, Trigger::Manual)
    }
}

/// What a call to [`SyncEngine::process_offline_sync`] did.
///
/// Counters add up over coalesced passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassReport {
    /// Passes run by this call (0 when coalesced into a running one).
    pub passes: u32,
    pub sent: u32,
    /// Creates whose temp id was swapped for the server id.
    pub remapped: u32,
    /// Transient failures left at the head for a later pass.
    pub retried: u32,
    pub dead_lettered: u32,
    pub conflicts: u32,
    /// Skipped because a creator they depend on is not confirmed.
    pub blocked: u32,
    /// Not attempted because their backoff window is still open.
    pub deferred: u32,
    pub blobs_uploaded: u32,
    /// Pending media whose quote is unconfirmed or rejected.
    pub blobs_waiting: u32,
    /// Stopped early on a transient failure.
    pub halted: bool,
    pub skipped_offline: bool,
    /// Trigger was folded into a pass already running.
    pub coalesced: bool,
    /// When an automatic retry makes sense.
    pub retry_after_ms: Option<u64>,
    /// Storage-level failure that ended the pass.
    pub error: Option<String>,
}

impl PassReport {
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_ms.map(Duration::from_millis)
    }

    /// Nothing failed and nothing is waiting on a backoff window.
    pub fn is_clean(&self) -> bool {
        !self.halted
            && self.deferred == 0
            && self.dead_lettered == 0
            && self.conflicts == 0
            && self.error.is_none()
    }

    fn absorb(&mut self, pass: PassReport) {
        self.passes += pass.passes;
        self.sent += pass.sent;
        self.remapped += pass.remapped;
        self.retried += pass.retried;
        self.dead_lettered += pass.dead_lettered;
        self.conflicts += pass.conflicts;
        self.blocked = pass.blocked;
        self.deferred = pass.deferred;
        self.blobs_uploaded += pass.blobs_uploaded;
        self.blobs_waiting = pass.blobs_waiting;
        // the latest pass decides what is still outstanding
        self.halted = pass.halted;
        self.skipped_offline = pass.skipped_offline;
        self.retry_after_ms = pass.retry_after_ms;
        self.error = pass.error;
    }

    fn retry_in(&mut self, delay: Duration) {
        let millis = delay.as_millis() as u64;
        self.retry_after_ms = Some(self.retry_after_ms.map_or(millis, |m| m.min(millis)));
    }
}

#[derive(Default)]
struct PassState {
    running: bool,
    /// Trigger folded in while running; `Manual` wins.
    pending: Option<Trigger>,
}

/// Why the queue phase stopped early.
enum QueueStop {
    Drained,
    Transient,
    Deferred,
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Owns the store, connectivity monitor and remote API for one process.
pub struct SyncEngine {
    ctx: SyncContext,
    writer: OptimisticWriter,
    state: Mutex<PassState>,
}

impl SyncEngine {
    pub fn writer(&self) -> &OptimisticWriter {
        &self.writer
    }

    pub fn conflicts(&self) -> &ConflictSurface {
        &self.ctx.conflicts
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.ctx.connectivity
    }

    pub fn queue(&self) -> &ActionQueue {
        &self.ctx.queue
    }

    pub fn repositories(&self) -> &Repositories {
        &self.ctx.repos
    }

    pub async fn status(&self) -> SyncStatus {
        self.ctx.status.snapshot().await
    }

    pub(crate) fn status_tracker(&self) -> &StatusTracker {
        &self.ctx.status
    }

    /// Pending actions, pending media and open conflicts.
    pub async fn get_queue_count(&self) -> SyncResult<QueueCount> {
        self.ctx.status.refresh_counts(&self.ctx.repos).await
    }

    /// Applies a user decision, then nudges a pass if work was requeued.
    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: Resolution,
    ) -> SyncResult<ResolveOutcome> {
        let outcome = self.ctx.conflicts.resolve(conflict_id, resolution).await?;
        self.ctx.status.refresh_counts_quietly(&self.ctx.repos).await;
        if matches!(outcome, ResolveOutcome::Requeued(_)) {
            self.ctx.request_background_sync();
        }
        Ok(outcome)
    }

    // =========================================================================
    // Replay
    // =========================================================================

    /// Runs a replay pass. Safe to call repeatedly and concurrently; never
    /// fails.
    pub async fn process_offline_sync(&self, trigger: Trigger) -> PassReport {
        {
            let mut state = self.state.lock().await;
            if state.running {
                state.pending = Some(match state.pending {
                    Some(Trigger::Manual) => Trigger::Manual,
                    _ => trigger,
                });
                debug!(?trigger, "Replay pass running, trigger coalesced");
                return PassReport {
                    coalesced: true,
                    ..Default::default()
                };
            }
            state.running = true;
        }

        let mut report = PassReport::default();
        let mut trigger = trigger;
        loop {
            let pass = self.run_pass(trigger).await;
            report.absorb(pass);

            let mut state = self.state.lock().await;
            match state.pending.take() {
                Some(next) => trigger = next,
                None => {
                    state.running = false;
                    break;
                }
            }
        }
        report
    }

    async fn run_pass(&self, trigger: Trigger) -> PassReport {
        let mut report = PassReport {
            passes: 1,
            ..Default::default()
        };

        let online = self.ctx.connectivity.is_online();
        self.ctx.status.set_online(online).await;
        if !online {
            debug!(?trigger, "Offline, replay pass skipped");
            report.skipped_offline = true;
            return report;
        }

        let _send = self.ctx.send_lock.lock().await;
        info!(?trigger, "Replay pass starting");
        self.ctx.status.set_syncing(true).await;

        if let Err(err) = self.replay(trigger, &mut report).await {
            error!(error = %err, "Replay pass aborted");
            let kind = if err.is_storage_unavailable() || matches!(err, SyncError::DatabaseError(_))
            {
                ReplayFailure::StorageUnavailable
            } else {
                ReplayFailure::TransientSendFailure
            };
            self.ctx.status.record_error(kind, err.to_string()).await;
            report.error = Some(err.to_string());
        }

        self.ctx.status.refresh_counts_quietly(&self.ctx.repos).await;
        if report.is_clean() {
            self.ctx.status.mark_synced().await;
        }
        self.ctx.status.set_syncing(false).await;

        info!(
            sent = report.sent,
            remapped = report.remapped,
            dead_lettered = report.dead_lettered,
            blocked = report.blocked,
            blobs_uploaded = report.blobs_uploaded,
            halted = report.halted,
            "Replay pass finished"
        );
        report
    }

    async fn replay(&self, trigger: Trigger, report: &mut PassReport) -> SyncResult<()> {
        let stop = self.replay_queue(trigger, report).await?;
        match stop {
            QueueStop::Transient => {
                debug!("Skipping media upload after transient failure");
                Ok(())
            }
            QueueStop::Drained | QueueStop::Deferred => self.upload_blobs(report).await,
        }
    }

    // =========================================================================
    // Queue Phase
    // =========================================================================

    async fn replay_queue(&self, trigger: Trigger, report: &mut PassReport) -> SyncResult<QueueStop> {
        let repos = &self.ctx.repos;
        let queue = &self.ctx.queue;

        let snapshot = queue.drain().await?;
        let total = snapshot.len() as u64;
        let mut id_map: HashMap<EntityId, EntityId> = repos
            .id_map()
            .list()
            .await?
            .into_iter()
            .map(|mapping| (mapping.temp_id, mapping.real_id))
            .collect();
        // temp ids whose creator cannot be confirmed this pass
        let mut blocked: HashSet<EntityId> = repos
            .dead_letters()
            .list()
            .await?
            .into_iter()
            .filter_map(|entry| entry.action.temp_id)
            .collect();
        let creators: HashSet<EntityId> = snapshot
            .iter()
            .filter_map(|action| action.temp_id.clone())
            .collect();
        let now = Utc::now();

        for (done, queued) in snapshot.iter().enumerate() {
            self.ctx.status.emit_progress(done as u64, total - done as u64);

            // may have been resolved or removed since the snapshot
            let Some(mut action) = queue.get(queued.id).await? else {
                continue;
            };

            if action.payload.resolve_references(|id| id_map.get(id).cloned()) > 0 {
                queue.update(&action).await?;
            }

            let unresolved: Vec<EntityId> = action
                .payload
                .unresolved_references()
                .into_iter()
                .cloned()
                .collect();
            if !unresolved.is_empty() {
                match self.lineage(&unresolved, &blocked, &creators).await? {
                    Lineage::Waiting(creator) => {
                        debug!(action_id = action.id, %creator, "Blocked on unconfirmed creator");
                        report.blocked += 1;
                    }
                    Lineage::Dangling(missing) => {
                        let message = format!("references {missing}, which no longer exists");
                        self.ctx
                            .fail_terminal(&action, ConflictReason::DanglingReference, &message)
                            .await?;
                        self.ctx
                            .status
                            .record_error(ReplayFailure::ConflictDetected, message)
                            .await;
                        report.dead_lettered += 1;
                        report.conflicts += 1;
                    }
                }
                if let Some(temp) = &action.temp_id {
                    blocked.insert(temp.clone());
                }
                continue;
            }

            if !trigger.ignores_backoff() && !action.is_due(now) {
                if let Some(at) = action.next_attempt_at {
                    report.retry_in((at - now).to_std().unwrap_or(Duration::ZERO));
                }
                debug!(action_id = action.id, "Head action backing off, pass stops");
                report.deferred += 1;
                return Ok(QueueStop::Deferred);
            }

            match remote::send(self.ctx.remote.as_ref(), &action.payload).await {
                Ok(outcome) => {
                    self.complete(&action, outcome.created, &mut id_map, report)
                        .await?;
                }
                Err(err) if err.is_rejection() => {
                    let message = err.to_string();
                    self.ctx
                        .fail_terminal(&action, ConflictReason::Rejected, &message)
                        .await?;
                    self.ctx
                        .status
                        .record_error(ReplayFailure::ConflictDetected, message)
                        .await;
                    report.dead_lettered += 1;
                    report.conflicts += 1;
                    if let Some(temp) = &action.temp_id {
                        blocked.insert(temp.clone());
                    }
                }
                Err(err) => {
                    if self.retry_or_give_up(&action, &err, report).await? {
                        if let Some(temp) = &action.temp_id {
                            blocked.insert(temp.clone());
                        }
                        continue;
                    }
                    return Ok(QueueStop::Transient);
                }
            }
        }

        self.ctx.status.emit_progress(total, 0);
        Ok(QueueStop::Drained)
    }

    /// Classifies unresolved references.
    async fn lineage(
        &self,
        unresolved: &[EntityId],
        blocked: &HashSet<EntityId>,
        creators: &HashSet<EntityId>,
    ) -> SyncResult<Lineage> {
        if let Some(id) = unresolved.iter().find(|id| blocked.contains(*id)) {
            return Ok(Lineage::Waiting(id.clone()));
        }
        for id in unresolved {
            if creators.contains(id) || self.creator_exists(id).await? {
                return Ok(Lineage::Waiting(id.clone()));
            }
        }
        Ok(Lineage::Dangling(unresolved[0].clone()))
    }

    /// Looks beyond the snapshot: a creator may have been restored since.
    async fn creator_exists(&self, temp: &EntityId) -> SyncResult<bool> {
        let repos = &self.ctx.repos;
        if repos.id_map().get(temp).await?.is_some() {
            return Ok(true);
        }
        let queued = repos
            .actions()
            .list()
            .await?
            .iter()
            .any(|action| action.temp_id.as_ref() == Some(temp));
        if queued {
            return Ok(true);
        }
        Ok(repos
            .dead_letters()
            .list()
            .await?
            .iter()
            .any(|entry| entry.action.temp_id.as_ref() == Some(temp)))
    }

    async fn complete(
        &self,
        action: &QueuedAction,
        created: Option<EntityId>,
        id_map: &mut HashMap<EntityId, EntityId>,
        report: &mut PassReport,
    ) -> SyncResult<()> {
        report.sent += 1;
        match (action.payload.created_kind(), &action.temp_id, created) {
            (Some(kind), Some(temp), Some(real)) => {
                let _entities = self.ctx.entity_lock.lock().await;
                self.ctx
                    .repos
                    .remapper()
                    .remap_and_complete(kind, temp, &real, Some(action.id))
                    .await?;
                info!(action_id = action.id, %temp, %real, "Create confirmed");
                id_map.insert(temp.clone(), real);
                report.remapped += 1;
            }
            _ => {
                self.ctx.queue.remove(action.id).await?;
                debug!(action_id = action.id, kind = %action.kind(), "Action confirmed");
            }
        }
        Ok(())
    }

    /// Returns true when the action was dead-lettered and the pass goes on.
    async fn retry_or_give_up(
        &self,
        action: &QueuedAction,
        err: &RemoteError,
        report: &mut PassReport,
    ) -> SyncResult<bool> {
        let message = err.to_string();
        match self.ctx.queue.increment_retry(action.id, &message).await? {
            RetryDecision::RetryAfter { action, delay } => {
                warn!(
                    action_id = action.id,
                    kind = %action.kind(),
                    retry_count = action.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Send failed, will retry"
                );
                self.ctx
                    .status
                    .record_error(ReplayFailure::TransientSendFailure, message)
                    .await;
                report.retried += 1;
                report.halted = true;
                report.retry_in(delay);
                Ok(false)
            }
            RetryDecision::Exhausted(action) => {
                let message = format!(
                    "gave up after {} attempts: {message}",
                    action.retry_count
                );
                self.ctx
                    .fail_terminal(&action, ConflictReason::RetriesExhausted, &message)
                    .await?;
                self.ctx
                    .status
                    .record_error(ReplayFailure::TerminalSendFailure, message)
                    .await;
                report.dead_lettered += 1;
                report.conflicts += 1;
                Ok(true)
            }
        }
    }

    // =========================================================================
    // Blob Phase
    // =========================================================================

    async fn upload_blobs(&self, report: &mut PassReport) -> SyncResult<()> {
        let blobs = self.ctx.repos.blobs();
        // leftovers from an upload confirmed right before a crash
        blobs.purge_uploaded().await?;

        let id_map = self.ctx.repos.id_map();
        for mut blob in blobs.pending().await? {
            // saved under a temp id the remap had already swapped out
            if blob.quote_id.is_temporary() {
                if let Some(real) = id_map.resolve(&blob.quote_id).await? {
                    debug!(local_ref = %blob.local_ref, %real, "Stale media quote id resolved");
                    blob.quote_id = real;
                    blobs.save(&blob).await?;
                }
            }
            if blob.rejected.is_some() || blob.quote_id.is_temporary() {
                report.blobs_waiting += 1;
                continue;
            }

            match self.ctx.remote.upload_blob(&blob).await {
                Ok(path) => {
                    blobs.mark_uploaded(&blob.local_ref, &path).await?;
                    blobs.remove_uploaded(&blob.local_ref).await?;
                    debug!(local_ref = %blob.local_ref, %path, "Media uploaded");
                    report.blobs_uploaded += 1;
                }
                Err(err) if err.is_rejection() => {
                    let message = err.to_string();
                    blobs.mark_rejected(&blob.local_ref, &message).await?;
                    self.ctx
                        .conflicts
                        .report_conflict(
                            ConflictEntity::new(
                                EntityKind::Blob,
                                EntityId::new(blob.local_ref.clone()),
                            ),
                            ConflictReason::Rejected,
                            message.clone(),
                        )
                        .await?;
                    self.ctx
                        .status
                        .record_error(ReplayFailure::ConflictDetected, message)
                        .await;
                    report.conflicts += 1;
                    report.blobs_waiting += 1;
                }
                Err(err) => {
                    warn!(local_ref = %blob.local_ref, error = %err, "Media upload failed");
                    self.ctx
                        .status
                        .record_error(ReplayFailure::TransientSendFailure, err.to_string())
                        .await;
                    report.halted = true;
                    report.retry_in(self.ctx.queue.policy().delay_for(1));
                    break;
                }
            }
        }
        Ok(())
    }
}

enum Lineage {
    /// Creator still queued, blocked or dead-lettered.
    Waiting(EntityId),
    /// No creator anywhere.
    Dangling(EntityId),
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for [`SyncEngine`].
pub struct SyncEngineBuilder {
    config: SyncConfig,
    store: Option<(Arc<dyn DurableStore>, StorageMode)>,
    remote: Option<Arc<dyn RemoteApi>>,
    connectivity: Option<ConnectivityMonitor>,
    background: Option<Arc<dyn BackgroundSync>>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
    policy: Option<RetryPolicy>,
}

impl SyncEngineBuilder {
    pub fn new(config: SyncConfig) -> Self {
        SyncEngineBuilder {
            config,
            store: None,
            remote: None,
            connectivity: None,
            background: None,
            emitter: None,
            policy: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn DurableStore>, mode: StorageMode) -> Self {
        self.store = Some((store, mode));
        self
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteApi>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Defaults to a monitor built from the config, assumed online.
    pub fn with_connectivity(mut self, connectivity: ConnectivityMonitor) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn with_background(mut self, background: Arc<dyn BackgroundSync>) -> Self {
        self.background = Some(background);
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Overrides the `[retry]` section.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn build(self) -> SyncResult<Arc<SyncEngine>> {
        let (store, mode) = self
            .store
            .ok_or_else(|| SyncError::InvalidConfig("Store required".into()))?;
        let remote = self
            .remote
            .ok_or_else(|| SyncError::InvalidConfig("Remote API required".into()))?;

        if mode == StorageMode::Degraded {
            warn!("Sync engine running on in-memory storage");
        }

        let repos = Repositories::new(store);
        let policy = self
            .policy
            .unwrap_or_else(|| RetryPolicy::from_settings(&self.config.retry));
        let connectivity = self
            .connectivity
            .unwrap_or_else(|| ConnectivityMonitor::from_config(&self.config, true));
        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));

        let entity_lock = Arc::new(Mutex::new(()));
        let ctx = SyncContext {
            queue: ActionQueue::new(repos.clone(), policy),
            conflicts: ConflictSurface::new(repos.clone(), entity_lock.clone()),
            status: StatusTracker::new(mode, emitter),
            background: self
                .background
                .unwrap_or_else(|| Arc::new(NoopBackgroundSync)),
            send_lock: Arc::new(Mutex::new(())),
            entity_lock,
            repos,
            connectivity,
            remote,
        };
        let writer = OptimisticWriter::new(ctx.clone(), WriterSettings::from_config(&self.config));

        info!(
            device_id = %self.config.device_id(),
            storage = ?mode,
            max_attempts = ctx.queue.policy().max_attempts(),
            "Sync engine ready"
        );
        Ok(Arc::new(SyncEngine {
            ctx,
            writer,
            state: Mutex::new(PassState::default()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{offline_engine, rejected, unavailable, Accepted, Endpoint, FakeRemote};
    use fieldquote_core::{BlobKind, CustomerInput, LineItemInput, QuoteInput};

    fn quote_input(title: &str) -> QuoteInput {
        QuoteInput {
            title: title.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_offline_pass_is_skipped() {
        let (engine, _) = offline_engine(FakeRemote::new());
        engine.writer().create_quote(quote_input("Fence")).await.unwrap();

        let report = engine.process_offline_sync(Trigger::Manual).await;
        assert!(report.skipped_offline);
        assert_eq!(report.sent, 0);
        assert_eq!(engine.get_queue_count().await.unwrap().pending_actions, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_halts_and_keeps_head() {
        let remote = FakeRemote::new();
        remote.fail_next(Endpoint::CreateQuote, unavailable(), 1);
        let (engine, connectivity) = offline_engine(remote.clone());
        let writer = engine.writer();
        writer.create_quote(quote_input("Fence")).await.unwrap();
        writer
            .create_customer(CustomerInput {
                name: "Independent".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        connectivity.report(true);

        let report = engine.process_offline_sync(Trigger::ConnectivityRestored).await;
        assert!(report.halted);
        assert_eq!(report.retried, 1);
        assert_eq!(report.retry_after(), Some(Duration::from_secs(1)));
        // the customer behind it was not attempted
        assert_eq!(remote.attempts(Endpoint::CreateCustomer), 0);

        let head = engine.queue().peek().await.unwrap().unwrap();
        assert_eq!(head.retry_count, 1);
        assert_eq!(
            engine.status().await.last_error.map(|e| e.kind),
            Some(ReplayFailure::TransientSendFailure)
        );

        // automatic trigger respects the backoff window
        let report = engine.process_offline_sync(Trigger::RetryTimer).await;
        assert_eq!(report.deferred, 1);
        assert_eq!(remote.attempts(Endpoint::CreateQuote), 1);

        // manual refresh does not
        let report = engine.process_offline_sync(Trigger::Manual).await;
        assert_eq!(report.sent, 2);
        assert!(report.is_clean());
        assert!(engine.queue().is_empty().await.unwrap());
        assert!(engine.status().await.last_error.is_none());
    }

    #[tokio::test]
    async fn test_rejection_is_terminal_and_queue_continues() {
        let remote = FakeRemote::new();
        remote.fail_next(Endpoint::CreateQuote, rejected("customer archived"), 1);
        let (engine, connectivity) = offline_engine(remote.clone());
        let writer = engine.writer();
        let doomed = writer.create_quote(quote_input("Fence")).await.unwrap();
        writer.create_quote(quote_input("Gate")).await.unwrap();
        connectivity.report(true);

        let report = engine.process_offline_sync(Trigger::Manual).await;
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(remote.attempts(Endpoint::CreateQuote), 2);

        let conflicts = engine.conflicts().list().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].reason, ConflictReason::Rejected);
        assert_eq!(conflicts[0].entity.id, doomed.id);
        assert_eq!(
            engine.status().await.last_error.map(|e| e.kind),
            Some(ReplayFailure::ConflictDetected)
        );

        // keep local: requeued with a fresh budget and sent next pass
        engine
            .resolve_conflict(&conflicts[0].id, Resolution::KeepLocal)
            .await
            .unwrap();
        let report = engine.process_offline_sync(Trigger::Manual).await;
        assert_eq!(report.remapped, 1);
        assert!(engine.get_queue_count().await.unwrap().is_idle());
    }

    #[tokio::test]
    async fn test_temporary_server_id_is_never_resent() {
        let remote = FakeRemote::new();
        remote.set_quote_prefix("tmp-");
        let (engine, connectivity) = offline_engine(remote.clone());
        let quote = engine.writer().create_quote(quote_input("Decking")).await.unwrap();
        connectivity.report(true);

        let report = engine.process_offline_sync(Trigger::Manual).await;
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.remapped, 0);
        assert!(engine.queue().is_empty().await.unwrap());

        let conflict = engine.conflicts().list().await.unwrap().remove(0);
        assert_eq!(conflict.reason, ConflictReason::Rejected);
        assert_eq!(conflict.entity.id, quote.id);

        engine.process_offline_sync(Trigger::Manual).await;
        assert_eq!(remote.attempts(Endpoint::CreateQuote), 1);
    }

    #[tokio::test]
    async fn test_discarded_creator_turns_dependant_into_conflict() {
        let remote = FakeRemote::new();
        remote.fail_next(Endpoint::CreateQuote, rejected("duplicate"), 1);
        let (engine, connectivity) = offline_engine(remote.clone());
        let writer = engine.writer();
        let quote = writer.create_quote(quote_input("Fence")).await.unwrap();
        writer
            .add_line_items(
                &quote.id,
                vec![LineItemInput {
                    description: "Posts".to_string(),
                    quantity: 10,
                    unit_price_cents: 1_500,
                }],
            )
            .await
            .unwrap();
        connectivity.report(true);

        let report = engine.process_offline_sync(Trigger::Manual).await;
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.blocked, 1);
        assert_eq!(remote.attempts(Endpoint::CreateLineItems), 0);

        let conflict = engine.conflicts().list().await.unwrap().remove(0);
        engine
            .resolve_conflict(&conflict.id, Resolution::Discard)
            .await
            .unwrap();

        let report = engine.process_offline_sync(Trigger::Manual).await;
        assert_eq!(report.dead_lettered, 1);
        let conflicts = engine.conflicts().list().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].reason, ConflictReason::DanglingReference);
        assert_eq!(remote.attempts(Endpoint::CreateLineItems), 0);
    }

    #[tokio::test]
    async fn test_media_waits_for_its_quote() {
        let remote = FakeRemote::new();
        remote.fail_next(Endpoint::CreateQuote, unavailable(), 1);
        let (engine, connectivity) = offline_engine(remote.clone());
        let writer = engine.writer();
        let quote = writer.create_quote(quote_input("Kitchen")).await.unwrap();
        let photo = writer
            .capture_blob(&quote.id, BlobKind::Photo, "image/jpeg", vec![0xff, 0xd8])
            .await
            .unwrap();
        connectivity.report(true);

        // quote send fails: nothing uploaded, blob kept
        let report = engine.process_offline_sync(Trigger::Manual).await;
        assert_eq!(report.blobs_uploaded, 0);
        assert_eq!(remote.attempts(Endpoint::UploadBlob), 0);

        let report = engine.process_offline_sync(Trigger::Manual).await;
        assert_eq!(report.remapped, 1);
        assert_eq!(report.blobs_uploaded, 1);
        assert_eq!(
            remote.accepted().last(),
            Some(&Accepted::Blob {
                local_ref: photo.local_ref.clone(),
                quote_id: EntityId::from("q-42"),
            })
        );
        assert!(engine
            .repositories()
            .blobs()
            .get(&photo.local_ref)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_blob() {
        let remote = FakeRemote::new();
        let (engine, connectivity) = offline_engine(remote.clone());
        let quote = engine.writer().create_quote(quote_input("Bathroom")).await.unwrap();
        let photo = engine
            .writer()
            .capture_blob(&quote.id, BlobKind::Photo, "image/png", vec![1, 2])
            .await
            .unwrap();
        connectivity.report(true);
        remote.take_down(Endpoint::UploadBlob, unavailable());

        let report = engine.process_offline_sync(Trigger::Manual).await;
        assert_eq!(report.remapped, 1);
        assert!(report.halted);
        let kept = engine
            .repositories()
            .blobs()
            .get(&photo.local_ref)
            .await
            .unwrap()
            .unwrap();
        assert!(!kept.uploaded);
        assert_eq!(kept.quote_id, EntityId::from("q-42"));

        remote.heal(Endpoint::UploadBlob);
        let report = engine.process_offline_sync(Trigger::Manual).await;
        assert_eq!(report.blobs_uploaded, 1);
        assert_eq!(engine.get_queue_count().await.unwrap().pending_blobs, 0);
    }

    #[tokio::test]
    async fn test_rejected_blob_becomes_conflict() {
        let remote = FakeRemote::new();
        remote.fail_next(Endpoint::UploadBlob, rejected("unsupported media"), 1);
        let (engine, connectivity) = offline_engine(remote.clone());
        let quote = engine.writer().create_quote(quote_input("Loft")).await.unwrap();
        let clip = engine
            .writer()
            .capture_blob(&quote.id, BlobKind::Audio, "audio/ogg", vec![9])
            .await
            .unwrap();
        connectivity.report(true);

        let report = engine.process_offline_sync(Trigger::Manual).await;
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.blobs_waiting, 1);

        // not retried until the user says so
        let report = engine.process_offline_sync(Trigger::Manual).await;
        assert_eq!(report.blobs_uploaded, 0);
        assert_eq!(remote.attempts(Endpoint::UploadBlob), 1);

        let conflict = engine.conflicts().list().await.unwrap().remove(0);
        assert_eq!(conflict.entity.kind, EntityKind::Blob);
        assert_eq!(conflict.entity.id.as_str(), clip.local_ref);
        engine
            .resolve_conflict(&conflict.id, Resolution::KeepLocal)
            .await
            .unwrap();

        let report = engine.process_offline_sync(Trigger::Manual).await;
        assert_eq!(report.blobs_uploaded, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_triggers_are_coalesced() {
        let remote = FakeRemote::new();
        remote.set_latency(Duration::from_millis(200));
        let (engine, connectivity) = offline_engine(remote.clone());
        engine.writer().create_quote(quote_input("Porch")).await.unwrap();
        connectivity.report(true);

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.process_offline_sync(Trigger::Manual).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = engine.process_offline_sync(Trigger::BackgroundSync).await;
        assert!(second.coalesced);
        assert_eq!(second.passes, 0);

        let first = first.await.unwrap();
        assert_eq!(first.passes, 2);
        assert_eq!(first.sent, 1);
        assert_eq!(remote.attempts(Endpoint::CreateQuote), 1);
    }
}

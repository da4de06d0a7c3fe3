//! # Sync Status
//!
//! What the sync widget shows: queue depth, open conflicts, whether a pass is
//! running, and the last error.
//!
//! ## Event Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Status Updates                                  │
//! │                                                                         │
//! │  OptimisticWriter ──┐                                                   │
//! │  SyncEngine ────────┼──► StatusTracker ──► RwLock<SyncStatus>           │
//! │  SyncAgent ─────────┘          │                                        │
//! │                                └──► SyncEventEmitter                    │
//! │                                       • emit_status(&SyncStatus)        │
//! │                                       • emit_progress(done, remaining)  │
//! │                                       • emit_error(message, retryable)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fieldquote_core::QueueCount;
use fieldquote_db::{Repositories, StorageMode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::SyncResult;

// =============================================================================
// Replay Failure
// =============================================================================

/// How a replay pass (or part of it) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayFailure {
    /// Local store inaccessible.
    StorageUnavailable,
    /// Network or API error; retried with backoff.
    TransientSendFailure,
    /// Retry budget spent; action dead-lettered.
    TerminalSendFailure,
    /// Server refused a mutation; action dead-lettered.
    ConflictDetected,
}

impl ReplayFailure {
    /// Whether the failed work will be retried without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReplayFailure::StorageUnavailable | ReplayFailure::TransientSendFailure
        )
    }
}

/// Last failure shown by the status indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastError {
    pub kind: ReplayFailure,
    pub message: String,
    pub at: DateTime<Utc>,
}

// =============================================================================
// Sync Status
// =============================================================================

/// Current sync status for external queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Actions waiting in the queue.
    pub pending_actions: u64,

    /// Captured blobs not yet acknowledged by the server.
    pub pending_blobs: u64,

    /// Conflicts awaiting a user decision.
    pub open_conflicts: u64,

    /// Actions set aside after terminal failure.
    pub dead_letters: u64,

    /// A replay pass is running.
    pub is_syncing: bool,

    /// Debounced connectivity state.
    pub is_online: bool,

    /// End of the last pass that finished without error.
    pub last_sync: Option<DateTime<Utc>>,

    pub last_error: Option<LastError>,

    /// `Degraded` when running on the in-memory fallback.
    pub storage_mode: StorageMode,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus {
            pending_actions: 0,
            pending_blobs: 0,
            open_conflicts: 0,
            dead_letters: 0,
            is_syncing: false,
            is_online: false,
            last_sync: None,
            last_error: None,
            storage_mode: StorageMode::Durable,
        }
    }
}

impl SyncStatus {
    /// Counts shown by the connectivity widget.
    pub fn queue_count(&self) -> QueueCount {
        QueueCount {
            pending_actions: self.pending_actions,
            pending_blobs: self.pending_blobs,
            conflicts: self.open_conflicts,
        }
    }
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Sink for sync events (UI bridge, logs).
pub trait SyncEventEmitter: Send + Sync {
    /// Emits a sync status change event.
    fn emit_status(&self, status: &SyncStatus);

    /// Emits replay progress.
    fn emit_progress(&self, processed: u64, remaining: u64);

    /// Emits a sync error event.
    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter for headless use and tests.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_progress(&self, _processed: u64, _remaining: u64) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

// =============================================================================
// Status Tracker
// =============================================================================

/// Shared, observable [`SyncStatus`].
#[derive(Clone)]
pub struct StatusTracker {
    status: Arc<RwLock<SyncStatus>>,
    emitter: Arc<dyn SyncEventEmitter>,
}

impl StatusTracker {
    pub fn new(storage_mode: StorageMode, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        let status = SyncStatus {
            storage_mode,
            ..Default::default()
        };
        StatusTracker {
            status: Arc::new(RwLock::new(status)),
            emitter,
        }
    }

    pub async fn snapshot(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Applies a change and emits the new status.
    pub async fn update<F>(&self, change: F)
    where
        F: FnOnce(&mut SyncStatus),
    {
        let snapshot = {
            let mut status = self.status.write().await;
            change(&mut status);
            status.clone()
        };
        self.emitter.emit_status(&snapshot);
    }

    pub async fn set_syncing(&self, syncing: bool) {
        self.update(|s| s.is_syncing = syncing).await;
    }

    pub async fn set_online(&self, online: bool) {
        self.update(|s| s.is_online = online).await;
    }

    /// Records a failure and emits it.
    pub async fn record_error(&self, kind: ReplayFailure, message: impl Into<String>) {
        let message = message.into();
        self.emitter.emit_error(&message, kind.is_retryable());
        self.update(|s| {
            s.last_error = Some(LastError {
                kind,
                message,
                at: Utc::now(),
            })
        })
        .await;
    }

    /// Marks a pass that completed without error.
    pub async fn mark_synced(&self) {
        self.update(|s| {
            s.last_sync = Some(Utc::now());
            s.last_error = None;
        })
        .await;
    }

    pub fn emit_progress(&self, processed: u64, remaining: u64) {
        self.emitter.emit_progress(processed, remaining);
    }

    /// Re-reads queue depths from the store.
    pub async fn refresh_counts(&self, repos: &Repositories) -> SyncResult<QueueCount> {
        let pending_actions = repos.actions().count().await?;
        let pending_blobs = repos.blobs().count_pending().await?;
        let open_conflicts = repos.conflicts().count().await?;
        let dead_letters = repos.dead_letters().count().await?;

        self.update(|s| {
            s.pending_actions = pending_actions;
            s.pending_blobs = pending_blobs;
            s.open_conflicts = open_conflicts;
            s.dead_letters = dead_letters;
        })
        .await;

        Ok(QueueCount {
            pending_actions,
            pending_blobs,
            conflicts: open_conflicts,
        })
    }

    /// Like [`refresh_counts`](Self::refresh_counts), logging instead of
    /// failing: a stale counter must not fail the write that triggered it.
    pub async fn refresh_counts_quietly(&self, repos: &Repositories) {
        if let Err(err) = self.refresh_counts(repos).await {
            warn!(error = %err, "Failed to refresh queue counts");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEmitter {
        errors: Mutex<Vec<(String, bool)>>,
        statuses: Mutex<usize>,
    }

    impl SyncEventEmitter for RecordingEmitter {
        fn emit_status(&self, _status: &SyncStatus) {
            *self.statuses.lock().unwrap() += 1;
        }
        fn emit_progress(&self, _processed: u64, _remaining: u64) {}
        fn emit_error(&self, message: &str, retryable: bool) {
            self.errors.lock().unwrap().push((message.to_string(), retryable));
        }
    }

    #[test]
    fn test_sync_status_default() {
        let status = SyncStatus::default();
        assert!(!status.is_syncing);
        assert_eq!(status.storage_mode, StorageMode::Durable);
        assert!(status.queue_count().is_idle());
    }

    #[tokio::test]
    async fn test_error_then_clean_pass() {
        let emitter = Arc::new(RecordingEmitter::default());
        let tracker = StatusTracker::new(StorageMode::Degraded, emitter.clone());

        tracker
            .record_error(ReplayFailure::TerminalSendFailure, "gave up on create_customer")
            .await;
        let status = tracker.snapshot().await;
        assert_eq!(
            status.last_error.map(|e| e.kind),
            Some(ReplayFailure::TerminalSendFailure)
        );
        assert_eq!(status.storage_mode, StorageMode::Degraded);
        assert_eq!(
            emitter.errors.lock().unwrap().as_slice(),
            &[("gave up on create_customer".to_string(), false)]
        );

        tracker.mark_synced().await;
        let status = tracker.snapshot().await;
        assert!(status.last_error.is_none());
        assert!(status.last_sync.is_some());
        assert_eq!(*emitter.statuses.lock().unwrap(), 2);
    }
}

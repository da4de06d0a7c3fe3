//! # fieldquote-sync: Offline Sync Engine for FieldQuote
//!
//! Lets a field technician keep creating quotes, customers, line items and
//! media with no network, and replays every write to the server once the
//! device is back online.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Offline Sync Engine                             │
//! │                                                                         │
//! │   UI write                                                              │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  ┌────────────────┐   enqueue    ┌────────────────┐                     │
//! │  │OptimisticWriter│─────────────►│  ActionQueue   │                     │
//! │  │                │              │  FIFO + DLQ    │                     │
//! │  │ cache first,   │              │  retry_count   │                     │
//! │  │ tmp-… ids      │              └───────┬────────┘                     │
//! │  └───────┬────────┘                      │ replay pass                  │
//! │          │ immediate send                ▼                              │
//! │          │ (online, queue empty)  ┌────────────────┐    ┌────────────┐  │
//! │          └───────────────────────►│   SyncEngine   │───►│ RemoteApi  │  │
//! │                                   │                │    │ HTTP/JSON  │  │
//! │                                   │ resolve refs   │◄───│ + uploads  │  │
//! │                                   │ remap tmp→real │    └────────────┘  │
//! │                                   │ upload media   │                    │
//! │                                   └───────┬────────┘                    │
//! │                                           │ terminal failures           │
//! │                                           ▼                             │
//! │                                   ┌────────────────┐                    │
//! │                                   │ConflictSurface │  keep / discard /  │
//! │                                   │                │  merge             │
//! │                                   └────────────────┘                    │
//! │                                                                         │
//! │  TRIGGERS (SyncAgent):                                                 │
//! │  • startup            • connectivity restored (after dwell)            │
//! │  • background wake-up • retry timer          • manual refresh          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`agent`] - Background task that schedules replay passes
//! - [`background`] - Platform background-sync registration
//! - [`config`] - TOML + environment configuration
//! - [`conflicts`] - Conflict feed and user resolution
//! - [`connectivity`] - Debounced online/offline monitor
//! - [`engine`] - Replay pass and engine builder
//! - [`error`] - Sync error types
//! - [`optimistic`] - Store-first writes with temporary ids
//! - [`queue`] - FIFO action queue with retry accounting
//! - [`remote`] - Record-creation and blob upload API
//! - [`retry`] - Exponential backoff policy
//! - [`status`] - Observable sync status
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fieldquote_db::open_store;
//! use fieldquote_sync::{HttpRemoteApi, SyncAgent, SyncConfig, SyncEngineBuilder};
//!
//! let config = SyncConfig::load_or_default(None);
//! let opened = open_store(db_config, config.storage.allow_memory_fallback).await?;
//!
//! let engine = SyncEngineBuilder::new(config.clone())
//!     .with_store(opened.store, opened.mode)
//!     .with_remote(Arc::new(HttpRemoteApi::from_config(&config)?))
//!     .build()?;
//!
//! let quote = engine.writer().create_quote(input).await?;
//! let agent = SyncAgent::new(engine.clone()).start();
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod background;
pub mod config;
pub mod conflicts;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod optimistic;
pub mod queue;
pub mod remote;
pub mod retry;
pub mod status;

mod context;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{SyncAgent, SyncAgentHandle};
pub use background::{BackgroundSync, BackgroundSyncSignal, ChannelBackgroundSync, NoopBackgroundSync};
pub use config::{
    ApiSettings, ConnectivitySettings, DeviceConfig, RetrySettings, StorageSettings, SyncConfig,
};
pub use conflicts::{ConflictSurface, ResolveOutcome};
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor, Subscription};
pub use engine::{PassReport, SyncEngine, SyncEngineBuilder, Trigger};
pub use error::{SyncError, SyncResult};
pub use optimistic::{OptimisticWriter, WriteOutcome, WriterSettings};
pub use queue::{ActionQueue, RetryDecision};
pub use remote::{
    DetachedRemote, HttpRemoteApi, RemoteApi, RemoteError, RemoteResult, SendOutcome,
};
pub use retry::RetryPolicy;
pub use status::{
    LastError, NoOpEmitter, ReplayFailure, StatusTracker, SyncEventEmitter, SyncStatus,
};

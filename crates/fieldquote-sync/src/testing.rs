//! Scriptable in-process backend for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fieldquote_core::{CachedBlob, EntityId, NewCustomer, NewLineItems, NewQuote, QuoteUpdate};
use fieldquote_db::{DurableStore, MemoryStore, StorageMode};

use crate::background::{BackgroundSync, NoopBackgroundSync};
use crate::connectivity::ConnectivityMonitor;
use crate::engine::{SyncEngine, SyncEngineBuilder};
use crate::remote::{RemoteApi, RemoteError, RemoteResult};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Endpoint {
    CreateQuote,
    UpdateQuote,
    CreateCustomer,
    CreateLineItems,
    UploadBlob,
    Ping,
}

/// A mutation the fake server accepted.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Accepted {
    Quote(NewQuote, EntityId),
    Update(QuoteUpdate),
    Customer(NewCustomer, EntityId),
    LineItems(NewLineItems),
    Blob { local_ref: String, quote_id: EntityId },
}

#[derive(Default)]
struct FakeState {
    quotes_created: u64,
    customers_created: u64,
    scripted: HashMap<Endpoint, VecDeque<RemoteError>>,
    down: HashMap<Endpoint, RemoteError>,
    attempts: HashMap<Endpoint, usize>,
    accepted: Vec<Accepted>,
    latency: Option<Duration>,
    quote_prefix: Option<String>,
}

/// Quote ids are handed out as `q-42`, `q-43`, ...; customers as `c-1`, ...
#[derive(Default)]
pub(crate) struct FakeRemote {
    state: Mutex<FakeState>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails the next `times` calls to `endpoint` with `error`.
    pub fn fail_next(&self, endpoint: Endpoint, error: RemoteError, times: usize) {
        let mut state = self.state.lock().unwrap();
        let queue = state.scripted.entry(endpoint).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Fails every call to `endpoint` until [`heal`](Self::heal).
    pub fn take_down(&self, endpoint: Endpoint, error: RemoteError) {
        self.state.lock().unwrap().down.insert(endpoint, error);
    }

    pub fn heal(&self, endpoint: Endpoint) {
        self.state.lock().unwrap().down.remove(&endpoint);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = Some(latency);
    }

    /// Hands out quote ids as `<prefix>42`, ... instead of `q-42`.
    pub fn set_quote_prefix(&self, prefix: &str) {
        self.state.lock().unwrap().quote_prefix = Some(prefix.to_string());
    }

    pub fn attempts(&self, endpoint: Endpoint) -> usize {
        self.state
            .lock()
            .unwrap()
            .attempts
            .get(&endpoint)
            .copied()
            .unwrap_or(0)
    }

    pub fn accepted(&self) -> Vec<Accepted> {
        self.state.lock().unwrap().accepted.clone()
    }

    async fn call(&self, endpoint: Endpoint) -> RemoteResult<()> {
        let latency = {
            let mut state = self.state.lock().unwrap();
            *state.attempts.entry(endpoint).or_default() += 1;
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.scripted.get_mut(&endpoint).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        if let Some(error) = state.down.get(&endpoint) {
            return Err(error.clone());
        }
        Ok(())
    }

    fn accept(&self, accepted: Accepted) {
        self.state.lock().unwrap().accepted.push(accepted);
    }
}

pub(crate) fn unavailable() -> RemoteError {
    RemoteError::Unavailable("connection refused".to_string())
}

pub(crate) fn rejected(message: &str) -> RemoteError {
    RemoteError::Rejected {
        status: 422,
        message: message.to_string(),
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn create_quote(&self, quote: &NewQuote) -> RemoteResult<EntityId> {
        self.call(Endpoint::CreateQuote).await?;
        let id = {
            let mut state = self.state.lock().unwrap();
            state.quotes_created += 1;
            let prefix = state.quote_prefix.as_deref().unwrap_or("q-");
            EntityId::new(format!("{prefix}{}", 41 + state.quotes_created))
        };
        self.accept(Accepted::Quote(quote.clone(), id.clone()));
        Ok(id)
    }

    async fn update_quote(&self, update: &QuoteUpdate) -> RemoteResult<()> {
        self.call(Endpoint::UpdateQuote).await?;
        self.accept(Accepted::Update(update.clone()));
        Ok(())
    }

    async fn create_customer(&self, customer: &NewCustomer) -> RemoteResult<EntityId> {
        self.call(Endpoint::CreateCustomer).await?;
        let id = {
            let mut state = self.state.lock().unwrap();
            state.customers_created += 1;
            EntityId::new(format!("c-{}", state.customers_created))
        };
        self.accept(Accepted::Customer(customer.clone(), id.clone()));
        Ok(id)
    }

    async fn create_line_items(&self, items: &NewLineItems) -> RemoteResult<()> {
        self.call(Endpoint::CreateLineItems).await?;
        self.accept(Accepted::LineItems(items.clone()));
        Ok(())
    }

    async fn upload_blob(&self, blob: &CachedBlob) -> RemoteResult<String> {
        self.call(Endpoint::UploadBlob).await?;
        self.accept(Accepted::Blob {
            local_ref: blob.local_ref.clone(),
            quote_id: blob.quote_id.clone(),
        });
        Ok(format!("media/{}/{}", blob.quote_id, blob.local_ref))
    }

    async fn ping(&self) -> RemoteResult<()> {
        self.call(Endpoint::Ping).await
    }
}

/// Five attempts, 1s → 2s → 4s backoff, no dwell.
pub(crate) fn test_policy() -> RetryPolicy {
    RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(60), 2.0)
}

pub(crate) fn engine_with(
    store: Arc<dyn DurableStore>,
    remote: Arc<FakeRemote>,
    connectivity: ConnectivityMonitor,
    background: Arc<dyn BackgroundSync>,
) -> Arc<SyncEngine> {
    SyncEngineBuilder::new(Default::default())
        .with_store(store, StorageMode::Durable)
        .with_remote(remote)
        .with_connectivity(connectivity)
        .with_background(background)
        .with_retry_policy(test_policy())
        .build()
        .unwrap()
}

/// In-memory engine, offline until the test says otherwise.
pub(crate) fn offline_engine(remote: Arc<FakeRemote>) -> (Arc<SyncEngine>, ConnectivityMonitor) {
    let connectivity = ConnectivityMonitor::new(false, Duration::ZERO);
    let engine = engine_with(
        Arc::new(MemoryStore::new()),
        remote,
        connectivity.clone(),
        Arc::new(NoopBackgroundSync),
    );
    (engine, connectivity)
}

//! # Remote API
//!
//! The narrow interface the sync engine needs from the backend: one JSON
//! mutation per action kind, a blob upload, and a health probe.
//!
//! ## Failure Classes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      RemoteError → replay decision                      │
//! │                                                                         │
//! │  Unavailable   connect refused, DNS, reset      ─┐                     │
//! │  Timeout       no response in time               ├─► retry w/ backoff  │
//! │  Server        5xx, 408, 429                    ─┘                     │
//! │                                                                         │
//! │  Rejected      4xx business refusal             ───► dead-letter +     │
//! │                (e.g. customer no longer exists)      conflict, never   │
//! │                                                      retried            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The API is not assumed idempotent. A queued action is removed only after
//! a confirmed success response.

mod http;

use async_trait::async_trait;
use fieldquote_core::{
    ActionPayload, CachedBlob, EntityId, NewCustomer, NewLineItems, NewQuote, QuoteUpdate,
};
use thiserror::Error;

pub use http::HttpRemoteApi;

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Classified remote failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Server could not be reached.
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    /// No response within the allotted time (milliseconds).
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Server refused the mutation for a business reason.
    #[error("Rejected by server ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Server failed to process the request.
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },
}

impl RemoteError {
    /// Worth retrying later.
    pub fn is_transient(&self) -> bool {
        !self.is_rejection()
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, RemoteError::Rejected { .. })
    }
}

/// Record-creation/update API and blob upload API.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Creates a quote and returns its server-assigned id.
    async fn create_quote(&self, quote: &NewQuote) -> RemoteResult<EntityId>;

    async fn update_quote(&self, update: &QuoteUpdate) -> RemoteResult<()>;

    /// Creates a customer and returns its server-assigned id.
    async fn create_customer(&self, customer: &NewCustomer) -> RemoteResult<EntityId>;

    async fn create_line_items(&self, items: &NewLineItems) -> RemoteResult<()>;

    /// Uploads a blob and returns its durable storage path.
    async fn upload_blob(&self, blob: &CachedBlob) -> RemoteResult<String>;

    /// Cheap reachability check.
    async fn ping(&self) -> RemoteResult<()>;
}

/// Stands in when no API is configured. Every call fails as unavailable,
/// so nothing ever leaves the queue through it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedRemote;

fn detached() -> RemoteError {
    RemoteError::Unavailable("no API configured".to_string())
}

#[async_trait]
impl RemoteApi for DetachedRemote {
    async fn create_quote(&self, _quote: &NewQuote) -> RemoteResult<EntityId> {
        Err(detached())
    }

    async fn update_quote(&self, _update: &QuoteUpdate) -> RemoteResult<()> {
        Err(detached())
    }

    async fn create_customer(&self, _customer: &NewCustomer) -> RemoteResult<EntityId> {
        Err(detached())
    }

    async fn create_line_items(&self, _items: &NewLineItems) -> RemoteResult<()> {
        Err(detached())
    }

    async fn upload_blob(&self, _blob: &CachedBlob) -> RemoteResult<String> {
        Err(detached())
    }

    async fn ping(&self) -> RemoteResult<()> {
        Err(detached())
    }
}

/// Real id returned by a confirmed create, if the action created anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub created: Option<EntityId>,
}

/// Sends one queued mutation.
pub async fn send(api: &dyn RemoteApi, payload: &ActionPayload) -> RemoteResult<SendOutcome> {
    let created = match payload {
        ActionPayload::CreateQuote(quote) => Some(server_id(api.create_quote(quote).await?)?),
        ActionPayload::UpdateQuote(update) => {
            api.update_quote(update).await?;
            None
        }
        ActionPayload::CreateLineItems(items) => {
            api.create_line_items(items).await?;
            None
        }
        ActionPayload::CreateCustomer(customer) => {
            Some(server_id(api.create_customer(customer).await?)?)
        }
    };
    Ok(SendOutcome { created })
}

/// A temp-shaped id can never be remapped to; resending would only create
/// duplicates, so the create is refused for good.
fn server_id(id: EntityId) -> RemoteResult<EntityId> {
    if id.is_temporary() {
        return Err(RemoteError::Rejected {
            status: 200,
            message: format!("server returned temporary id {id}"),
        });
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert!(RemoteError::Unavailable("refused".into()).is_transient());
        assert!(RemoteError::Timeout(3000).is_transient());
        assert!(RemoteError::Server {
            status: 503,
            message: "maintenance".into()
        }
        .is_transient());

        let rejected = RemoteError::Rejected {
            status: 422,
            message: "customer not found".into(),
        };
        assert!(rejected.is_rejection());
        assert!(!rejected.is_transient());
    }

    #[tokio::test]
    async fn test_detached_remote_never_confirms() {
        let payload = ActionPayload::UpdateQuote(QuoteUpdate {
            quote_id: EntityId::from("q-1"),
            patch: Default::default(),
        });
        let err = send(&DetachedRemote, &payload).await.unwrap_err();
        assert!(err.is_transient());
        assert!(DetachedRemote.ping().await.is_err());
    }
}

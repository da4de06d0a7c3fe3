//! HTTP/JSON adapter for [`RemoteApi`].
//!
//! ```text
//! create_quote       POST   /quotes                  → {"id": "..."}
//! update_quote       PATCH  /quotes/{id}
//! create_customer    POST   /customers               → {"id": "..."}
//! create_line_items  POST   /quotes/{id}/line-items
//! upload_blob        PUT    /blobs/{local_ref}       → {"path": "..."}
//! ping               GET    /health
//! ```

use std::time::Duration;

use async_trait::async_trait;
use fieldquote_core::{CachedBlob, EntityId, NewCustomer, NewLineItems, NewQuote, QuoteUpdate};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{RemoteApi, RemoteError, RemoteResult};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

#[derive(Deserialize)]
struct CreatedResponse {
    id: EntityId,
}

#[derive(Deserialize)]
struct UploadResponse {
    path: String,
}

/// [`RemoteApi`] over reqwest.
#[derive(Clone)]
pub struct HttpRemoteApi {
    client: Client,
    base_url: Url,
    token: Option<String>,
    timeout: Duration,
}

impl HttpRemoteApi {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> SyncResult<Self> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "API URL must be http:// or https://, got: {base_url}"
            )));
        }

        let client = Client::builder().timeout(timeout).build()?;
        Ok(HttpRemoteApi {
            client,
            base_url,
            token,
            timeout,
        })
    }

    /// Builds the client from the `[api]` section.
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        let base_url = config
            .api_url()
            .ok_or_else(|| SyncError::InvalidConfig("api.base_url is required".into()))?;
        Self::new(
            base_url,
            config.api.token.clone(),
            config.request_timeout(),
        )
    }

    fn endpoint(&self, segments: &[&str]) -> RemoteResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Unavailable(format!("invalid base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .text()
            .await
            .ok()
            .filter(|body| !body.trim().is_empty())
            .unwrap_or_else(|| status.to_string());
        debug!(status = status.as_u16(), %message, "Remote request failed");
        Err(classify_status(status, message))
    }

    fn transport_error(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout(self.timeout.as_millis() as u64)
        } else {
            RemoteError::Unavailable(err.to_string())
        }
    }

    async fn created_id(response: Response) -> RemoteResult<EntityId> {
        let body: CreatedResponse = response.json().await.map_err(|err| RemoteError::Server {
            status: 200,
            message: format!("unreadable create response: {err}"),
        })?;
        Ok(body.id)
    }
}

fn classify_status(status: StatusCode, message: String) -> RemoteError {
    let code = status.as_u16();
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            RemoteError::Server { status: code, message }
        }
        s if s.is_client_error() => RemoteError::Rejected { status: code, message },
        _ => RemoteError::Server { status: code, message },
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn create_quote(&self, quote: &NewQuote) -> RemoteResult<EntityId> {
        let url = self.endpoint(&["quotes"])?;
        let response = self.execute(self.client.post(url).json(quote)).await?;
        Self::created_id(response).await
    }

    async fn update_quote(&self, update: &QuoteUpdate) -> RemoteResult<()> {
        let url = self.endpoint(&["quotes", update.quote_id.as_str()])?;
        self.execute(self.client.patch(url).json(&update.patch)).await?;
        Ok(())
    }

    async fn create_customer(&self, customer: &NewCustomer) -> RemoteResult<EntityId> {
        let url = self.endpoint(&["customers"])?;
        let response = self.execute(self.client.post(url).json(customer)).await?;
        Self::created_id(response).await
    }

    async fn create_line_items(&self, items: &NewLineItems) -> RemoteResult<()> {
        let url = self.endpoint(&["quotes", items.quote_id.as_str(), "line-items"])?;
        self.execute(self.client.post(url).json(&items.items)).await?;
        Ok(())
    }

    async fn upload_blob(&self, blob: &CachedBlob) -> RemoteResult<String> {
        let url = self.endpoint(&["blobs", &blob.local_ref])?;
        let request = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, &blob.content_type)
            .header("x-quote-id", blob.quote_id.as_str())
            .header("x-blob-kind", blob.kind.as_str())
            .body(blob.data.clone());
        let response = self.execute(request).await?;
        let body: UploadResponse = response.json().await.map_err(|err| RemoteError::Server {
            status: 200,
            message: format!("unreadable upload response: {err}"),
        })?;
        Ok(body.path)
    }

    async fn ping(&self) -> RemoteResult<()> {
        let url = self.endpoint(&["health"])?;
        self.execute(self.client.get(url)).await?;
        Ok(())
    }
}

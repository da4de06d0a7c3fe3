//! # Blob Repository
//!
//! Captured photos and audio awaiting upload.
//!
//! ## At-Least-Once Delivery
//! ```text
//! capture ──► save(uploaded=false)
//!                  │
//!   upload ack ──► mark_uploaded(uploaded=true, remote_path)
//!                  │
//!                  ▼
//!             remove_uploaded()  ← refuses while uploaded=false
//! ```

use std::sync::Arc;

use fieldquote_core::CachedBlob;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::store::{Collection, DurableStore};

/// Repository for cached blobs.
#[derive(Clone)]
pub struct BlobRepository {
    store: Arc<dyn DurableStore>,
}

impl BlobRepository {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        BlobRepository { store }
    }

    pub async fn save(&self, blob: &CachedBlob) -> DbResult<()> {
        self.store
            .put_as(Collection::Blobs, &blob.local_ref, blob)
            .await
    }

    pub async fn get(&self, local_ref: &str) -> DbResult<Option<CachedBlob>> {
        self.store.get_as(Collection::Blobs, local_ref).await
    }

    /// Blobs not yet acknowledged by the server, oldest capture first.
    pub async fn pending(&self) -> DbResult<Vec<CachedBlob>> {
        let mut blobs: Vec<CachedBlob> = self
            .store
            .get_all_as::<CachedBlob>(Collection::Blobs)
            .await?
            .into_iter()
            .filter(CachedBlob::is_pending)
            .collect();
        blobs.sort_by(|a, b| a.captured_at.cmp(&b.captured_at));
        Ok(blobs)
    }

    pub async fn count_pending(&self) -> DbResult<u64> {
        Ok(self.pending().await?.len() as u64)
    }

    /// Records a confirmed upload.
    pub async fn mark_uploaded(&self, local_ref: &str, remote_path: &str) -> DbResult<CachedBlob> {
        self.modify(local_ref, |blob| {
            blob.uploaded = true;
            blob.remote_path = Some(remote_path.to_string());
            blob.rejected = None;
        })
        .await
    }

    /// Flags a blob the upload API refused.
    pub async fn mark_rejected(&self, local_ref: &str, reason: &str) -> DbResult<CachedBlob> {
        self.modify(local_ref, |blob| blob.rejected = Some(reason.to_string()))
            .await
    }

    /// Makes a rejected blob eligible for upload again.
    pub async fn clear_rejection(&self, local_ref: &str) -> DbResult<CachedBlob> {
        self.modify(local_ref, |blob| blob.rejected = None).await
    }

    /// Deletes a blob whose upload was confirmed.
    ///
    /// Fails with `InvariantViolation` while `uploaded` is false.
    pub async fn remove_uploaded(&self, local_ref: &str) -> DbResult<bool> {
        let mut tx = self.store.begin(&[Collection::Blobs]).await?;
        let Some(blob) = tx.get_as::<CachedBlob>(Collection::Blobs, local_ref).await? else {
            return Ok(false);
        };
        if !blob.uploaded {
            return Err(DbError::InvariantViolation(format!(
                "blob {local_ref} has not been uploaded"
            )));
        }
        tx.delete(Collection::Blobs, local_ref).await?;
        tx.commit().await?;

        debug!(local_ref, "Uploaded blob removed from local store");
        Ok(true)
    }

    /// Deletes every blob already marked uploaded. Returns how many went.
    pub async fn purge_uploaded(&self) -> DbResult<u64> {
        let mut tx = self.store.begin(&[Collection::Blobs]).await?;
        let uploaded: Vec<String> = tx
            .get_all_as::<CachedBlob>(Collection::Blobs)
            .await?
            .into_iter()
            .filter(|(_, blob)| blob.uploaded)
            .map(|(key, _)| key)
            .collect();
        for key in &uploaded {
            tx.delete(Collection::Blobs, key).await?;
        }
        tx.commit().await?;
        if !uploaded.is_empty() {
            debug!(count = uploaded.len(), "Purged uploaded blobs");
        }
        Ok(uploaded.len() as u64)
    }

    async fn modify<F>(&self, local_ref: &str, change: F) -> DbResult<CachedBlob>
    where
        F: FnOnce(&mut CachedBlob) + Send,
    {
        let mut tx = self.store.begin(&[Collection::Blobs]).await?;
        let mut blob: CachedBlob = tx
            .get_as(Collection::Blobs, local_ref)
            .await?
            .ok_or_else(|| DbError::not_found("Blob", local_ref))?;
        change(&mut blob);
        tx.put_as(Collection::Blobs, local_ref, &blob).await?;
        tx.commit().await?;
        Ok(blob)
    }
}

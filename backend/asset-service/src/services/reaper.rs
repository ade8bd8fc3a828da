/// Orphan reaper backed by the asset index and the blob store
use crate::db::AssetIndex;
use crate::services::blob::{BlobKey, BlobStore, DeleteOutcome};
use async_trait::async_trait;
use reconciliation_outbox::{OrphanReaper, OutboxError, OutboxResult};
use std::sync::Arc;
use tracing::debug;

pub struct BlobOrphanReaper {
    index: Arc<dyn AssetIndex>,
    blobs: Arc<dyn BlobStore>,
}

impl BlobOrphanReaper {
    pub fn new(index: Arc<dyn AssetIndex>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { index, blobs }
    }

    fn parse(blob_key: &str) -> OutboxResult<BlobKey> {
        BlobKey::parse(blob_key).map_err(|e| OutboxError::ReaperFailed(e.to_string()))
    }
}

#[async_trait]
impl OrphanReaper for BlobOrphanReaper {
    async fn is_referenced(&self, blob_key: &str) -> OutboxResult<bool> {
        let key = Self::parse(blob_key)?;
        let url = self.blobs.public_url(&key);
        self.index
            .is_url_referenced(&url)
            .await
            .map_err(|e| OutboxError::ReaperFailed(e.to_string()))
    }

    async fn reap(&self, blob_key: &str) -> OutboxResult<()> {
        let key = Self::parse(blob_key)?;
        let outcome = self
            .blobs
            .delete(&key)
            .await
            .map_err(|e| OutboxError::ReaperFailed(e.to_string()))?;

        if outcome == DeleteOutcome::AlreadyAbsent {
            debug!(blob_key = %key, "Orphan blob was already absent");
        }
        Ok(())
    }
}

//! HTTP storage-zone client
//!
//! `PUT`/`DELETE {storage_base}/{zone}/{key}` authenticated with an `AccessKey`
//! header; reads go through the public CDN URL.

use super::{BlobKey, BlobLocation, BlobStore, BlobStoreError, CdnLayout, DeleteOutcome};
use crate::config::BlobConfig;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info};

const ACCESS_KEY_HEADER: &str = "AccessKey";

pub struct HttpBlobStore {
    storage_base_url: String,
    zone: String,
    access_key: String,
    layout: CdnLayout,
    http_client: Client,
}

impl HttpBlobStore {
    /// Create a new client from configuration
    ///
    /// `request_timeout` is a transport-level ceiling; per-call deadlines are
    /// applied by the caller.
    pub fn from_config(cfg: &BlobConfig, request_timeout: Duration) -> Result<Self, BlobStoreError> {
        let http_client = Client::builder().timeout(request_timeout).build()?;
        let layout = CdnLayout::new(&cfg.cdn_base_url)?;

        info!(zone = %cfg.zone, cdn = %cfg.cdn_base_url, "Blob store client initialized");

        Ok(Self {
            storage_base_url: cfg.storage_base_url.trim_end_matches('/').to_string(),
            zone: cfg.zone.clone(),
            access_key: cfg.access_key.clone(),
            layout,
            http_client,
        })
    }

    fn object_url(&self, key: &BlobKey) -> String {
        format!("{}/{}/{}", self.storage_base_url, self.zone, key)
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    fn layout(&self) -> &CdnLayout {
        &self.layout
    }

    async fn put(&self, key: &BlobKey, data: Bytes) -> Result<BlobLocation, BlobStoreError> {
        let size = data.len();
        debug!(blob_key = %key, size, "Uploading blob");

        let response = self
            .http_client
            .put(self.object_url(key))
            .header(ACCESS_KEY_HEADER, &self.access_key)
            .header("Content-Type", "application/octet-stream")
            .body(data)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BlobStoreError::Status {
                operation: "put",
                status: status.as_u16(),
                body,
            });
        }

        debug!(blob_key = %key, size, "Blob uploaded");

        Ok(BlobLocation {
            key: key.clone(),
            url: self.layout.public_url(key),
        })
    }

    async fn delete(&self, key: &BlobKey) -> Result<DeleteOutcome, BlobStoreError> {
        debug!(blob_key = %key, "Deleting blob");

        let response = self
            .http_client
            .delete(self.object_url(key))
            .header(ACCESS_KEY_HEADER, &self.access_key)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(DeleteOutcome::AlreadyAbsent),
            status if status.is_success() => Ok(DeleteOutcome::Deleted),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(BlobStoreError::Status {
                    operation: "delete",
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, BlobStoreError> {
        debug!(url = %url, "Downloading blob");

        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BlobStoreError::Status {
                operation: "fetch",
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.bytes().await?)
    }
}

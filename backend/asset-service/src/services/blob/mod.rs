//! Blob store client
//!
//! Objects live under `images/{project_id}/{file_name}` and are served
//! publicly from `{cdn_base}/images/{project_id}/{file_name}`. The client does
//! not retry; callers decide what a failure means.

mod http;

pub use http::HttpBlobStore;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

const KEY_PREFIX: &str = "images";
const OUTPUT_EXTENSION: &str = "jpg";

#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("blob store {operation} returned {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("blob store transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{0}")]
    InvalidUrl(String),

    #[error("blob store {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

/// Location of an object inside the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobKey {
    project_id: Uuid,
    file_name: String,
}

impl BlobKey {
    pub fn new(project_id: Uuid, file_name: impl Into<String>) -> Result<Self, BlobStoreError> {
        let file_name = file_name.into();
        if !is_valid_file_name(&file_name) {
            return Err(BlobStoreError::InvalidUrl(format!(
                "invalid blob file name: {file_name:?}"
            )));
        }
        Ok(Self {
            project_id,
            file_name,
        })
    }

    /// Fresh key for a newly uploaded image.
    pub fn for_upload(project_id: Uuid) -> Self {
        Self {
            project_id,
            file_name: format!("{}.{}", Uuid::new_v4(), OUTPUT_EXTENSION),
        }
    }

    /// Key for a re-encoded copy of this object: `{stem}_{millis}.jpg`.
    ///
    /// A previous `_{millis}` suffix is replaced rather than stacked, and the
    /// result never equals `self`.
    pub fn rotated(&self, millis: i64) -> Self {
        let stem = self
            .file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.file_name);
        let base = match stem.rsplit_once('_') {
            Some((base, suffix))
                if !base.is_empty()
                    && !suffix.is_empty()
                    && suffix.bytes().all(|b| b.is_ascii_digit()) =>
            {
                base
            }
            _ => stem,
        };

        let mut millis = millis;
        loop {
            let candidate = Self {
                project_id: self.project_id,
                file_name: format!("{base}_{millis}.{OUTPUT_EXTENSION}"),
            };
            if candidate != *self {
                return candidate;
            }
            millis += 1;
        }
    }

    /// Parse a key of the form `images/{project_id}/{file_name}`.
    pub fn parse(key: &str) -> Result<Self, BlobStoreError> {
        let mut parts = key.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(KEY_PREFIX), Some(project), Some(file), None) => {
                let project_id = Uuid::parse_str(project).map_err(|_| {
                    BlobStoreError::InvalidUrl(format!("invalid project id in blob key {key:?}"))
                })?;
                Self::new(project_id, file)
            }
            _ => Err(BlobStoreError::InvalidUrl(format!(
                "not an image blob key: {key:?}"
            ))),
        }
    }

    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", KEY_PREFIX, self.project_id, self.file_name)
    }
}

fn is_valid_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// Result of a successful put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLocation {
    pub key: BlobKey,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyAbsent,
}

/// Mapping between blob keys and public CDN URLs.
#[derive(Debug, Clone)]
pub struct CdnLayout {
    base: Url,
}

impl CdnLayout {
    pub fn new(cdn_base_url: &str) -> Result<Self, BlobStoreError> {
        let trimmed = cdn_base_url.trim_end_matches('/');
        let base = Url::parse(&format!("{trimmed}/")).map_err(|e| {
            BlobStoreError::InvalidUrl(format!("invalid CDN base URL {cdn_base_url:?}: {e}"))
        })?;
        Ok(Self { base })
    }

    pub fn public_url(&self, key: &BlobKey) -> String {
        format!("{}{}", self.base, key)
    }

    /// Derive the blob key back from a public URL.
    pub fn key_from_url(&self, url: &str) -> Result<BlobKey, BlobStoreError> {
        let parsed = Url::parse(url)
            .map_err(|e| BlobStoreError::InvalidUrl(format!("invalid image URL {url:?}: {e}")))?;

        if parsed.scheme() != self.base.scheme()
            || parsed.host_str() != self.base.host_str()
            || parsed.port_or_known_default() != self.base.port_or_known_default()
        {
            return Err(BlobStoreError::InvalidUrl(format!(
                "image URL {url:?} is not served from {}",
                self.base
            )));
        }

        let key = parsed
            .path()
            .strip_prefix(self.base.path())
            .ok_or_else(|| {
                BlobStoreError::InvalidUrl(format!("image URL {url:?} is outside the CDN root"))
            })?;

        BlobKey::parse(key)
    }
}

/// Remote object store holding encoded image bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    fn layout(&self) -> &CdnLayout;

    /// Store bytes under `key`, overwriting any previous object.
    async fn put(&self, key: &BlobKey, data: Bytes) -> Result<BlobLocation, BlobStoreError>;

    /// Remove the object. A missing object is reported, not treated as an error.
    async fn delete(&self, key: &BlobKey) -> Result<DeleteOutcome, BlobStoreError>;

    /// Download the bytes currently served at a public URL.
    async fn fetch(&self, url: &str) -> Result<Bytes, BlobStoreError>;

    fn public_url(&self, key: &BlobKey) -> String {
        self.layout().public_url(key)
    }

    fn key_from_url(&self, url: &str) -> Result<BlobKey, BlobStoreError> {
        self.layout().key_from_url(url)
    }
}

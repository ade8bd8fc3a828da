//! Asset lifecycle orchestrator
//!
//! Sequences every mutation across the blob store, the transform pipeline and
//! the asset index so that an index row never points at a missing blob:
//!
//! - new bytes are always written under a fresh key before the index commits;
//! - superseded or removed blobs are deleted only after (or independently of)
//!   the index change, and a failed delete is downgraded to a warning;
//! - any blob that may have lost its last reference is recorded in the orphan
//!   backlog so the sweep can remove it later.
//!
//! Rotate and delete on the same image are serialized by guarding index
//! writes with the url read at the start of the operation.

use crate::config::Deadlines;
use crate::db::{AssetIndex, IndexError, IndexResult};
use crate::error::{AppError, Result};
use crate::metrics::AssetMetrics;
use crate::models::{
    CreateProjectRequest, DeleteReport, Image, Project, ProjectDetail, PublicImagesResponse,
};
use crate::services::blob::{BlobKey, BlobLocation, BlobStore, BlobStoreError, DeleteOutcome};
use crate::services::transform::{ImageProcessor, Rotation};
use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use reconciliation_outbox::OrphanRepository;
use resilience::with_deadline;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

/// Guarded index deletes retried after a concurrent url swap
pub const MAX_DELETE_ATTEMPTS: u32 = 3;

/// Why a blob key was handed to the orphan sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanReason {
    /// Uploaded, but the index insert failed
    InsertFailed,
    /// Upload timed out; the object may or may not exist
    UploadUnknown,
    /// Rotated copy uploaded, but the url swap failed or lost a race
    UpdateFailed,
    /// Url swap committed, but deleting the previous blob failed
    SupersededDeleteFailed,
    /// Url swap outcome unknown; the previous blob may have lost its row
    SwapUnknown,
    /// Image removed from the index, but its blob delete failed
    DeleteFailed,
    /// Image row removed by a cascade without its blob being deleted first
    CascadeStraggler,
}

impl OrphanReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrphanReason::InsertFailed => "insert-failed",
            OrphanReason::UploadUnknown => "upload-unknown",
            OrphanReason::UpdateFailed => "update-failed",
            OrphanReason::SupersededDeleteFailed => "superseded-delete-failed",
            OrphanReason::SwapUnknown => "swap-unknown",
            OrphanReason::DeleteFailed => "delete-failed",
            OrphanReason::CascadeStraggler => "cascade-straggler",
        }
    }
}

/// Caller identity and deadlines for one request
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub owner_id: Uuid,
    pub deadlines: Deadlines,
}

impl RequestContext {
    pub fn new(owner_id: Uuid, deadlines: Deadlines) -> Self {
        Self {
            owner_id,
            deadlines,
        }
    }
}

async fn index_call<T, F>(deadlines: &Deadlines, operation: &'static str, future: F) -> IndexResult<T>
where
    F: Future<Output = IndexResult<T>>,
{
    with_deadline(operation, deadlines.index, future)
        .await
        .map_err(|e| e.fold(|operation, after| IndexError::Timeout { operation, after }))
}

async fn blob_call<T, F>(
    deadlines: &Deadlines,
    operation: &'static str,
    future: F,
) -> std::result::Result<T, BlobStoreError>
where
    F: Future<Output = std::result::Result<T, BlobStoreError>>,
{
    with_deadline(operation, deadlines.blob, future)
        .await
        .map_err(|e| e.fold(|operation, after| BlobStoreError::Timeout { operation, after }))
}

fn parse_rotation(degrees: i32) -> Result<Rotation> {
    Rotation::from_degrees(degrees).ok_or_else(|| {
        AppError::Validation(format!(
            "rotationDegrees must be a multiple of 90, got {degrees}"
        ))
    })
}

pub struct AssetOrchestrator {
    index: Arc<dyn AssetIndex>,
    blobs: Arc<dyn BlobStore>,
    orphans: Arc<dyn OrphanRepository>,
    processor: Arc<ImageProcessor>,
    metrics: Option<AssetMetrics>,
}

impl AssetOrchestrator {
    pub fn new(
        index: Arc<dyn AssetIndex>,
        blobs: Arc<dyn BlobStore>,
        orphans: Arc<dyn OrphanRepository>,
        processor: Arc<ImageProcessor>,
    ) -> Self {
        Self {
            index,
            blobs,
            orphans,
            processor,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: AssetMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    // ------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------

    pub async fn create_project(
        &self,
        ctx: &RequestContext,
        request: CreateProjectRequest,
    ) -> Result<Project> {
        request
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let name = request.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Project name is required".to_string()));
        }
        let description = request
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty());

        let project = index_call(
            &ctx.deadlines,
            "create_project",
            self.index.create_project(ctx.owner_id, name, description),
        )
        .await?;

        info!(project_id = %project.id, owner_id = %ctx.owner_id, "Project created");
        Ok(project)
    }

    pub async fn list_projects(&self, ctx: &RequestContext) -> Result<Vec<Project>> {
        Ok(index_call(
            &ctx.deadlines,
            "list_projects",
            self.index.list_projects(ctx.owner_id),
        )
        .await?)
    }

    pub async fn get_project(&self, ctx: &RequestContext, project_id: Uuid) -> Result<ProjectDetail> {
        let project = self.owned_project(ctx, project_id).await?;
        let images = index_call(
            &ctx.deadlines,
            "list_images",
            self.index.list_images(project_id),
        )
        .await?;
        Ok(ProjectDetail { project, images })
    }

    pub async fn list_images(&self, ctx: &RequestContext, project_id: Uuid) -> Result<Vec<Image>> {
        self.owned_project(ctx, project_id).await?;
        Ok(index_call(
            &ctx.deadlines,
            "list_images",
            self.index.list_images(project_id),
        )
        .await?)
    }

    /// Delete every blob of the project, then the rows, then the project.
    ///
    /// Blob failures never abort the cascade; they are reported as warnings
    /// and left to the sweep.
    pub async fn delete_project(
        &self,
        ctx: &RequestContext,
        project_id: Uuid,
    ) -> Result<DeleteReport> {
        self.owned_project(ctx, project_id).await?;

        let images = index_call(
            &ctx.deadlines,
            "list_images",
            self.index.list_images(project_id),
        )
        .await?;
        let known: HashSet<&str> = images.iter().map(|image| image.url.as_str()).collect();

        let deletions = images.iter().map(|image| async move {
            match self.blobs.key_from_url(&image.url) {
                Ok(key) => {
                    self.delete_blob_best_effort(&ctx.deadlines, &key, OrphanReason::DeleteFailed)
                        .await
                }
                Err(e) => {
                    warn!(image_id = %image.id, url = %image.url, error = %e, "Image url is not a managed blob");
                    Some(format!("Skipped blob for image {}: {e}", image.id))
                }
            }
        });
        let warnings: Vec<String> = join_all(deletions).await.into_iter().flatten().collect();

        let removed = index_call(
            &ctx.deadlines,
            "delete_images_for_project",
            self.index.delete_images_for_project(project_id),
        )
        .await?;
        let stragglers = index_call(
            &ctx.deadlines,
            "delete_project",
            self.index.delete_project(project_id),
        )
        .await?;

        for url in removed
            .iter()
            .chain(stragglers.iter())
            .filter(|url| !known.contains(url.as_str()))
        {
            match self.blobs.key_from_url(url) {
                Ok(key) => {
                    self.enqueue_orphan(&ctx.deadlines, &key, OrphanReason::CascadeStraggler)
                        .await
                }
                Err(e) => warn!(url = %url, error = %e, "Unmanaged straggler url, nothing to sweep"),
            }
        }

        info!(
            project_id = %project_id,
            images = images.len(),
            warnings = warnings.len(),
            "Project deleted"
        );

        Ok(DeleteReport {
            deleted: true,
            warnings,
        })
    }

    pub async fn set_cover(
        &self,
        ctx: &RequestContext,
        project_id: Uuid,
        image_id: Uuid,
    ) -> Result<Project> {
        self.owned_project(ctx, project_id).await?;
        index_call(
            &ctx.deadlines,
            "set_cover",
            self.index.set_cover(project_id, Some(image_id)),
        )
        .await?;

        info!(project_id = %project_id, image_id = %image_id, "Cover image set");
        self.owned_project(ctx, project_id).await
    }

    pub async fn remove_cover(&self, ctx: &RequestContext, project_id: Uuid) -> Result<Project> {
        self.owned_project(ctx, project_id).await?;
        index_call(
            &ctx.deadlines,
            "set_cover",
            self.index.set_cover(project_id, None),
        )
        .await?;

        info!(project_id = %project_id, "Cover image cleared");
        self.owned_project(ctx, project_id).await
    }

    /// Replace the whole order of a project's images.
    pub async fn reorder(
        &self,
        ctx: &RequestContext,
        project_id: Uuid,
        image_ids: &[Uuid],
    ) -> Result<Vec<Image>> {
        self.owned_project(ctx, project_id).await?;
        index_call(
            &ctx.deadlines,
            "reorder",
            self.index.reorder(project_id, image_ids),
        )
        .await?;

        debug!(project_id = %project_id, count = image_ids.len(), "Images reordered");
        Ok(index_call(
            &ctx.deadlines,
            "list_images",
            self.index.list_images(project_id),
        )
        .await?)
    }

    /// Image urls for anonymous viewers, in display order.
    pub async fn public_images(
        &self,
        deadlines: &Deadlines,
        project_id: Uuid,
    ) -> Result<PublicImagesResponse> {
        index_call(deadlines, "get_project", self.index.get_project(project_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Project {project_id} not found")))?;

        let images = index_call(deadlines, "list_images", self.index.list_images(project_id)).await?;

        Ok(PublicImagesResponse {
            project_id,
            images: images.into_iter().map(|image| image.url).collect(),
        })
    }

    // ------------------------------------------------------------------
    // Images
    // ------------------------------------------------------------------

    /// Normalize, upload, then append to the project.
    pub async fn create_image(
        &self,
        ctx: &RequestContext,
        project_id: Uuid,
        raw: Bytes,
    ) -> Result<Image> {
        if raw.is_empty() {
            return Err(AppError::Validation("Uploaded file is empty".to_string()));
        }
        self.owned_project(ctx, project_id).await?;

        let params = self.processor.upload_params();
        let transformed = self.processor.clone().run(raw, params).await?;

        let key = BlobKey::for_upload(project_id);
        let location = self.upload(&ctx.deadlines, &key, transformed.data).await?;

        match index_call(
            &ctx.deadlines,
            "insert_image",
            self.index.insert_image(project_id, &location.url),
        )
        .await
        {
            Ok(image) => {
                info!(
                    project_id = %project_id,
                    image_id = %image.id,
                    sort_order = image.sort_order,
                    blob_key = %key,
                    "Image created"
                );
                Ok(image)
            }
            Err(e) => {
                warn!(project_id = %project_id, blob_key = %key, error = %e, "Index insert failed after upload");
                self.enqueue_orphan(&ctx.deadlines, &key, OrphanReason::InsertFailed)
                    .await;
                Err(e.into())
            }
        }
    }

    pub async fn rotate_image(
        &self,
        ctx: &RequestContext,
        image_id: Uuid,
        rotation_degrees: i32,
    ) -> Result<Image> {
        let rotation = parse_rotation(rotation_degrees)?;
        let image = self.owned_image(ctx, image_id).await?;
        self.rotate_stored(&ctx.deadlines, image, rotation).await
    }

    /// Rotate the image currently stored at `image_url`.
    ///
    /// Used by the internal endpoint, which addresses images by url and has no
    /// caller identity.
    pub async fn rotate_by_url(
        &self,
        deadlines: &Deadlines,
        image_url: &str,
        rotation_degrees: i32,
    ) -> Result<Image> {
        let rotation = parse_rotation(rotation_degrees)?;
        if image_url.trim().is_empty() {
            return Err(AppError::Validation("imageUrl is required".to_string()));
        }
        self.blobs.key_from_url(image_url)?;

        let image = index_call(
            deadlines,
            "find_image_by_url",
            self.index.find_image_by_url(image_url),
        )
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No image is stored at {image_url}")))?;

        self.rotate_stored(deadlines, image, rotation).await
    }

    /// Fetch, re-render, upload under a new key, swap the url, drop the old blob.
    async fn rotate_stored(
        &self,
        deadlines: &Deadlines,
        image: Image,
        rotation: Rotation,
    ) -> Result<Image> {
        let old_key = self.blobs.key_from_url(&image.url)?;
        let original = blob_call(deadlines, "fetch", self.blobs.fetch(&image.url)).await?;

        let params = self.processor.rotation_params(rotation);
        let transformed = self.processor.clone().run(original, params).await?;

        let new_key = old_key.rotated(Utc::now().timestamp_millis());
        let location = self.upload(deadlines, &new_key, transformed.data).await?;

        let updated = match index_call(
            deadlines,
            "update_image_url",
            self.index
                .update_image_url(image.id, &image.url, &location.url),
        )
        .await
        {
            Ok(updated) => updated,
            Err(e) => {
                warn!(
                    image_id = %image.id,
                    blob_key = %new_key,
                    error = %e,
                    "Url swap failed after upload, image keeps its previous blob"
                );
                self.enqueue_orphan(deadlines, &new_key, OrphanReason::UpdateFailed)
                    .await;
                // Conflict and NotFound mean the swap did not happen. Any other
                // failure may have committed, leaving the old blob unreferenced.
                if !matches!(e, IndexError::Conflict(_) | IndexError::NotFound(_)) {
                    self.enqueue_orphan(deadlines, &old_key, OrphanReason::SwapUnknown)
                        .await;
                }
                return Err(e.into());
            }
        };

        self.delete_blob_best_effort(deadlines, &old_key, OrphanReason::SupersededDeleteFailed)
            .await;

        info!(
            image_id = %updated.id,
            project_id = %updated.project_id,
            old_key = %old_key,
            new_key = %new_key,
            "Image rotated"
        );
        Ok(updated)
    }

    /// Remove the blob, then the row guarded by the url the blob came from.
    ///
    /// If a rotate swaps the url in between, the row is re-read and the
    /// delete retried against the new blob, at most [`MAX_DELETE_ATTEMPTS`] times.
    pub async fn delete_image(&self, ctx: &RequestContext, image_id: Uuid) -> Result<DeleteReport> {
        let mut image = self.owned_image(ctx, image_id).await?;
        let mut warnings = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.blobs.key_from_url(&image.url) {
                Ok(key) => {
                    if let Some(warning) = self
                        .delete_blob_best_effort(&ctx.deadlines, &key, OrphanReason::DeleteFailed)
                        .await
                    {
                        warnings.push(warning);
                    }
                }
                Err(e) => {
                    warn!(image_id = %image_id, url = %image.url, error = %e, "Image url is not a managed blob");
                    warnings.push(format!("Skipped blob for image {image_id}: {e}"));
                }
            }

            match index_call(
                &ctx.deadlines,
                "delete_image",
                self.index.delete_image(image_id, &image.url),
            )
            .await
            {
                Ok(()) => {
                    info!(
                        image_id = %image_id,
                        project_id = %image.project_id,
                        warnings = warnings.len(),
                        "Image deleted"
                    );
                    return Ok(DeleteReport {
                        deleted: true,
                        warnings,
                    });
                }
                Err(IndexError::Conflict(msg)) if attempt >= MAX_DELETE_ATTEMPTS => {
                    warn!(image_id = %image_id, attempts = attempt, "Giving up on image delete after repeated url changes");
                    return Err(AppError::Conflict(msg));
                }
                Err(IndexError::Conflict(_)) => {
                    debug!(image_id = %image_id, attempt, "Image url changed during delete, re-reading");
                    image = index_call(&ctx.deadlines, "get_image", self.index.get_image(image_id))
                        .await?
                        .ok_or_else(|| AppError::NotFound(format!("Image {image_id} not found")))?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn owned_project(&self, ctx: &RequestContext, project_id: Uuid) -> Result<Project> {
        let project = index_call(
            &ctx.deadlines,
            "get_project",
            self.index.get_project(project_id),
        )
        .await?;

        match project {
            Some(project) if project.owner_id == ctx.owner_id => Ok(project),
            _ => Err(AppError::NotFound(format!("Project {project_id} not found"))),
        }
    }

    async fn owned_image(&self, ctx: &RequestContext, image_id: Uuid) -> Result<Image> {
        let image = index_call(&ctx.deadlines, "get_image", self.index.get_image(image_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Image {image_id} not found")))?;

        match self.owned_project(ctx, image.project_id).await {
            Ok(_) => Ok(image),
            Err(AppError::NotFound(_)) => {
                Err(AppError::NotFound(format!("Image {image_id} not found")))
            }
            Err(e) => Err(e),
        }
    }

    /// Put under a fresh key. A timed-out put may still land, so its key is
    /// recorded for the sweep before the error is returned.
    async fn upload(&self, deadlines: &Deadlines, key: &BlobKey, data: Bytes) -> Result<BlobLocation> {
        match blob_call(deadlines, "put", self.blobs.put(key, data)).await {
            Ok(location) => Ok(location),
            Err(e) => {
                warn!(blob_key = %key, error = %e, "Blob upload failed");
                if matches!(e, BlobStoreError::Timeout { .. }) {
                    self.enqueue_orphan(deadlines, key, OrphanReason::UploadUnknown)
                        .await;
                }
                Err(e.into())
            }
        }
    }

    /// Returns a warning instead of failing; the key goes to the sweep.
    async fn delete_blob_best_effort(
        &self,
        deadlines: &Deadlines,
        key: &BlobKey,
        reason: OrphanReason,
    ) -> Option<String> {
        match blob_call(deadlines, "delete", self.blobs.delete(key)).await {
            Ok(DeleteOutcome::Deleted) => {
                debug!(blob_key = %key, "Blob deleted");
                None
            }
            Ok(DeleteOutcome::AlreadyAbsent) => {
                debug!(blob_key = %key, "Blob already absent");
                None
            }
            Err(e) => {
                warn!(blob_key = %key, error = %e, "Blob delete failed, deferring to orphan sweep");
                if let Some(metrics) = &self.metrics {
                    metrics.blob_delete_failures.inc();
                }
                self.enqueue_orphan(deadlines, key, reason).await;
                Some(format!("Failed to delete blob {key}: {e}"))
            }
        }
    }

    /// Never fails the caller; a lost record is logged at error level.
    async fn enqueue_orphan(&self, deadlines: &Deadlines, key: &BlobKey, reason: OrphanReason) {
        let blob_key = key.to_string();
        match with_deadline(
            "enqueue_orphan",
            deadlines.index,
            self.orphans.enqueue(&blob_key, reason.as_str()),
        )
        .await
        {
            Ok(record) => {
                if let Some(metrics) = &self.metrics {
                    metrics
                        .orphans_enqueued
                        .with_label_values(&[reason.as_str()])
                        .inc();
                }
                debug!(
                    record_id = %record.id,
                    blob_key = %blob_key,
                    reason = reason.as_str(),
                    "Orphan candidate recorded"
                );
            }
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.orphans_lost.inc();
                }
                error!(
                    blob_key = %blob_key,
                    reason = reason.as_str(),
                    error = %e,
                    "Failed to record orphan blob, manual cleanup required"
                );
            }
        }
    }
}

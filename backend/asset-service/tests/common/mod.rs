//! In-memory stand-ins for the index, blob store and orphan backlog.
#![allow(dead_code)]

use asset_service::config::Deadlines;
use asset_service::db::{AssetIndex, IndexError, IndexResult};
use asset_service::handlers::AppState;
use asset_service::models::{CreateProjectRequest, Image, Project};
use asset_service::services::blob::{
    BlobKey, BlobLocation, BlobStore, BlobStoreError, CdnLayout, DeleteOutcome,
};
use asset_service::services::transform::{ImageProcessor, TransformConfig};
use asset_service::services::{AssetOrchestrator, RequestContext};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use reconciliation_outbox::{OrphanRecord, OrphanRepository, OutboxError, OutboxResult};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const CDN_BASE: &str = "https://cdn.test";

// ----------------------------------------------------------------------------
// Asset index
// ----------------------------------------------------------------------------

#[derive(Default)]
struct IndexState {
    projects: HashMap<Uuid, Project>,
    images: HashMap<Uuid, Image>,
}

#[derive(Default)]
pub struct MemoryIndex {
    state: Mutex<IndexState>,
    pub fail_next_insert: AtomicBool,
    pub fail_next_update: AtomicBool,
    /// Rewrites the image url right before the next guarded delete, as a
    /// concurrent rotate would.
    pub swap_url_before_delete: Mutex<Option<(Uuid, String)>>,
    /// Removes the row right before the next url swap, as a concurrent
    /// delete would.
    pub delete_before_update: AtomicBool,
    /// Commits the next url swap, then stalls this long before answering.
    pub slow_update_ack: Mutex<Option<Duration>>,
}

fn forced_failure() -> IndexError {
    IndexError::Database(sqlx::Error::PoolTimedOut)
}

impl MemoryIndex {
    pub fn image(&self, image_id: Uuid) -> Option<Image> {
        self.state.lock().unwrap().images.get(&image_id).cloned()
    }

    pub fn project(&self, project_id: Uuid) -> Option<Project> {
        self.state.lock().unwrap().projects.get(&project_id).cloned()
    }

    pub fn sort_orders(&self, project_id: Uuid) -> Vec<i32> {
        let mut orders: Vec<i32> = self
            .state
            .lock()
            .unwrap()
            .images
            .values()
            .filter(|i| i.project_id == project_id)
            .map(|i| i.sort_order)
            .collect();
        orders.sort_unstable();
        orders
    }

    fn ordered(state: &IndexState, project_id: Uuid) -> Vec<Image> {
        let mut images: Vec<Image> = state
            .images
            .values()
            .filter(|i| i.project_id == project_id)
            .cloned()
            .collect();
        images.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then(a.created_at.cmp(&b.created_at))
        });
        images
    }

    fn remove_image(state: &mut IndexState, image_id: Uuid) -> Option<Image> {
        let removed = state.images.remove(&image_id)?;
        for project in state.projects.values_mut() {
            if project.cover_image_id == Some(image_id) {
                project.cover_image_id = None;
            }
        }
        Some(removed)
    }
}

#[async_trait]
impl AssetIndex for MemoryIndex {
    async fn create_project(
        &self,
        owner_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> IndexResult<Project> {
        let project = Project {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.map(str::to_string),
            owner_id,
            cover_image_id: None,
            created_at: Utc::now(),
        };
        self.state
            .lock()
            .unwrap()
            .projects
            .insert(project.id, project.clone());
        Ok(project)
    }

    async fn get_project(&self, project_id: Uuid) -> IndexResult<Option<Project>> {
        Ok(self.project(project_id))
    }

    async fn list_projects(&self, owner_id: Uuid) -> IndexResult<Vec<Project>> {
        let mut projects: Vec<Project> = self
            .state
            .lock()
            .unwrap()
            .projects
            .values()
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects)
    }

    async fn get_image(&self, image_id: Uuid) -> IndexResult<Option<Image>> {
        Ok(self.image(image_id))
    }

    async fn find_image_by_url(&self, url: &str) -> IndexResult<Option<Image>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .images
            .values()
            .find(|i| i.url == url)
            .cloned())
    }

    async fn list_images(&self, project_id: Uuid) -> IndexResult<Vec<Image>> {
        Ok(Self::ordered(&self.state.lock().unwrap(), project_id))
    }

    async fn insert_image(&self, project_id: Uuid, url: &str) -> IndexResult<Image> {
        if self.fail_next_insert.swap(false, Ordering::SeqCst) {
            return Err(forced_failure());
        }

        let mut state = self.state.lock().unwrap();
        if !state.projects.contains_key(&project_id) {
            return Err(IndexError::NotFound(format!("Project {project_id} not found")));
        }
        let next = state
            .images
            .values()
            .filter(|i| i.project_id == project_id)
            .map(|i| i.sort_order)
            .max()
            .unwrap_or(0)
            + 1;
        let image = Image {
            id: Uuid::new_v4(),
            project_id,
            url: url.to_string(),
            sort_order: next,
            created_at: Utc::now(),
        };
        state.images.insert(image.id, image.clone());
        Ok(image)
    }

    async fn update_image_url(
        &self,
        image_id: Uuid,
        expected_url: &str,
        new_url: &str,
    ) -> IndexResult<Image> {
        if self.fail_next_update.swap(false, Ordering::SeqCst) {
            return Err(forced_failure());
        }

        let updated = {
            let mut state = self.state.lock().unwrap();
            if self.delete_before_update.swap(false, Ordering::SeqCst) {
                Self::remove_image(&mut state, image_id);
            }
            let image = state
                .images
                .get_mut(&image_id)
                .ok_or_else(|| IndexError::NotFound(format!("Image {image_id} not found")))?;
            if image.url != expected_url {
                return Err(IndexError::Conflict(format!(
                    "Image {image_id} url changed concurrently"
                )));
            }
            image.url = new_url.to_string();
            image.clone()
        };

        let stall = self.slow_update_ack.lock().unwrap().take();
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        Ok(updated)
    }

    async fn delete_image(&self, image_id: Uuid, expected_url: &str) -> IndexResult<()> {
        let mut state = self.state.lock().unwrap();

        if let Some((target, url)) = self.swap_url_before_delete.lock().unwrap().take() {
            if let Some(image) = state.images.get_mut(&target) {
                image.url = url;
            }
        }

        match state.images.get(&image_id) {
            None => Err(IndexError::NotFound(format!("Image {image_id} not found"))),
            Some(image) if image.url != expected_url => Err(IndexError::Conflict(format!(
                "Image {image_id} url changed concurrently"
            ))),
            Some(_) => {
                Self::remove_image(&mut state, image_id);
                Ok(())
            }
        }
    }

    async fn delete_images_for_project(&self, project_id: Uuid) -> IndexResult<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        let ids: Vec<Uuid> = state
            .images
            .values()
            .filter(|i| i.project_id == project_id)
            .map(|i| i.id)
            .collect();
        Ok(ids
            .into_iter()
            .filter_map(|id| Self::remove_image(&mut state, id))
            .map(|image| image.url)
            .collect())
    }

    async fn delete_project(&self, project_id: Uuid) -> IndexResult<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        if state.projects.remove(&project_id).is_none() {
            return Err(IndexError::NotFound(format!("Project {project_id} not found")));
        }
        let ids: Vec<Uuid> = state
            .images
            .values()
            .filter(|i| i.project_id == project_id)
            .map(|i| i.id)
            .collect();
        Ok(ids
            .into_iter()
            .filter_map(|id| state.images.remove(&id))
            .map(|image| image.url)
            .collect())
    }

    async fn reorder(&self, project_id: Uuid, ordered_ids: &[Uuid]) -> IndexResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.projects.contains_key(&project_id) {
            return Err(IndexError::NotFound(format!("Project {project_id} not found")));
        }

        let requested: HashSet<Uuid> = ordered_ids.iter().copied().collect();
        let current: HashSet<Uuid> = state
            .images
            .values()
            .filter(|i| i.project_id == project_id)
            .map(|i| i.id)
            .collect();
        if requested.len() != ordered_ids.len() || requested != current {
            return Err(IndexError::Conflict(
                "Reorder list does not match the project's images".to_string(),
            ));
        }

        for (position, id) in ordered_ids.iter().enumerate() {
            if let Some(image) = state.images.get_mut(id) {
                image.sort_order = position as i32 + 1;
            }
        }
        Ok(())
    }

    async fn set_cover(&self, project_id: Uuid, image_id: Option<Uuid>) -> IndexResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(image_id) = image_id {
            let belongs = state
                .images
                .get(&image_id)
                .map(|i| i.project_id == project_id)
                .unwrap_or(false);
            if !belongs {
                return Err(IndexError::NotFound(format!(
                    "Image {image_id} does not belong to project {project_id}"
                )));
            }
        }
        let project = state
            .projects
            .get_mut(&project_id)
            .ok_or_else(|| IndexError::NotFound(format!("Project {project_id} not found")))?;
        project.cover_image_id = image_id;
        Ok(())
    }

    async fn is_url_referenced(&self, url: &str) -> IndexResult<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .images
            .values()
            .any(|i| i.url == url))
    }
}

// ----------------------------------------------------------------------------
// Blob store
// ----------------------------------------------------------------------------

pub struct MemoryBlobStore {
    layout: CdnLayout,
    objects: Mutex<HashMap<String, Bytes>>,
    pub fail_puts: AtomicBool,
    pub fail_deletes: AtomicBool,
    pub hang_puts: AtomicBool,
    pub puts: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self {
            layout: CdnLayout::new(CDN_BASE).unwrap(),
            objects: Mutex::new(HashMap::new()),
            fail_puts: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            hang_puts: AtomicBool::new(false),
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }
}

impl MemoryBlobStore {
    pub fn contains_url(&self, url: &str) -> bool {
        match self.layout.key_from_url(url) {
            Ok(key) => self.objects.lock().unwrap().contains_key(&key.to_string()),
            Err(_) => false,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn remove_url(&self, url: &str) {
        if let Ok(key) = self.layout.key_from_url(url) {
            self.objects.lock().unwrap().remove(&key.to_string());
        }
    }

    pub fn insert_raw(&self, key: &BlobKey, data: Bytes) -> String {
        self.objects.lock().unwrap().insert(key.to_string(), data);
        self.layout.public_url(key)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn layout(&self) -> &CdnLayout {
        &self.layout
    }

    async fn put(&self, key: &BlobKey, data: Bytes) -> Result<BlobLocation, BlobStoreError> {
        if self.hang_puts.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(BlobStoreError::Status {
                operation: "put",
                status: 503,
                body: "storage unavailable".to_string(),
            });
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(BlobLocation {
            key: key.clone(),
            url: self.layout.public_url(key),
        })
    }

    async fn delete(&self, key: &BlobKey) -> Result<DeleteOutcome, BlobStoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(BlobStoreError::Status {
                operation: "delete",
                status: 503,
                body: "storage unavailable".to_string(),
            });
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        match self.objects.lock().unwrap().remove(&key.to_string()) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::AlreadyAbsent),
        }
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, BlobStoreError> {
        let key = self.layout.key_from_url(url)?;
        self.objects
            .lock()
            .unwrap()
            .get(&key.to_string())
            .cloned()
            .ok_or(BlobStoreError::Status {
                operation: "fetch",
                status: 404,
                body: "not found".to_string(),
            })
    }
}

// ----------------------------------------------------------------------------
// Orphan backlog
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryOrphans {
    records: Mutex<Vec<OrphanRecord>>,
    pub fail_enqueue: AtomicBool,
}

impl MemoryOrphans {
    /// `(blob_key, reason)` of every pending record
    pub fn pending(&self) -> Vec<(String, String)> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.resolved_at.is_none())
            .map(|r| (r.blob_key.clone(), r.reason.clone()))
            .collect()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.pending().into_iter().map(|(_, reason)| reason).collect()
    }

    pub fn resolutions(&self) -> Vec<Option<String>> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.resolution.clone())
            .collect()
    }
}

#[async_trait]
impl OrphanRepository for MemoryOrphans {
    async fn enqueue(&self, blob_key: &str, reason: &str) -> OutboxResult<OrphanRecord> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(OutboxError::Other(anyhow::anyhow!("orphan table unavailable")));
        }
        let record = OrphanRecord::new(blob_key, reason);
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn get_due(
        &self,
        _grace: Duration,
        max_retries: i32,
        limit: i64,
    ) -> OutboxResult<Vec<OrphanRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.resolved_at.is_none() && r.retry_count < max_retries)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_resolved(&self, id: Uuid, resolution: &str) -> OutboxResult<()> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(OutboxError::RecordNotFound(id))?;
        record.resolved_at = Some(Utc::now());
        record.resolution = Some(resolution.to_string());
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> OutboxResult<()> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(OutboxError::RecordNotFound(id))?;
        record.retry_count += 1;
        record.last_error = Some(error.to_string());
        record.last_attempt_at = Some(Utc::now());
        Ok(())
    }

    async fn pending_stats(&self) -> OutboxResult<(i64, i64)> {
        Ok((self.pending().len() as i64, 0))
    }
}

// ----------------------------------------------------------------------------
// Fixture
// ----------------------------------------------------------------------------

pub struct Fixture {
    pub index: Arc<MemoryIndex>,
    pub blobs: Arc<MemoryBlobStore>,
    pub orphans: Arc<MemoryOrphans>,
    pub orchestrator: Arc<AssetOrchestrator>,
    pub owner: Uuid,
    pub deadlines: Deadlines,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_deadlines(Deadlines {
            blob: Duration::from_secs(5),
            index: Duration::from_secs(5),
        })
    }

    pub fn with_deadlines(deadlines: Deadlines) -> Self {
        let index = Arc::new(MemoryIndex::default());
        let blobs = Arc::new(MemoryBlobStore::default());
        let orphans = Arc::new(MemoryOrphans::default());
        let processor = Arc::new(ImageProcessor::new(TransformConfig {
            max_width: 1080,
            quality: 90,
        }));
        let orchestrator = Arc::new(AssetOrchestrator::new(
            index.clone(),
            blobs.clone(),
            orphans.clone(),
            processor,
        ));

        Self {
            index,
            blobs,
            orphans,
            orchestrator,
            owner: Uuid::new_v4(),
            deadlines,
        }
    }

    pub fn ctx(&self) -> RequestContext {
        RequestContext::new(self.owner, self.deadlines)
    }

    pub fn stranger(&self) -> RequestContext {
        RequestContext::new(Uuid::new_v4(), self.deadlines)
    }

    pub fn state(&self) -> AppState {
        AppState {
            orchestrator: self.orchestrator.clone(),
            deadlines: self.deadlines,
            max_upload_bytes: 5 * 1024 * 1024,
        }
    }

    pub async fn project(&self, name: &str) -> Project {
        self.orchestrator
            .create_project(
                &self.ctx(),
                CreateProjectRequest {
                    name: name.to_string(),
                    description: None,
                },
            )
            .await
            .unwrap()
    }

    pub async fn upload(&self, project_id: Uuid) -> Image {
        self.orchestrator
            .create_image(&self.ctx(), project_id, png(12, 8))
            .await
            .unwrap()
    }
}

// ----------------------------------------------------------------------------
// Images
// ----------------------------------------------------------------------------

fn encode_png(img: RgbImage) -> Bytes {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
        .unwrap();
    Bytes::from(buf)
}

pub fn png(width: u32, height: u32) -> Bytes {
    encode_png(RgbImage::from_pixel(width, height, Rgb([90, 140, 200])))
}

/// Left half red, right half blue.
pub fn two_tone_png(width: u32, height: u32) -> Bytes {
    encode_png(RgbImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgb([220, 20, 20])
        } else {
            Rgb([20, 20, 220])
        }
    }))
}

/// True if the pixel is clearly more red than blue.
pub fn is_reddish(pixel: &Rgb<u8>) -> bool {
    pixel[0] as i32 - pixel[2] as i32 > 100
}

pub fn is_bluish(pixel: &Rgb<u8>) -> bool {
    pixel[2] as i32 - pixel[0] as i32 > 100
}

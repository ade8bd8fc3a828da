//! Asset index: projects, images, ordering and cover selection

mod pg_index;

pub use pg_index::PgAssetIndex;

use crate::models::{Image, Project};
use async_trait::async_trait;
use sqlx::migrate::Migrator;
use std::time::Duration;
use uuid::Uuid;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub type IndexResult<T> = std::result::Result<T, IndexError>;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("index {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

/// Relational index over projects and their images.
///
/// Every method is a single atomic operation against the store.
#[async_trait]
pub trait AssetIndex: Send + Sync {
    async fn create_project(
        &self,
        owner_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> IndexResult<Project>;

    async fn get_project(&self, project_id: Uuid) -> IndexResult<Option<Project>>;

    /// Projects of one owner, newest first.
    async fn list_projects(&self, owner_id: Uuid) -> IndexResult<Vec<Project>>;

    async fn get_image(&self, image_id: Uuid) -> IndexResult<Option<Image>>;

    async fn find_image_by_url(&self, url: &str) -> IndexResult<Option<Image>>;

    /// Images of a project ordered by `sort_order`, then `created_at`.
    async fn list_images(&self, project_id: Uuid) -> IndexResult<Vec<Image>>;

    /// Append an image at `max(sort_order) + 1`. `NotFound` if the project is gone.
    async fn insert_image(&self, project_id: Uuid, url: &str) -> IndexResult<Image>;

    /// Swap the url if it still equals `expected_url`.
    ///
    /// `Conflict` when the url moved on, `NotFound` when the row is gone.
    async fn update_image_url(
        &self,
        image_id: Uuid,
        expected_url: &str,
        new_url: &str,
    ) -> IndexResult<Image>;

    /// Delete the row if its url still equals `expected_url`.
    async fn delete_image(&self, image_id: Uuid, expected_url: &str) -> IndexResult<()>;

    /// Remove every image of a project, returning their urls.
    async fn delete_images_for_project(&self, project_id: Uuid) -> IndexResult<Vec<String>>;

    /// Remove the project together with any images still attached, returning
    /// the urls of those images.
    async fn delete_project(&self, project_id: Uuid) -> IndexResult<Vec<String>>;

    /// Assign `sort_order = 1..N` following `ordered_ids`, which must be
    /// exactly the project's current image ids. `Conflict` otherwise.
    async fn reorder(&self, project_id: Uuid, ordered_ids: &[Uuid]) -> IndexResult<()>;

    /// Set or clear the cover. A cover outside the project is `NotFound`.
    async fn set_cover(&self, project_id: Uuid, image_id: Option<Uuid>) -> IndexResult<()>;

    async fn is_url_referenced(&self, url: &str) -> IndexResult<bool>;
}

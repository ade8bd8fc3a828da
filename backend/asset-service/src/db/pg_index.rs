/// PostgreSQL-backed asset index
///
/// Sort order and reorder are serialized per project by locking the project
/// row; `uq_images_project_sort` backs this up at commit time.
use super::{AssetIndex, IndexError, IndexResult};
use crate::models::{Image, Project};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

const PROJECT_COLUMNS: &str = "id, name, description, owner_id, cover_image_id, created_at";
const IMAGE_COLUMNS: &str = "id, project_id, url, sort_order, created_at";

#[derive(Clone)]
pub struct PgAssetIndex {
    pool: PgPool,
}

impl PgAssetIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lock the project row for the rest of the transaction.
    async fn lock_project(
        tx: &mut Transaction<'_, Postgres>,
        project_id: Uuid,
    ) -> IndexResult<()> {
        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM projects WHERE id = $1 FOR UPDATE")
                .bind(project_id)
                .fetch_optional(&mut **tx)
                .await?;

        locked
            .map(|_| ())
            .ok_or_else(|| IndexError::NotFound(format!("Project {project_id} not found")))
    }

    async fn image_exists(&self, image_id: Uuid) -> IndexResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM images WHERE id = $1)")
            .bind(image_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn project_exists(&self, project_id: Uuid) -> IndexResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM projects WHERE id = $1)")
                .bind(project_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

/// Deferred uniqueness is only checked at commit.
fn map_commit_error(err: sqlx::Error) -> IndexError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            IndexError::Conflict(format!("concurrent sort order assignment: {}", db.message()))
        }
        _ => IndexError::Database(err),
    }
}

#[async_trait]
impl AssetIndex for PgAssetIndex {
    async fn create_project(
        &self,
        owner_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> IndexResult<Project> {
        let project = sqlx::query_as::<_, Project>(&format!(
            "INSERT INTO projects (id, name, description, owner_id, created_at) \
             VALUES ($1, $2, $3, $4, NOW()) \
             RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(description)
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(project)
    }

    async fn get_project(&self, project_id: Uuid) -> IndexResult<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1"
        ))
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(project)
    }

    async fn list_projects(&self, owner_id: Uuid) -> IndexResult<Vec<Project>> {
        let projects = sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE owner_id = $1 ORDER BY created_at DESC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(projects)
    }

    async fn get_image(&self, image_id: Uuid) -> IndexResult<Option<Image>> {
        let image = sqlx::query_as::<_, Image>(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE id = $1"
        ))
        .bind(image_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(image)
    }

    async fn find_image_by_url(&self, url: &str) -> IndexResult<Option<Image>> {
        let image = sqlx::query_as::<_, Image>(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE url = $1 LIMIT 1"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(image)
    }

    async fn list_images(&self, project_id: Uuid) -> IndexResult<Vec<Image>> {
        let images = sqlx::query_as::<_, Image>(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE project_id = $1 \
             ORDER BY sort_order ASC, created_at ASC"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(images)
    }

    async fn insert_image(&self, project_id: Uuid, url: &str) -> IndexResult<Image> {
        let mut tx = self.pool.begin().await?;
        Self::lock_project(&mut tx, project_id).await?;

        let image = sqlx::query_as::<_, Image>(&format!(
            "INSERT INTO images (id, project_id, url, sort_order, created_at) \
             SELECT $1, $2, $3, COALESCE(MAX(sort_order), 0) + 1, NOW() \
             FROM images WHERE project_id = $2 \
             RETURNING {IMAGE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(url)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await.map_err(map_commit_error)?;

        debug!(
            project_id = %project_id,
            image_id = %image.id,
            sort_order = image.sort_order,
            "Image row inserted"
        );
        Ok(image)
    }

    async fn update_image_url(
        &self,
        image_id: Uuid,
        expected_url: &str,
        new_url: &str,
    ) -> IndexResult<Image> {
        let updated = sqlx::query_as::<_, Image>(&format!(
            "UPDATE images SET url = $3 WHERE id = $1 AND url = $2 RETURNING {IMAGE_COLUMNS}"
        ))
        .bind(image_id)
        .bind(expected_url)
        .bind(new_url)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(image) => Ok(image),
            None if self.image_exists(image_id).await? => Err(IndexError::Conflict(format!(
                "Image {image_id} url changed concurrently"
            ))),
            None => Err(IndexError::NotFound(format!("Image {image_id} not found"))),
        }
    }

    async fn delete_image(&self, image_id: Uuid, expected_url: &str) -> IndexResult<()> {
        let result = sqlx::query("DELETE FROM images WHERE id = $1 AND url = $2")
            .bind(image_id)
            .bind(expected_url)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        if self.image_exists(image_id).await? {
            Err(IndexError::Conflict(format!(
                "Image {image_id} url changed concurrently"
            )))
        } else {
            Err(IndexError::NotFound(format!("Image {image_id} not found")))
        }
    }

    async fn delete_images_for_project(&self, project_id: Uuid) -> IndexResult<Vec<String>> {
        let urls: Vec<String> =
            sqlx::query_scalar("DELETE FROM images WHERE project_id = $1 RETURNING url")
                .bind(project_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(urls)
    }

    async fn delete_project(&self, project_id: Uuid) -> IndexResult<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        Self::lock_project(&mut tx, project_id).await?;

        let stragglers: Vec<String> =
            sqlx::query_scalar("DELETE FROM images WHERE project_id = $1 RETURNING url")
                .bind(project_id)
                .fetch_all(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(project_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(stragglers)
    }

    async fn reorder(&self, project_id: Uuid, ordered_ids: &[Uuid]) -> IndexResult<()> {
        let requested: HashSet<Uuid> = ordered_ids.iter().copied().collect();
        if requested.len() != ordered_ids.len() {
            return Err(IndexError::Conflict(
                "Reorder list contains duplicate image ids".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        Self::lock_project(&mut tx, project_id).await?;

        let current: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM images WHERE project_id = $1")
            .bind(project_id)
            .fetch_all(&mut *tx)
            .await?;
        let current: HashSet<Uuid> = current.into_iter().collect();

        if current != requested {
            // dropping tx rolls back
            return Err(IndexError::Conflict(format!(
                "Reorder list does not match the {} images of project {project_id}",
                current.len()
            )));
        }

        let positions: Vec<i32> = (1..=ordered_ids.len() as i32).collect();
        sqlx::query(
            "UPDATE images AS i SET sort_order = v.ord \
             FROM UNNEST($1::uuid[], $2::int4[]) AS v(id, ord) \
             WHERE i.id = v.id AND i.project_id = $3",
        )
        .bind(ordered_ids)
        .bind(&positions)
        .bind(project_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.map_err(map_commit_error)?;
        Ok(())
    }

    async fn set_cover(&self, project_id: Uuid, image_id: Option<Uuid>) -> IndexResult<()> {
        let result = match image_id {
            Some(image_id) => {
                sqlx::query(
                    "UPDATE projects SET cover_image_id = $2 \
                     WHERE id = $1 \
                       AND EXISTS (SELECT 1 FROM images WHERE id = $2 AND project_id = $1)",
                )
                .bind(project_id)
                .bind(image_id)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query("UPDATE projects SET cover_image_id = NULL WHERE id = $1")
                    .bind(project_id)
                    .execute(&self.pool)
                    .await?
            }
        };

        if result.rows_affected() > 0 {
            return Ok(());
        }
        if !self.project_exists(project_id).await? {
            return Err(IndexError::NotFound(format!("Project {project_id} not found")));
        }
        Err(IndexError::NotFound(format!(
            "Image {} does not belong to project {project_id}",
            image_id.map(|id| id.to_string()).unwrap_or_default()
        )))
    }

    async fn is_url_referenced(&self, url: &str) -> IndexResult<bool> {
        let referenced: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM images WHERE url = $1)")
            .bind(url)
            .fetch_one(&self.pool)
            .await?;
        Ok(referenced)
    }
}

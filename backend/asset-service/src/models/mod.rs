/// Data models for asset-service
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: Uuid,
    pub cover_image_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: Uuid,
    pub project_id: Uuid,
    pub url: String,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
}

/// Project with its images in display order
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: Project,
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateProjectRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 4000))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderRequest {
    pub image_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCoverRequest {
    pub image_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateRequest {
    #[serde(alias = "rotation")]
    pub rotation_degrees: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalRotateRequest {
    pub image_url: String,
    #[serde(alias = "rotation")]
    pub rotation_degrees: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateResponse {
    pub success: bool,
    pub new_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicImagesResponse {
    pub project_id: Uuid,
    pub images: Vec<String>,
}

/// Outcome of a delete that tolerates blob store failures.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteReport {
    pub deleted: bool,
    pub warnings: Vec<String>,
}

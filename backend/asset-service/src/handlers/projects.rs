/// Project handlers - CRUD, ordering and cover selection
use actix_web::{web, HttpResponse};
use uuid::Uuid;

use super::AppState;
use crate::error::Result;
use crate::middleware::OwnerId;
use crate::models::{CreateProjectRequest, ReorderRequest, SetCoverRequest};

pub async fn create_project(
    state: web::Data<AppState>,
    owner: OwnerId,
    payload: web::Json<CreateProjectRequest>,
) -> Result<HttpResponse> {
    let project = state
        .orchestrator
        .create_project(&state.context(owner), payload.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(project))
}

/// List the caller's projects, newest first
pub async fn list_projects(state: web::Data<AppState>, owner: OwnerId) -> Result<HttpResponse> {
    let projects = state
        .orchestrator
        .list_projects(&state.context(owner))
        .await?;
    Ok(HttpResponse::Ok().json(projects))
}

pub async fn get_project(
    state: web::Data<AppState>,
    owner: OwnerId,
    project_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let detail = state
        .orchestrator
        .get_project(&state.context(owner), project_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(detail))
}

/// Delete a project and all of its images
///
/// Blob store failures do not fail the request; they come back as `warnings`.
pub async fn delete_project(
    state: web::Data<AppState>,
    owner: OwnerId,
    project_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let report = state
        .orchestrator
        .delete_project(&state.context(owner), project_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(report))
}

pub async fn reorder_images(
    state: web::Data<AppState>,
    owner: OwnerId,
    project_id: web::Path<Uuid>,
    payload: web::Json<ReorderRequest>,
) -> Result<HttpResponse> {
    let images = state
        .orchestrator
        .reorder(&state.context(owner), project_id.into_inner(), &payload.image_ids)
        .await?;
    Ok(HttpResponse::Ok().json(images))
}

pub async fn set_cover(
    state: web::Data<AppState>,
    owner: OwnerId,
    project_id: web::Path<Uuid>,
    payload: web::Json<SetCoverRequest>,
) -> Result<HttpResponse> {
    let project = state
        .orchestrator
        .set_cover(&state.context(owner), project_id.into_inner(), payload.image_id)
        .await?;
    Ok(HttpResponse::Ok().json(project))
}

pub async fn remove_cover(
    state: web::Data<AppState>,
    owner: OwnerId,
    project_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let project = state
        .orchestrator
        .remove_cover(&state.context(owner), project_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(project))
}

/// Image handlers - upload, rotate, delete
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use uuid::Uuid;

use super::AppState;
use crate::error::{AppError, Result};
use crate::middleware::OwnerId;
use crate::models::RotateRequest;

const FILE_FIELD: &str = "file";

pub async fn list_images(
    state: web::Data<AppState>,
    owner: OwnerId,
    project_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let images = state
        .orchestrator
        .list_images(&state.context(owner), project_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(images))
}

/// Upload one image as multipart field `file`
pub async fn upload_image(
    state: web::Data<AppState>,
    owner: OwnerId,
    project_id: web::Path<Uuid>,
    payload: Multipart,
) -> Result<HttpResponse> {
    let raw = read_file_field(payload, state.max_upload_bytes).await?;
    let image = state
        .orchestrator
        .create_image(&state.context(owner), project_id.into_inner(), raw)
        .await?;
    Ok(HttpResponse::Created().json(image))
}

pub async fn rotate_image(
    state: web::Data<AppState>,
    owner: OwnerId,
    image_id: web::Path<Uuid>,
    payload: web::Json<RotateRequest>,
) -> Result<HttpResponse> {
    let image = state
        .orchestrator
        .rotate_image(
            &state.context(owner),
            image_id.into_inner(),
            payload.rotation_degrees,
        )
        .await?;
    Ok(HttpResponse::Ok().json(image))
}

pub async fn delete_image(
    state: web::Data<AppState>,
    owner: OwnerId,
    image_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let report = state
        .orchestrator
        .delete_image(&state.context(owner), image_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(report))
}

/// Collect the `file` field, draining any other fields.
async fn read_file_field(mut payload: Multipart, limit: usize) -> Result<Bytes> {
    let mut file: Option<BytesMut> = None;

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?;
        let is_file = field.name() == Some(FILE_FIELD) && file.is_none();
        let mut buf = BytesMut::new();

        while let Some(chunk) = field.next().await {
            let chunk =
                chunk.map_err(|e| AppError::Validation(format!("Error reading upload: {e}")))?;
            if !is_file {
                continue;
            }
            if buf.len() + chunk.len() > limit {
                return Err(AppError::Validation(format!(
                    "Uploaded file exceeds the {limit} byte limit"
                )));
            }
            buf.extend_from_slice(&chunk);
        }

        if is_file {
            file = Some(buf);
        }
    }

    file.map(BytesMut::freeze)
        .ok_or_else(|| AppError::Validation("Multipart field 'file' is required".to_string()))
}

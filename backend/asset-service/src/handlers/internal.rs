/// Internal rotate endpoint
///
/// Addresses images by their current url. Every outcome is JSON:
/// `{ success, newUrl }` or `{ error, kind, details }`.
use actix_web::{web, HttpResponse};

use super::AppState;
use crate::error::Result;
use crate::models::{InternalRotateRequest, RotateResponse};

pub async fn rotate(
    state: web::Data<AppState>,
    payload: web::Json<InternalRotateRequest>,
) -> Result<HttpResponse> {
    let request = payload.into_inner();
    let image = state
        .orchestrator
        .rotate_by_url(&state.deadlines, &request.image_url, request.rotation_degrees)
        .await?;

    Ok(HttpResponse::Ok().json(RotateResponse {
        success: true,
        new_url: image.url,
    }))
}

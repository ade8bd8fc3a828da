/// HTTP request handlers for asset-service
pub mod images;
pub mod internal;
pub mod projects;
pub mod public;

use actix_web::{web, HttpResponse};
use std::sync::Arc;

use crate::config::Deadlines;
use crate::error::AppError;
use crate::middleware::OwnerId;
use crate::services::{AssetOrchestrator, RequestContext};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<AssetOrchestrator>,
    pub deadlines: Deadlines,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn context(&self, owner: OwnerId) -> RequestContext {
        RequestContext::new(owner.0, self.deadlines)
    }
}

/// Malformed JSON bodies and path ids render as `ValidationError`.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| AppError::Validation(err.to_string()).into())
}

pub fn path_config() -> web::PathConfig {
    web::PathConfig::default()
        .error_handler(|err, _req| AppError::Validation(err.to_string()).into())
}

/// Register every route. Callers provide `web::Data<AppState>`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(path_config())
        .route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics))
        .service(
            web::scope("/api/v1")
                .service(
                    web::scope("/projects")
                        .route("", web::post().to(projects::create_project))
                        .route("", web::get().to(projects::list_projects))
                        .route("/{id}", web::get().to(projects::get_project))
                        .route("/{id}", web::delete().to(projects::delete_project))
                        .route("/{id}/images", web::get().to(images::list_images))
                        .route("/{id}/images", web::post().to(images::upload_image))
                        .route("/{id}/images/order", web::put().to(projects::reorder_images))
                        .route("/{id}/cover", web::put().to(projects::set_cover))
                        .route("/{id}/cover", web::delete().to(projects::remove_cover)),
                )
                .service(
                    web::scope("/images")
                        .route("/{id}/rotate", web::post().to(images::rotate_image))
                        .route("/{id}", web::delete().to(images::delete_image)),
                ),
        )
        .configure(public::configure)
        .route("/internal/rotate", web::post().to(internal::rotate));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}

async fn metrics() -> HttpResponse {
    use actix_web::ResponseError;
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        return AppError::Internal(format!("Failed to encode metrics: {e}")).error_response();
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

/// Public read endpoint for embedding project galleries
use actix_web::{middleware::DefaultHeaders, web, HttpResponse};
use uuid::Uuid;

use super::AppState;
use crate::error::{AppError, Result};

/// An id that cannot name a project is reported like an unknown one.
fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(|err, _req| {
        AppError::NotFound(format!("Project not found: {err}")).into()
    })
}

/// Mount the `/project` scope with permissive CORS headers on every response.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/project")
            .app_data(path_config())
            .wrap(
                DefaultHeaders::new()
                    .add(("Access-Control-Allow-Origin", "*"))
                    .add(("Access-Control-Allow-Methods", "GET"))
                    .add(("Access-Control-Allow-Headers", "Content-Type")),
            )
            .route("/{id}/images", web::get().to(project_images)),
    );
}

/// Image urls of a project in display order
pub async fn project_images(
    state: web::Data<AppState>,
    project_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let response = state
        .orchestrator
        .public_images(&state.deadlines, project_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

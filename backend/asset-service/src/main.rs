/// Asset Service - HTTP Server
///
/// Serves project image management and the public gallery endpoint, and runs
/// the orphan blob sweep in the background.
use actix_web::{web, App, HttpServer};
use asset_service::db::{PgAssetIndex, MIGRATOR};
use asset_service::handlers::{self, AppState};
use asset_service::metrics::AssetMetrics;
use asset_service::services::blob::{BlobStore, HttpBlobStore};
use asset_service::services::transform::{ImageProcessor, TransformConfig};
use asset_service::services::{AssetOrchestrator, BlobOrphanReaper};
use asset_service::Config;
use reconciliation_outbox::metrics::SweepMetrics;
use reconciliation_outbox::{OrphanSweeper, SqlxOrphanRepository, SweepConfig};
use resilience::BackoffConfig;
use sqlx::postgres::PgPoolOptions;
use std::io;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

const SERVICE_NAME: &str = "asset-service";

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    let http_bind_address = format!("{}:{}", config.app.host, config.app.port);
    tracing::info!(
        env = %config.app.env,
        address = %http_bind_address,
        "Asset service starting"
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Failed to connect to database: {e}")))?;

    MIGRATOR
        .run(&db_pool)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Failed to run migrations: {e}")))?;

    let blobs: Arc<dyn BlobStore> = Arc::new(
        HttpBlobStore::from_config(&config.blob, config.deadlines.blob)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?,
    );
    let index = Arc::new(PgAssetIndex::new(db_pool.clone()));
    let orphans = Arc::new(SqlxOrphanRepository::new(db_pool.clone()));
    let processor = Arc::new(ImageProcessor::new(TransformConfig {
        max_width: config.image.max_width,
        quality: config.image.quality,
    }));

    let orchestrator = Arc::new(
        AssetOrchestrator::new(index.clone(), blobs.clone(), orphans.clone(), processor)
            .with_metrics(AssetMetrics::new(SERVICE_NAME)),
    );

    let sweeper = OrphanSweeper::new(
        orphans,
        Arc::new(BlobOrphanReaper::new(index, blobs)),
        SweepConfig {
            batch_size: config.sweep.batch_size,
            poll_interval: config.sweep.poll_interval,
            grace_period: config.sweep.grace_period,
            max_retries: config.sweep.max_retries,
            backoff: BackoffConfig::default(),
        },
    )
    .with_metrics(SweepMetrics::new(SERVICE_NAME));

    let state = AppState {
        orchestrator,
        deadlines: config.deadlines,
        max_upload_bytes: config.image.max_upload_bytes,
    };

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(TracingLogger::default())
            .configure(handlers::configure)
    })
    .bind(&http_bind_address)?
    .run();

    let mut tasks = JoinSet::new();

    tasks.spawn(async move {
        tracing::info!("HTTP server is running");
        server.await
    });

    tasks.spawn(async move {
        sweeper.start().await;
        Ok(())
    });

    // The service is unusable once either task stops
    let mut first_error = None;
    if let Some(result) = tasks.join_next().await {
        match result {
            Ok(Ok(_)) => {
                tracing::warn!("Task completed");
            }
            Ok(Err(e)) => {
                tracing::error!("Server error: {}", e);
                first_error = Some(e);
            }
            Err(e) => {
                tracing::error!("Task error: {}", e);
                first_error = Some(io::Error::new(io::ErrorKind::Other, format!("{}", e)));
            }
        }
    }
    tasks.abort_all();

    tracing::info!("Asset service shutting down");

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

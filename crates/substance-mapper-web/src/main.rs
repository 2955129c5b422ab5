//! Substance mapping web server.
//!
//! Loads the encoder and reference corpus eagerly at startup: if either
//! fails the process exits instead of becoming "ready" with a broken
//! index. Persistence is optional — without DATABASE_URL the service
//! runs in AI-mapping-only mode and review endpoints report 503.

mod routes;
mod state;

use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use substance_mapper::{
    CandleEncoder, CertificationStore, MapperConfig, MappingService, PgCertificationStore,
    SubstanceIndex, TextEncoder,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "substance_mapper=info,substance_mapper_web=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting substance mapping server");

    let config = MapperConfig::from_env()?;
    tracing::info!(
        "Config: model={}, data_dir={}, thresholds=({}, {}), weights=({}, {}), top_k={}",
        config.model_repo,
        config.data_dir.display(),
        config.thresholds.mapped,
        config.thresholds.needs_review,
        config.fusion.top1_weight,
        config.fusion.margin_weight,
        config.top_k
    );

    // Fail fast: a broken model or reference table must stop startup.
    let encoder: Arc<dyn TextEncoder> = Arc::new(CandleEncoder::from_repo(&config.model_repo)?);
    let reference_path = config.data_dir.join(substance_mapper::reference::REFERENCE_FILE);
    let corpus = substance_mapper::reference::load_reference_csv(&reference_path)?;
    let index = Arc::new(SubstanceIndex::from_corpus(encoder.as_ref(), corpus)?);
    tracing::info!("Index ready: {} substances", index.len());

    // Optional persistence: mapping still works read-only without it.
    let store: Option<Arc<dyn CertificationStore>> = match std::env::var("DATABASE_URL") {
        Ok(url) => match sqlx::PgPool::connect(&url).await {
            Ok(pool) => {
                tracing::info!("Database connection established");
                Some(Arc::new(PgCertificationStore::new(pool)))
            }
            Err(e) => {
                tracing::warn!(
                    "Database connection failed ({}); continuing without persistence",
                    e
                );
                None
            }
        },
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; mapping results will not be saved");
            None
        }
    };

    let service = Arc::new(MappingService::new(
        encoder,
        index,
        store.clone(),
        config,
    )?);
    let state = AppState::new(service, store);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/substance/map", post(routes::mapping::map_one))
        .route("/substance/map-batch", post(routes::mapping::map_batch))
        .route("/substance/map-file", post(routes::mapping::map_file))
        .route("/substance/correct/:id", post(routes::review::correct))
        .route("/substance/approve/:id", post(routes::review::approve))
        .route("/substance/review-queue", get(routes::review::review_queue))
        .route("/substance/status", get(routes::status::status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let port: u16 = std::env::var("SERVER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Substance mapping server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!("Failed to bind to {}: {}", addr, e);
        e
    })?;
    axum::serve(listener, app).await?;

    Ok(())
}

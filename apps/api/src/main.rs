mod assessor;
mod catalog;
mod config;
mod errors;
mod jobs;
mod models;
mod pipeline;
mod report;
mod resolver;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::assessor::DamageAssessor;
use crate::catalog::PriceCatalog;
use crate::config::Config;
use crate::jobs::JobStore;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Claimscope API v{}", env!("CARGO_PKG_VERSION"));

    // Load the price catalog. A missing or broken catalog is survivable: the
    // service runs with everything unpriced rather than refusing to start.
    let catalog = match &config.price_catalog_path {
        Some(path) => match PriceCatalog::load(path) {
            Ok(catalog) => {
                info!(entries = catalog.len(), path = %path.display(), "price catalog loaded");
                catalog
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "price catalog unavailable; running unpriced");
                PriceCatalog::empty()
            }
        },
        None => {
            warn!("no PRICE_CATALOG_PATH configured; running unpriced");
            PriceCatalog::empty()
        }
    };

    // Initialize the job store root
    let jobs = JobStore::new(&config.data_dir);
    jobs.init().await?;
    info!(root = %config.data_dir.display(), "job store initialized");

    // Build the provider chain from whichever API keys are present
    let assessor = DamageAssessor::from_config(&config);
    info!(
        providers = assessor.provider_count(),
        mode = ?config.assess_mode,
        "damage assessor initialized"
    );

    let state = AppState {
        config: config.clone(),
        catalog: Arc::new(catalog),
        assessor: Arc::new(assessor),
        jobs,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

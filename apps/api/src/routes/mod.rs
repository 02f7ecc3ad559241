pub mod health;
pub mod reports;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Reports API
        .route("/api/v1/reports", post(reports::handle_submit))
        .route("/api/v1/reports/:job_id", get(reports::handle_status))
        .route(
            "/api/v1/reports/:job_id/download",
            get(reports::handle_download),
        )
        .with_state(state)
}

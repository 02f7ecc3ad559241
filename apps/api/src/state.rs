use std::sync::Arc;

use crate::assessor::DamageAssessor;
use crate::catalog::PriceCatalog;
use crate::config::Config;
use crate::jobs::JobStore;

/// Shared application state injected into all route handlers via Axum extractors.
///
/// The catalog is loaded once at startup and only ever read, so concurrent
/// jobs share it behind an `Arc` without locking.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub catalog: Arc<PriceCatalog>,
    pub assessor: Arc<DamageAssessor>,
    pub jobs: JobStore,
}

//! Application state

use std::sync::Arc;

use trackshop_ledger::LedgerService;

use crate::{catalog::TrackCatalog, config::Config};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerService>,
    /// Immutable after startup
    pub catalog: Arc<TrackCatalog>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(ledger: LedgerService, catalog: TrackCatalog, config: Config) -> Self {
        tracing::info!(
            storage = ledger.store.backend_name(),
            tracks = catalog.len(),
            request_timeout_secs = config.request_timeout.as_secs(),
            "Application state initialized"
        );
        if config.admin_api_token.is_none() {
            tracing::warn!("Admin endpoints disabled (missing ADMIN_API_TOKEN)");
        }

        Self {
            ledger: Arc::new(ledger),
            catalog: Arc::new(catalog),
            config: Arc::new(config),
        }
    }
}

//! HTTP routes

pub mod admin;
pub mod downloads;
pub mod purchases;
pub mod webhooks;

#[cfg(test)]
mod route_tests;

use std::future::Future;

use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use serde::Serialize;
use trackshop_ledger::LedgerResult;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/v1/webhooks/payments",
            post(webhooks::receive_payment_webhook),
        )
        .route("/api/v1/downloads", get(downloads::get_download_link))
        .route("/api/v1/purchases", get(purchases::list_purchases))
        .route(
            "/api/v1/admin/ledger/invariants",
            get(admin::ledger_invariants),
        )
        .route(
            "/api/v1/admin/webhook-events",
            get(admin::list_webhook_events),
        )
        .with_state(state)
}

/// Run storage work under the configured per-request deadline
pub(crate) async fn with_deadline<T, F>(state: &AppState, work: F) -> ApiResult<T>
where
    F: Future<Output = LedgerResult<T>>,
{
    match tokio::time::timeout(state.config.request_timeout, work).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(_) => Err(ApiError::Timeout),
    }
}

/// Treat absent and blank query parameters alike
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub storage: &'static str,
    pub version: &'static str,
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let storage = state.ledger.store.backend_name();
    let healthy = with_deadline(&state, state.ledger.store.ping()).await.is_ok();

    let (code, status) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        tracing::warn!(storage, "Health check failed: storage unreachable");
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthResponse {
            status,
            storage,
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

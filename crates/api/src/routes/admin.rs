//! Operator endpoints
//!
//! Guarded by a shared secret in the `x-admin-token` header. When no token is
//! configured the endpoints answer 404, as if they were not mounted.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use trackshop_ledger::{InvariantCheckSummary, WebhookEventRecord};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    routes::with_deadline,
    state::AppState,
};

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

const DEFAULT_EVENT_PAGE: i64 = 50;
const MAX_EVENT_PAGE: i64 = 500;

fn require_admin(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let Some(expected) = state.config.admin_api_token.as_deref() else {
        return Err(ApiError::NotFound("Not found".to_string()));
    };

    let presented = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        tracing::warn!("Admin request with missing or invalid token");
        Err(ApiError::Unauthorized)
    }
}

pub async fn ledger_invariants(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<InvariantCheckSummary>> {
    require_admin(&state, &headers)?;

    let req_id = Uuid::new_v4();
    tracing::info!(%req_id, "Admin checking ledger invariants");

    let summary = with_deadline(&state, state.ledger.invariants.run_all_checks())
        .await
        .inspect_err(|e| tracing::error!(%req_id, error = %e, "Failed to run invariant checks"))?;

    if !summary.healthy {
        tracing::warn!(
            %req_id,
            checks_failed = summary.checks_failed,
            violations = summary.violations.len(),
            "Ledger invariants violated"
        );
    }

    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct WebhookEventsQuery {
    pub processed: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct WebhookEventsResponse {
    pub events: Vec<WebhookEventRecord>,
    pub limit: i64,
    pub offset: i64,
}

pub async fn list_webhook_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WebhookEventsQuery>,
) -> ApiResult<Json<WebhookEventsResponse>> {
    require_admin(&state, &headers)?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_PAGE)
        .clamp(1, MAX_EVENT_PAGE);
    let offset = query.offset.unwrap_or(0).max(0);

    let events = with_deadline(
        &state,
        state.ledger.events.list(query.processed, limit, offset),
    )
    .await?;

    Ok(Json(WebhookEventsResponse {
        events,
        limit,
        offset,
    }))
}

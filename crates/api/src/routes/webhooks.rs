//! Payment provider webhook endpoint
//!
//! Acknowledges receipt, not business outcome: any delivery that was durably
//! logged gets `{"status": "ok"}` so the provider stops redelivering it.

use axum::{extract::State, Json};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    routes::with_deadline,
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct WebhookAckResponse {
    pub status: &'static str,
    /// Echo of the delivery's `event` field
    pub event: Option<String>,
}

pub async fn receive_payment_webhook(
    State(state): State<AppState>,
    body: String,
) -> ApiResult<Json<WebhookAckResponse>> {
    let req_id = Uuid::new_v4();
    let span = tracing::info_span!("payment_webhook", %req_id, body_len = body.len());

    let ack = with_deadline(&state, state.ledger.webhooks.handle_delivery(&body))
        .instrument(span)
        .await
        .inspect_err(|e| {
            if let ApiError::Validation(msg) = e {
                tracing::warn!(%req_id, error = %msg, "Rejected unparseable payment webhook");
            }
        })?;

    Ok(Json(WebhookAckResponse {
        status: "ok",
        event: ack.event_type,
    }))
}

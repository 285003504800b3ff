//! Download link issuance
//!
//! A link is issued only when the ledger holds a succeeded purchase for the
//! requested email and track. A refusal is a 403, never a 404: the track may
//! exist but not be purchased by this email.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use trackshop_ledger::Entitlement;

use crate::{
    error::{ApiError, ApiResult},
    routes::{non_empty, with_deadline},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct DownloadLinkQuery {
    pub email: Option<String>,
    pub track_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadLinkResponse {
    pub download_url: String,
    pub track_title: String,
    pub track_artist: String,
    pub filename: String,
}

pub async fn get_download_link(
    State(state): State<AppState>,
    Query(query): Query<DownloadLinkQuery>,
) -> ApiResult<Json<DownloadLinkResponse>> {
    let (Some(email), Some(track_id)) = (non_empty(query.email), non_empty(query.track_id)) else {
        return Err(ApiError::Validation(
            "Email and track_id parameters required".to_string(),
        ));
    };

    let track_id: i32 = track_id
        .trim()
        .parse()
        .map_err(|_| ApiError::Validation("Invalid track_id".to_string()))?;

    let entitlement =
        with_deadline(&state, state.ledger.entitlements.check(&email, track_id)).await?;

    let Entitlement::Granted(purchase) = entitlement else {
        tracing::info!(track_id, "Download refused: no succeeded purchase");
        return Err(ApiError::Forbidden(
            "Track not purchased or access denied".to_string(),
        ));
    };

    let Some(download_url) = state.catalog.download_url(track_id) else {
        tracing::warn!(
            track_id,
            payment_id = %purchase.payment_id,
            "Purchased track has no catalog entry"
        );
        return Err(ApiError::NotFound("Track file not found".to_string()));
    };

    tracing::info!(track_id, purchase_id = purchase.id, "Download link issued");

    Ok(Json(DownloadLinkResponse {
        download_url: download_url.to_string(),
        filename: purchase.download_filename(),
        track_title: purchase.track_title,
        track_artist: purchase.track_artist,
    }))
}

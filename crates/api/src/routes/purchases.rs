//! Purchase listing for a customer email

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use trackshop_ledger::{Purchase, PurchaseStatus};

use crate::{
    error::{ApiError, ApiResult},
    routes::{non_empty, with_deadline},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct PurchasesQuery {
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseSummary {
    pub id: i64,
    pub track_id: i32,
    pub track_title: String,
    pub track_artist: String,
    /// Stored 2-place decimal rendered as a JSON number
    pub amount: f64,
    pub payment_id: String,
    pub status: PurchaseStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub paid_at: Option<OffsetDateTime>,
}

impl From<Purchase> for PurchaseSummary {
    fn from(purchase: Purchase) -> Self {
        Self {
            amount: purchase.amount_as_f64(),
            id: purchase.id,
            track_id: purchase.track_id,
            track_title: purchase.track_title,
            track_artist: purchase.track_artist,
            payment_id: purchase.payment_id,
            status: purchase.status,
            created_at: Some(purchase.created_at),
            paid_at: purchase.paid_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PurchaseListResponse {
    pub purchases: Vec<PurchaseSummary>,
    pub count: usize,
}

pub async fn list_purchases(
    State(state): State<AppState>,
    Query(query): Query<PurchasesQuery>,
) -> ApiResult<Json<PurchaseListResponse>> {
    let Some(email) = non_empty(query.email) else {
        return Err(ApiError::Validation("Email parameter required".to_string()));
    };

    let purchases: Vec<PurchaseSummary> =
        with_deadline(&state, state.ledger.purchases.list_succeeded(&email))
            .await?
            .into_iter()
            .map(PurchaseSummary::from)
            .collect();

    Ok(Json(PurchaseListResponse {
        count: purchases.len(),
        purchases,
    }))
}

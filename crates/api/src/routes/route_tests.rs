// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! HTTP-level tests driven through the router with in-memory storage

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use trackshop_ledger::LedgerService;

use crate::{catalog::TrackCatalog, config::Config, routes::create_router, state::AppState};

const ADMIN_TOKEN: &str = "test-admin-token";

fn test_app_with(vars: &[(&str, &str)]) -> (Router, AppState) {
    let config = Config::from_lookup(|key| {
        vars.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    })
    .unwrap();
    let state = AppState::new(
        LedgerService::new_in_memory(),
        TrackCatalog::builtin(),
        config,
    );
    (create_router(state.clone()), state)
}

fn test_app() -> (Router, AppState) {
    test_app_with(&[
        ("STORAGE_BACKEND", "memory"),
        ("ADMIN_API_TOKEN", ADMIN_TOKEN),
    ])
}

fn succeeded_event(payment_id: &str, email: &str, track_id: Value) -> String {
    json!({
        "event": "payment.succeeded",
        "object": {
            "id": payment_id,
            "status": "succeeded",
            "amount": { "value": "2.50", "currency": "RUB" },
            "metadata": {
                "email": email,
                "track_id": track_id,
                "track_title": "X",
                "track_artist": "Y",
            }
        }
    })
    .to_string()
}

async fn post_webhook(app: &Router, body: String) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/webhooks/payments")
                .header("Content-Type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    read_json(response).await
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    get_with_headers(app, uri, &[]).await
}

async fn get_with_headers(
    app: &Router,
    uri: &str,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method("GET").uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let response = app
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    read_json(response).await
}

async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

// ------------------------------------------------------------------------
// Purchase flow
// ------------------------------------------------------------------------

#[tokio::test]
async fn succeeded_webhook_grants_download() {
    let (app, _state) = test_app();

    let (status, body) = post_webhook(&app, succeeded_event("pay_1", "a@b.com", json!(3))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "event": "payment.succeeded" }));

    let (status, body) = get(&app, "/api/v1/downloads?email=a@b.com&track_id=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["downloadUrl"],
        "https://www.soundhelix.com/examples/mp3/SoundHelix-Song-3.mp3"
    );
    assert_eq!(body["trackTitle"], "X");
    assert_eq!(body["trackArtist"], "Y");
    assert_eq!(body["filename"], "X - Y.mp3");
}

#[tokio::test]
async fn other_track_is_forbidden() {
    let (app, _state) = test_app();
    post_webhook(&app, succeeded_event("pay_1", "a@b.com", json!(3))).await;

    let (status, body) = get(&app, "/api/v1/downloads?email=a@b.com&track_id=4").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Track not purchased or access denied");

    let (status, _) = get(&app, "/api/v1/downloads?email=other@b.com&track_id=3").await;
    assert_eq!(status, StatusCode::FORBIDDEN, "Entitlement is per email");
}

#[tokio::test]
async fn string_track_id_in_metadata_is_accepted() {
    let (app, _state) = test_app();
    post_webhook(&app, succeeded_event("pay_1", "a@b.com", json!("5"))).await;

    let (status, _) = get(&app, "/api/v1/downloads?email=a@b.com&track_id=5").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn purchased_track_missing_from_catalog_is_not_found() {
    let (app, _state) = test_app();
    post_webhook(&app, succeeded_event("pay_1", "a@b.com", json!(99))).await;

    let (status, body) = get(&app, "/api/v1/downloads?email=a@b.com&track_id=99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Track file not found");
}

#[tokio::test]
async fn download_requires_email_and_numeric_track_id() {
    let (app, _state) = test_app();

    for uri in [
        "/api/v1/downloads",
        "/api/v1/downloads?email=a@b.com",
        "/api/v1/downloads?track_id=3",
        "/api/v1/downloads?email=&track_id=3",
    ] {
        let (status, body) = get(&app, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"], "Email and track_id parameters required");
    }

    let (status, body) = get(&app, "/api/v1/downloads?email=a@b.com&track_id=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid track_id");
}

// ------------------------------------------------------------------------
// Webhook edge cases
// ------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_delivery_keeps_single_purchase() {
    let (app, state) = test_app();
    let body = succeeded_event("pay_1", "a@b.com", json!(3));

    let (first, _) = post_webhook(&app, body.clone()).await;
    let (second, _) = post_webhook(&app, body).await;
    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);

    let (_, body) = get(&app, "/api/v1/purchases?email=a@b.com").await;
    assert_eq!(body["count"], 1);
    assert_eq!(
        state.ledger.events.count_for_payment("pay_1").await.unwrap(),
        2,
        "Every delivery is logged"
    );
}

#[tokio::test]
async fn non_succeeded_event_is_acknowledged_but_inert() {
    let (app, state) = test_app();
    let body = json!({
        "event": "payment.canceled",
        "object": { "id": "pay_2", "status": "canceled" }
    })
    .to_string();

    let (status, ack) = post_webhook(&app, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, json!({ "status": "ok", "event": "payment.canceled" }));

    assert!(state.ledger.purchases.find_by_payment_id("pay_2").await.unwrap().is_none());
    let logged = state.ledger.events.list(None, 10, 0).await.unwrap();
    assert_eq!(logged.len(), 1);
    assert!(!logged[0].processed);
}

#[tokio::test]
async fn malformed_body_is_rejected_and_not_logged() {
    let (app, state) = test_app();

    let (status, body) = post_webhook(&app, "{not json".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid JSON body"));

    let (status, _) = post_webhook(&app, "[1, 2, 3]".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(state.ledger.events.list(None, 10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn out_of_range_amount_is_recorded_as_zero() {
    let (app, _state) = test_app();
    let body = json!({
        "event": "payment.succeeded",
        "object": {
            "id": "pay_big",
            "status": "succeeded",
            "amount": { "value": "123456789.00" },
            "metadata": { "email": "a@b.com", "track_id": 3 },
        }
    })
    .to_string();

    let (status, _) = post_webhook(&app, body).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = get(&app, "/api/v1/purchases?email=a@b.com").await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["purchases"][0]["amount"], 0.0);
}

#[tokio::test]
async fn event_without_event_field_is_acknowledged() {
    let (app, _state) = test_app();

    let (status, body) = post_webhook(&app, "{}".to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "event": null }));
}

// ------------------------------------------------------------------------
// Purchase listing
// ------------------------------------------------------------------------

#[tokio::test]
async fn purchases_are_listed_newest_first() {
    let (app, _state) = test_app();
    post_webhook(&app, succeeded_event("pay_1", "a@b.com", json!(1))).await;
    post_webhook(&app, succeeded_event("pay_2", "a@b.com", json!(2))).await;
    post_webhook(&app, succeeded_event("pay_3", "c@d.com", json!(3))).await;

    let (status, body) = get(&app, "/api/v1/purchases?email=a@b.com").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let purchases = body["purchases"].as_array().unwrap();
    assert_eq!(purchases[0]["paymentId"], "pay_2");
    assert_eq!(purchases[1]["paymentId"], "pay_1");
    assert_eq!(purchases[0]["trackId"], 2);
    assert_eq!(purchases[0]["amount"], 2.5);
    assert_eq!(purchases[0]["status"], "succeeded");
    assert!(purchases[0]["paidAt"].is_string());
}

#[tokio::test]
async fn purchases_for_unknown_email_is_empty() {
    let (app, _state) = test_app();

    let (status, body) = get(&app, "/api/v1/purchases?email=nobody@b.com").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "purchases": [], "count": 0 }));
}

#[tokio::test]
async fn purchases_require_email() {
    let (app, _state) = test_app();

    let (status, body) = get(&app, "/api/v1/purchases").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Email parameter required");
}

// ------------------------------------------------------------------------
// Admin endpoints
// ------------------------------------------------------------------------

#[tokio::test]
async fn admin_requires_matching_token() {
    let (app, _state) = test_app();

    let (status, _) = get(&app, "/api/v1/admin/ledger/invariants").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = get_with_headers(
        &app,
        "/api/v1/admin/ledger/invariants",
        &[("x-admin-token", "wrong")],
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_is_hidden_without_configured_token() {
    let (app, _state) = test_app_with(&[("STORAGE_BACKEND", "memory")]);

    let (status, _) = get_with_headers(
        &app,
        "/api/v1/admin/webhook-events",
        &[("x-admin-token", ADMIN_TOKEN)],
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_invariants_report_healthy_ledger() {
    let (app, _state) = test_app();
    post_webhook(&app, succeeded_event("pay_1", "a@b.com", json!(3))).await;

    let (status, body) = get_with_headers(
        &app,
        "/api/v1/admin/ledger/invariants",
        &[("x-admin-token", ADMIN_TOKEN)],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["healthy"], true);
    assert_eq!(body["checks_run"], 3);
    assert_eq!(body["violations"], json!([]));
}

#[tokio::test]
async fn admin_lists_webhook_events_by_processed_flag() {
    let (app, _state) = test_app();
    post_webhook(&app, succeeded_event("pay_1", "a@b.com", json!(3))).await;
    post_webhook(
        &app,
        json!({ "event": "payment.waiting_for_capture", "object": { "id": "pay_2" } }).to_string(),
    )
    .await;

    let headers = [("x-admin-token", ADMIN_TOKEN)];

    let (status, body) = get_with_headers(&app, "/api/v1/admin/webhook-events", &headers).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["events"].as_array().unwrap().len(), 2);
    assert_eq!(body["limit"], 50);

    let (_, body) = get_with_headers(
        &app,
        "/api/v1/admin/webhook-events?processed=false",
        &headers,
    )
    .await;
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["payment_id"], "pay_2");
    assert_eq!(events[0]["event_type"], "payment.waiting_for_capture");
}

// ------------------------------------------------------------------------
// Health
// ------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_storage_backend() {
    let (app, _state) = test_app();

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"], "memory");
}

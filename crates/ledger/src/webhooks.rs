//! Payment webhook reconciliation
//!
//! Turns provider notifications into ledger state. Every delivery is logged;
//! only a `payment.succeeded` envelope whose embedded payment also reports
//! `succeeded` mutates the ledger. The log append, the ledger upsert and the
//! `processed` flag share one transaction.
//!
//! Incomplete metadata never rejects a delivery. Missing fields fall back to
//! placeholder values so the provider stops redelivering a payload that is
//! already durably recorded.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::error::{LedgerError, LedgerResult};
use crate::events::EventLog;
use crate::purchases::{normalize_amount, PaymentConfirmation, PurchaseLedger};
use crate::store::LedgerStore;

/// Provider event type that can create or refresh a purchase
pub const PAYMENT_SUCCEEDED_EVENT: &str = "payment.succeeded";

/// Status the embedded payment object must carry as well
pub const PAYMENT_STATUS_SUCCEEDED: &str = "succeeded";

pub const UNKNOWN_EMAIL: &str = "unknown@email.com";
pub const UNKNOWN_TRACK_ID: i32 = 0;
pub const UNKNOWN_TRACK_FIELD: &str = "Unknown";

/// Parsed webhook body
#[derive(Debug, Clone)]
pub struct WebhookEnvelope {
    pub event_type: Option<String>,
    pub payment_id: Option<String>,
    object: Map<String, Value>,
}

impl WebhookEnvelope {
    /// Parse a raw request body.
    ///
    /// Fails only when the body is not a JSON object. Missing or oddly typed
    /// fields inside it are tolerated.
    pub fn parse(raw: &str) -> LedgerResult<Self> {
        let body: Value = serde_json::from_str(raw)
            .map_err(|e| LedgerError::MalformedPayload(e.to_string()))?;

        let Value::Object(mut fields) = body else {
            return Err(LedgerError::MalformedPayload(
                "webhook body must be a JSON object".to_string(),
            ));
        };

        let event_type = fields.get("event").and_then(value_as_text);
        let object = match fields.remove("object") {
            Some(Value::Object(object)) => object,
            _ => Map::new(),
        };
        let payment_id = object.get("id").and_then(value_as_text);

        Ok(Self {
            event_type,
            payment_id,
            object,
        })
    }

    /// Status reported by the embedded payment object
    pub fn payment_status(&self) -> Option<&str> {
        self.object.get("status").and_then(Value::as_str)
    }

    /// Decide whether this delivery implies a ledger mutation
    pub fn classify(&self) -> Classification {
        if self.event_type.as_deref() != Some(PAYMENT_SUCCEEDED_EVENT) {
            return Classification::Ignored(IgnoreReason::UnhandledEventType);
        }

        // The envelope type alone is not trusted.
        if self.payment_status() != Some(PAYMENT_STATUS_SUCCEEDED) {
            return Classification::Ignored(IgnoreReason::PaymentNotSucceeded {
                status: self.payment_status().map(str::to_owned),
            });
        }

        let Some(payment_id) = self.payment_id.clone() else {
            return Classification::Ignored(IgnoreReason::MissingPaymentId);
        };

        Classification::Succeeded(self.extract_payment(payment_id))
    }

    fn extract_payment(&self, payment_id: String) -> SucceededPayment {
        let metadata = self.object.get("metadata").and_then(Value::as_object);
        let field = |name: &str| metadata.and_then(|m| m.get(name));

        let amount = self
            .object
            .get("amount")
            .and_then(|a| a.get("value"))
            .map(|v| parse_amount(&payment_id, v))
            .unwrap_or(Decimal::ZERO);

        let track_id = field("track_id")
            .map(|v| parse_track_id(&payment_id, v))
            .unwrap_or(UNKNOWN_TRACK_ID);

        SucceededPayment {
            user_email: field("email")
                .and_then(value_as_text)
                .unwrap_or_else(|| UNKNOWN_EMAIL.to_string()),
            track_id,
            track_title: field("track_title")
                .and_then(value_as_text)
                .unwrap_or_else(|| UNKNOWN_TRACK_FIELD.to_string()),
            track_artist: field("track_artist")
                .and_then(value_as_text)
                .unwrap_or_else(|| UNKNOWN_TRACK_FIELD.to_string()),
            amount,
            description: self
                .object
                .get("description")
                .and_then(value_as_text)
                .unwrap_or_default(),
            payment_id,
        }
    }
}

/// Strings pass through; numbers are rendered in their JSON form.
///
/// NUL characters are dropped: Postgres `TEXT` cannot store them.
fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if s.contains('\0') => Some(s.replace('\0', "")),
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Whether a normalized amount fits the `NUMERIC(10, 2)` ledger column
fn is_storable_amount(amount: Decimal) -> bool {
    amount.abs() <= Decimal::new(9_999_999_999, 2)
}

fn parse_amount(payment_id: &str, value: &Value) -> Decimal {
    let parsed = value_as_text(value)
        .and_then(|text| {
            let text = text.trim();
            Decimal::from_str(text)
                .or_else(|_| Decimal::from_scientific(text))
                .ok()
        })
        .map(normalize_amount);

    match parsed {
        Some(amount) if is_storable_amount(amount) => amount,
        Some(_) => {
            tracing::warn!(
                payment_id,
                amount = %value,
                "Payment amount out of range, recording 0"
            );
            Decimal::ZERO
        }
        None => {
            tracing::warn!(
                payment_id,
                amount = %value,
                "Unparseable payment amount, recording 0"
            );
            Decimal::ZERO
        }
    }
}

fn parse_track_id(payment_id: &str, value: &Value) -> i32 {
    let parsed = match value {
        Value::Number(n) => n.as_i64().and_then(|id| i32::try_from(id).ok()),
        Value::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    };

    parsed.unwrap_or_else(|| {
        tracing::warn!(
            payment_id,
            track_id = %value,
            "Unparseable track id in metadata, recording 0"
        );
        UNKNOWN_TRACK_ID
    })
}

/// Fields extracted from a succeeded payment, defaults already applied
#[derive(Debug, Clone, PartialEq)]
pub struct SucceededPayment {
    pub payment_id: String,
    pub user_email: String,
    pub track_id: i32,
    pub track_title: String,
    pub track_artist: String,
    pub amount: Decimal,
    pub description: String,
}

impl SucceededPayment {
    pub fn confirm_at(self, paid_at: OffsetDateTime) -> PaymentConfirmation {
        PaymentConfirmation {
            payment_id: self.payment_id,
            user_email: self.user_email,
            track_id: self.track_id,
            track_title: self.track_title,
            track_artist: self.track_artist,
            amount: self.amount,
            paid_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Succeeded(SucceededPayment),
    Ignored(IgnoreReason),
}

/// Why a delivery was logged without touching the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IgnoreReason {
    UnhandledEventType,
    PaymentNotSucceeded { status: Option<String> },
    /// A succeeded payment without `object.id` has no idempotency key
    MissingPaymentId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Recorded {
        purchase_id: i64,
        /// `false` when this delivery refreshed an existing purchase
        first_delivery: bool,
    },
    Ignored(IgnoreReason),
}

/// Acknowledgement for one delivery
#[derive(Debug, Clone)]
pub struct WebhookAck {
    pub log_entry_id: i64,
    pub event_type: Option<String>,
    pub payment_id: Option<String>,
    pub outcome: DeliveryOutcome,
}

/// Webhook reconciler: the only writer of the event log and the ledger
#[derive(Clone)]
pub struct WebhookHandler {
    store: LedgerStore,
    events: EventLog,
    purchases: PurchaseLedger,
}

impl WebhookHandler {
    pub fn new(store: LedgerStore) -> Self {
        Self {
            events: EventLog::new(store.clone()),
            purchases: PurchaseLedger::new(store.clone()),
            store,
        }
    }

    /// Handle a delivery received now
    pub async fn handle_delivery(&self, raw: &str) -> LedgerResult<WebhookAck> {
        self.handle_delivery_at(raw, OffsetDateTime::now_utc()).await
    }

    /// Handle a delivery with an explicit receipt time, which also becomes
    /// `paid_at` for a succeeded payment.
    pub async fn handle_delivery_at(
        &self,
        raw: &str,
        received_at: OffsetDateTime,
    ) -> LedgerResult<WebhookAck> {
        let envelope = WebhookEnvelope::parse(raw)?;

        let mut tx = self.store.begin().await?;

        let log_entry_id = self
            .events
            .append(
                &mut tx,
                envelope.payment_id.as_deref(),
                envelope.event_type.as_deref(),
                raw,
                received_at,
            )
            .await?;

        let outcome = match envelope.classify() {
            Classification::Succeeded(payment) => {
                let payment_id = payment.payment_id.clone();
                tracing::debug!(
                    payment_id = %payment_id,
                    description = %payment.description,
                    "Recording succeeded payment"
                );

                let upsert = self
                    .purchases
                    .upsert_on_success(&mut tx, &payment.confirm_at(received_at))
                    .await?;
                self.events.mark_processed(&mut tx, &payment_id).await?;

                DeliveryOutcome::Recorded {
                    purchase_id: upsert.purchase_id,
                    first_delivery: upsert.inserted,
                }
            }
            Classification::Ignored(reason) => DeliveryOutcome::Ignored(reason),
        };

        tx.commit().await?;

        match &outcome {
            DeliveryOutcome::Recorded {
                purchase_id,
                first_delivery,
            } => tracing::info!(
                log_entry_id,
                purchase_id,
                first_delivery,
                payment_id = ?envelope.payment_id,
                "Payment webhook applied to ledger"
            ),
            DeliveryOutcome::Ignored(reason) => tracing::info!(
                log_entry_id,
                event_type = ?envelope.event_type,
                payment_id = ?envelope.payment_id,
                reason = ?reason,
                "Payment webhook logged without ledger change"
            ),
        }

        Ok(WebhookAck {
            log_entry_id,
            event_type: envelope.event_type,
            payment_id: envelope.payment_id,
            outcome,
        })
    }
}

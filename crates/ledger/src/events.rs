//! Webhook event log
//!
//! Append-only audit trail of every inbound payment notification, whether or
//! not it was understood or changed the ledger. Redeliveries of the same
//! provider event produce separate rows.

use serde::Serialize;
use time::OffsetDateTime;

use crate::error::LedgerResult;
use crate::store::{LedgerStore, LedgerTx};

/// Stored webhook delivery
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WebhookEventRecord {
    pub id: i64,
    pub payment_id: Option<String>,
    pub event_type: Option<String>,
    /// Request body exactly as received
    pub payload: String,
    pub processed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct EventLog {
    store: LedgerStore,
}

impl EventLog {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    /// Record a delivery with `processed = false` and return its id
    pub async fn append(
        &self,
        tx: &mut LedgerTx,
        payment_id: Option<&str>,
        event_type: Option<&str>,
        payload: &str,
        received_at: OffsetDateTime,
    ) -> LedgerResult<i64> {
        let id = match tx {
            LedgerTx::Postgres(tx) => {
                let (id,): (i64,) = sqlx::query_as(
                    r#"
                    INSERT INTO webhook_logs
                        (payment_id, event_type, payload, processed, created_at)
                    VALUES ($1, $2, $3, FALSE, $4)
                    RETURNING id
                    "#,
                )
                .bind(payment_id)
                .bind(event_type)
                .bind(payload)
                .bind(received_at)
                .fetch_one(&mut **tx)
                .await?;
                id
            }
            LedgerTx::Memory { staged, .. } => {
                let id = staged.next_event_id();
                staged.events.push(WebhookEventRecord {
                    id,
                    payment_id: payment_id.map(str::to_owned),
                    event_type: event_type.map(str::to_owned),
                    payload: payload.to_owned(),
                    processed: false,
                    created_at: received_at,
                });
                id
            }
        };

        tracing::debug!(log_entry_id = id, payment_id = ?payment_id, "Webhook delivery logged");
        Ok(id)
    }

    /// Flag every still-unprocessed delivery for `payment_id` as processed.
    ///
    /// Safe to call repeatedly; returns the number of rows flipped by this call.
    pub async fn mark_processed(&self, tx: &mut LedgerTx, payment_id: &str) -> LedgerResult<u64> {
        let flipped = match tx {
            LedgerTx::Postgres(tx) => sqlx::query(
                r#"
                UPDATE webhook_logs SET processed = TRUE
                WHERE payment_id = $1 AND processed = FALSE
                "#,
            )
            .bind(payment_id)
            .execute(&mut **tx)
            .await?
            .rows_affected(),
            LedgerTx::Memory { staged, .. } => {
                let mut flipped = 0;
                for event in staged
                    .events
                    .iter_mut()
                    .filter(|e| !e.processed && e.payment_id.as_deref() == Some(payment_id))
                {
                    event.processed = true;
                    flipped += 1;
                }
                flipped
            }
        };

        Ok(flipped)
    }

    /// Newest-first page of log entries, optionally filtered by `processed`
    pub async fn list(
        &self,
        processed: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<WebhookEventRecord>> {
        match &self.store {
            LedgerStore::Postgres(pool) => {
                let records = sqlx::query_as(
                    r#"
                    SELECT id, payment_id, event_type, payload, processed, created_at
                    FROM webhook_logs
                    WHERE ($1::BOOLEAN IS NULL OR processed = $1)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $2 OFFSET $3
                    "#,
                )
                .bind(processed)
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await?;
                Ok(records)
            }
            LedgerStore::Memory(tables) => {
                let tables = tables.lock().await;
                let mut records: Vec<WebhookEventRecord> = tables
                    .events
                    .iter()
                    .filter(|e| processed.map_or(true, |p| e.processed == p))
                    .cloned()
                    .collect();
                records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
                Ok(records
                    .into_iter()
                    .skip(offset.max(0) as usize)
                    .take(limit.max(0) as usize)
                    .collect())
            }
        }
    }

    /// Number of deliveries logged for a payment
    pub async fn count_for_payment(&self, payment_id: &str) -> LedgerResult<i64> {
        match &self.store {
            LedgerStore::Postgres(pool) => {
                let (count,): (i64,) =
                    sqlx::query_as("SELECT COUNT(*) FROM webhook_logs WHERE payment_id = $1")
                        .bind(payment_id)
                        .fetch_one(pool)
                        .await?;
                Ok(count)
            }
            LedgerStore::Memory(tables) => {
                let tables = tables.lock().await;
                Ok(tables
                    .events
                    .iter()
                    .filter(|e| e.payment_id.as_deref() == Some(payment_id))
                    .count() as i64)
            }
        }
    }
}

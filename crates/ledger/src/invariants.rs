//! Ledger invariants
//!
//! Runnable, read-only consistency checks over the event log and the purchase
//! ledger. Useful after an incident, a manual data fix or a bulk replay.
//!
//! 1. `paid_at_matches_status`: `paid_at` is set iff `status = 'succeeded'`
//! 2. `purchase_has_webhook_event`: every purchase traces back to a logged delivery
//! 3. `succeeded_event_processed`: a logged `payment.succeeded` delivery whose
//!    payment is in the ledger has been flagged processed

use serde::Serialize;
use time::OffsetDateTime;

use crate::error::LedgerResult;
use crate::purchases::PurchaseStatus;
use crate::store::LedgerStore;
use crate::webhooks::PAYMENT_SUCCEEDED_EVENT;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Payment id(s) affected
    pub payment_ids: Vec<String>,
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViolationSeverity {
    /// Downloads may be granted or refused incorrectly
    Critical,
    High,
    Medium,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize)]
pub struct InvariantCheckSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct PaidAtMismatchRow {
    payment_id: String,
    status: String,
    paid_at: Option<OffsetDateTime>,
}

#[derive(Debug, sqlx::FromRow)]
struct UnloggedPurchaseRow {
    payment_id: String,
    user_email: String,
    track_id: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct UnprocessedEventRow {
    log_entry_id: i64,
    payment_id: String,
}

#[derive(Clone)]
pub struct InvariantChecker {
    store: LedgerStore,
}

impl InvariantChecker {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> LedgerResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_paid_at_matches_status().await?);
        violations.extend(self.check_purchase_has_webhook_event().await?);
        violations.extend(self.check_succeeded_event_processed().await?);

        let checks_run = Self::available_checks().len();
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();

        if !violations.is_empty() {
            tracing::warn!(
                violations = violations.len(),
                checks_failed,
                "Ledger invariant violations found"
            );
        }

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed: checks_run - checks_failed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: `paid_at` is set iff the purchase succeeded
    async fn check_paid_at_matches_status(&self) -> LedgerResult<Vec<InvariantViolation>> {
        let rows: Vec<PaidAtMismatchRow> = match &self.store {
            LedgerStore::Postgres(pool) => {
                sqlx::query_as(
                    r#"
                    SELECT payment_id, status, paid_at
                    FROM purchases
                    WHERE (status = 'succeeded') <> (paid_at IS NOT NULL)
                    "#,
                )
                .fetch_all(pool)
                .await?
            }
            LedgerStore::Memory(tables) => {
                let tables = tables.lock().await;
                tables
                    .purchases
                    .iter()
                    .filter(|p| {
                        (p.status == PurchaseStatus::Succeeded) != p.paid_at.is_some()
                    })
                    .map(|p| PaidAtMismatchRow {
                        payment_id: p.payment_id.clone(),
                        status: p.status.to_string(),
                        paid_at: p.paid_at,
                    })
                    .collect()
            }
        };

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "paid_at_matches_status".to_string(),
                description: format!(
                    "Purchase with status '{}' has paid_at {}",
                    row.status,
                    if row.paid_at.is_some() { "set" } else { "missing" }
                ),
                context: serde_json::json!({
                    "status": row.status,
                    "paid_at": row.paid_at.map(|t| t.unix_timestamp()),
                }),
                payment_ids: vec![row.payment_id],
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: every purchase has at least one logged delivery
    async fn check_purchase_has_webhook_event(&self) -> LedgerResult<Vec<InvariantViolation>> {
        let rows: Vec<UnloggedPurchaseRow> = match &self.store {
            LedgerStore::Postgres(pool) => {
                sqlx::query_as(
                    r#"
                    SELECT p.payment_id, p.user_email, p.track_id
                    FROM purchases p
                    WHERE NOT EXISTS (
                        SELECT 1 FROM webhook_logs w WHERE w.payment_id = p.payment_id
                    )
                    "#,
                )
                .fetch_all(pool)
                .await?
            }
            LedgerStore::Memory(tables) => {
                let tables = tables.lock().await;
                tables
                    .purchases
                    .iter()
                    .filter(|p| {
                        !tables
                            .events
                            .iter()
                            .any(|e| e.payment_id.as_deref() == Some(p.payment_id.as_str()))
                    })
                    .map(|p| UnloggedPurchaseRow {
                        payment_id: p.payment_id.clone(),
                        user_email: p.user_email.clone(),
                        track_id: p.track_id,
                    })
                    .collect()
            }
        };

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "purchase_has_webhook_event".to_string(),
                description: "Purchase has no corresponding webhook delivery".to_string(),
                context: serde_json::json!({
                    "user_email": row.user_email,
                    "track_id": row.track_id,
                }),
                payment_ids: vec![row.payment_id],
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: succeeded deliveries that reached the ledger are flagged processed
    async fn check_succeeded_event_processed(&self) -> LedgerResult<Vec<InvariantViolation>> {
        let rows: Vec<UnprocessedEventRow> = match &self.store {
            LedgerStore::Postgres(pool) => {
                sqlx::query_as(
                    r#"
                    SELECT w.id AS log_entry_id, w.payment_id
                    FROM webhook_logs w
                    JOIN purchases p ON p.payment_id = w.payment_id
                    WHERE w.event_type = $1
                      AND w.processed = FALSE
                      AND p.status = 'succeeded'
                    "#,
                )
                .bind(PAYMENT_SUCCEEDED_EVENT)
                .fetch_all(pool)
                .await?
            }
            LedgerStore::Memory(tables) => {
                let tables = tables.lock().await;
                tables
                    .events
                    .iter()
                    .filter(|e| {
                        !e.processed && e.event_type.as_deref() == Some(PAYMENT_SUCCEEDED_EVENT)
                    })
                    .filter_map(|e| {
                        let payment_id = e.payment_id.as_deref()?;
                        tables
                            .purchases
                            .iter()
                            .any(|p| p.payment_id == payment_id && p.authorizes_download())
                            .then(|| UnprocessedEventRow {
                                log_entry_id: e.id,
                                payment_id: payment_id.to_string(),
                            })
                    })
                    .collect()
            }
        };

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "succeeded_event_processed".to_string(),
                description: format!(
                    "Webhook delivery {} was applied to the ledger but is not marked processed",
                    row.log_entry_id
                ),
                context: serde_json::json!({
                    "log_entry_id": row.log_entry_id,
                }),
                payment_ids: vec![row.payment_id],
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> LedgerResult<Vec<InvariantViolation>> {
        match name {
            "paid_at_matches_status" => self.check_paid_at_matches_status().await,
            "purchase_has_webhook_event" => self.check_purchase_has_webhook_event().await,
            "succeeded_event_processed" => self.check_succeeded_event_processed().await,
            _ => Ok(vec![]),
        }
    }

    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "paid_at_matches_status",
            "purchase_has_webhook_event",
            "succeeded_event_processed",
        ]
    }
}

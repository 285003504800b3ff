//! Purchase ledger
//!
//! Authoritative record of purchase outcomes, one row per provider payment id.
//! The only mutation is [`PurchaseLedger::upsert_on_success`], a single
//! constraint-backed `INSERT ... ON CONFLICT` statement.

use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{LedgerError, LedgerResult};
use crate::store::{LedgerStore, LedgerTx};

/// Lifecycle status of a purchase. Only `Succeeded` authorizes a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseStatus {
    Pending,
    Succeeded,
    Failed,
    Canceled,
}

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::Succeeded => "succeeded",
            PurchaseStatus::Failed => "failed",
            PurchaseStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PurchaseStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PurchaseStatus::Pending),
            "succeeded" => Ok(PurchaseStatus::Succeeded),
            "failed" => Ok(PurchaseStatus::Failed),
            "canceled" => Ok(PurchaseStatus::Canceled),
            other => Err(LedgerError::InvalidStatus(other.to_string())),
        }
    }
}

/// Normalize an amount to the ledger's storage precision.
///
/// The `amount` column is `NUMERIC(10, 2)`, which rounds half away from zero.
/// Applying the same rule before writing keeps both backends identical.
pub fn normalize_amount(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// A ledger row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Purchase {
    pub id: i64,
    pub user_email: String,
    pub track_id: i32,
    pub track_title: String,
    pub track_artist: String,
    pub amount: Decimal,
    pub payment_id: String,
    pub status: PurchaseStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub paid_at: Option<OffsetDateTime>,
}

impl Purchase {
    pub fn authorizes_download(&self) -> bool {
        self.status == PurchaseStatus::Succeeded
    }

    /// Amount as a binary float for JSON consumers.
    ///
    /// Converted from the 2-place stored decimal, so the float is the nearest
    /// `f64` to a value with at most two fractional digits.
    pub fn amount_as_f64(&self) -> f64 {
        normalize_amount(self.amount).to_f64().unwrap_or(0.0)
    }

    /// `"<title> - <artist>.mp3"`
    pub fn download_filename(&self) -> String {
        format!("{} - {}.mp3", self.track_title, self.track_artist)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PurchaseRow {
    id: i64,
    user_email: String,
    track_id: i32,
    track_title: String,
    track_artist: String,
    amount: Decimal,
    payment_id: String,
    status: String,
    created_at: OffsetDateTime,
    paid_at: Option<OffsetDateTime>,
}

impl TryFrom<PurchaseRow> for Purchase {
    type Error = LedgerError;

    fn try_from(row: PurchaseRow) -> Result<Self, Self::Error> {
        Ok(Purchase {
            id: row.id,
            user_email: row.user_email,
            track_id: row.track_id,
            track_title: row.track_title,
            track_artist: row.track_artist,
            amount: row.amount,
            payment_id: row.payment_id,
            status: row.status.parse()?,
            created_at: row.created_at,
            paid_at: row.paid_at,
        })
    }
}

/// Input to [`PurchaseLedger::upsert_on_success`]
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentConfirmation {
    pub payment_id: String,
    pub user_email: String,
    pub track_id: i32,
    pub track_title: String,
    pub track_artist: String,
    pub amount: Decimal,
    pub paid_at: OffsetDateTime,
}

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub purchase_id: i64,
    /// `false` when the payment id already had a row (redelivery)
    pub inserted: bool,
}

const PURCHASE_COLUMNS: &str = "id, user_email, track_id, track_title, track_artist, amount, \
                                payment_id, status, created_at, paid_at";

#[derive(Clone)]
pub struct PurchaseLedger {
    store: LedgerStore,
}

impl PurchaseLedger {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    /// Record a succeeded payment.
    ///
    /// A new payment id inserts a `succeeded` row. An existing one only has
    /// `status` and `paid_at` overwritten; every other column keeps the value
    /// from the first insert.
    pub async fn upsert_on_success(
        &self,
        tx: &mut LedgerTx,
        confirmation: &PaymentConfirmation,
    ) -> LedgerResult<UpsertOutcome> {
        let amount = normalize_amount(confirmation.amount);

        let outcome = match tx {
            LedgerTx::Postgres(tx) => {
                let (purchase_id, inserted): (i64, bool) = sqlx::query_as(
                    r#"
                    INSERT INTO purchases
                        (user_email, track_id, track_title, track_artist, amount,
                         payment_id, status, created_at, paid_at)
                    VALUES ($1, $2, $3, $4, $5, $6, 'succeeded', $7, $7)
                    ON CONFLICT (payment_id) DO UPDATE SET
                        status = 'succeeded',
                        paid_at = EXCLUDED.paid_at
                    RETURNING id, (xmax = 0) AS inserted
                    "#,
                )
                .bind(&confirmation.user_email)
                .bind(confirmation.track_id)
                .bind(&confirmation.track_title)
                .bind(&confirmation.track_artist)
                .bind(amount)
                .bind(&confirmation.payment_id)
                .bind(confirmation.paid_at)
                .fetch_one(&mut **tx)
                .await?;
                UpsertOutcome {
                    purchase_id,
                    inserted,
                }
            }
            LedgerTx::Memory { staged, .. } => {
                if let Some(existing) = staged
                    .purchases
                    .iter_mut()
                    .find(|p| p.payment_id == confirmation.payment_id)
                {
                    existing.status = PurchaseStatus::Succeeded;
                    existing.paid_at = Some(confirmation.paid_at);
                    UpsertOutcome {
                        purchase_id: existing.id,
                        inserted: false,
                    }
                } else {
                    let id = staged.next_purchase_id();
                    staged.purchases.push(Purchase {
                        id,
                        user_email: confirmation.user_email.clone(),
                        track_id: confirmation.track_id,
                        track_title: confirmation.track_title.clone(),
                        track_artist: confirmation.track_artist.clone(),
                        amount,
                        payment_id: confirmation.payment_id.clone(),
                        status: PurchaseStatus::Succeeded,
                        created_at: confirmation.paid_at,
                        paid_at: Some(confirmation.paid_at),
                    });
                    UpsertOutcome {
                        purchase_id: id,
                        inserted: true,
                    }
                }
            }
        };

        Ok(outcome)
    }

    /// Most recently paid succeeded purchase of `track_id` by `user_email`
    pub async fn find_succeeded(
        &self,
        user_email: &str,
        track_id: i32,
    ) -> LedgerResult<Option<Purchase>> {
        match &self.store {
            LedgerStore::Postgres(pool) => {
                let row: Option<PurchaseRow> = sqlx::query_as(&format!(
                    r#"
                    SELECT {PURCHASE_COLUMNS}
                    FROM purchases
                    WHERE user_email = $1 AND track_id = $2 AND status = 'succeeded'
                    ORDER BY paid_at DESC
                    LIMIT 1
                    "#
                ))
                .bind(user_email)
                .bind(track_id)
                .fetch_optional(pool)
                .await?;
                row.map(Purchase::try_from).transpose()
            }
            LedgerStore::Memory(tables) => {
                let tables = tables.lock().await;
                Ok(tables
                    .purchases
                    .iter()
                    .filter(|p| {
                        p.user_email == user_email
                            && p.track_id == track_id
                            && p.authorizes_download()
                    })
                    .max_by_key(|p| p.paid_at)
                    .cloned())
            }
        }
    }

    /// All succeeded purchases for `user_email`, newest `paid_at` first
    pub async fn list_succeeded(&self, user_email: &str) -> LedgerResult<Vec<Purchase>> {
        match &self.store {
            LedgerStore::Postgres(pool) => {
                let rows: Vec<PurchaseRow> = sqlx::query_as(&format!(
                    r#"
                    SELECT {PURCHASE_COLUMNS}
                    FROM purchases
                    WHERE user_email = $1 AND status = 'succeeded'
                    ORDER BY paid_at DESC, id DESC
                    "#
                ))
                .bind(user_email)
                .fetch_all(pool)
                .await?;
                rows.into_iter().map(Purchase::try_from).collect()
            }
            LedgerStore::Memory(tables) => {
                let tables = tables.lock().await;
                let mut purchases: Vec<Purchase> = tables
                    .purchases
                    .iter()
                    .filter(|p| p.user_email == user_email && p.authorizes_download())
                    .cloned()
                    .collect();
                purchases.sort_by(|a, b| b.paid_at.cmp(&a.paid_at).then(b.id.cmp(&a.id)));
                Ok(purchases)
            }
        }
    }

    pub async fn find_by_payment_id(&self, payment_id: &str) -> LedgerResult<Option<Purchase>> {
        match &self.store {
            LedgerStore::Postgres(pool) => {
                let row: Option<PurchaseRow> = sqlx::query_as(&format!(
                    "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE payment_id = $1"
                ))
                .bind(payment_id)
                .fetch_optional(pool)
                .await?;
                row.map(Purchase::try_from).transpose()
            }
            LedgerStore::Memory(tables) => {
                let tables = tables.lock().await;
                Ok(tables
                    .purchases
                    .iter()
                    .find(|p| p.payment_id == payment_id)
                    .cloned())
            }
        }
    }
}

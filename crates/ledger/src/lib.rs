// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Trackshop Purchase Ledger
//!
//! Reconciles payment-provider webhooks into an idempotent purchase ledger and
//! answers download entitlement questions from it.
//!
//! ## Components
//!
//! - **Event Log**: append-only record of every webhook delivery
//! - **Purchase Ledger**: one row per payment id, written by atomic upsert
//! - **Webhook Reconciler**: logs each delivery and applies succeeded payments
//! - **Entitlements**: a track is downloadable iff a succeeded purchase exists
//! - **Invariants**: read-only consistency checks over both tables

pub mod entitlement;
pub mod error;
pub mod events;
pub mod invariants;
pub mod purchases;
pub mod store;
pub mod webhooks;


// Entitlement
pub use entitlement::{Entitlement, EntitlementService};

// Error
pub use error::{LedgerError, LedgerResult};

// Events
pub use events::{EventLog, WebhookEventRecord};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Purchases
pub use purchases::{
    normalize_amount, PaymentConfirmation, Purchase, PurchaseLedger, PurchaseStatus,
    UpsertOutcome,
};

// Store
pub use store::{create_pool, run_migrations, LedgerStore, LedgerTx};

// Webhooks
pub use webhooks::{
    Classification, DeliveryOutcome, IgnoreReason, SucceededPayment, WebhookAck,
    WebhookEnvelope, WebhookHandler, PAYMENT_SUCCEEDED_EVENT,
};

/// Main ledger service that combines all ledger functionality
#[derive(Clone)]
pub struct LedgerService {
    pub store: LedgerStore,
    pub events: EventLog,
    pub purchases: PurchaseLedger,
    pub webhooks: WebhookHandler,
    pub entitlements: EntitlementService,
    pub invariants: InvariantChecker,
}

impl LedgerService {
    pub fn new(store: LedgerStore) -> Self {
        Self {
            events: EventLog::new(store.clone()),
            purchases: PurchaseLedger::new(store.clone()),
            webhooks: WebhookHandler::new(store.clone()),
            entitlements: EntitlementService::new(store.clone()),
            invariants: InvariantChecker::new(store.clone()),
            store,
        }
    }

    /// Ledger backed by process memory, for tests and local development
    pub fn new_in_memory() -> Self {
        Self::new(LedgerStore::new_in_memory())
    }
}

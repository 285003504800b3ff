//! Download entitlements
//!
//! A user may download a track iff the ledger holds a `succeeded` purchase for
//! that email and track id. Nothing else is consulted.

use crate::error::LedgerResult;
use crate::purchases::{Purchase, PurchaseLedger};
use crate::store::LedgerStore;

#[derive(Debug, Clone, PartialEq)]
pub enum Entitlement {
    /// Carries the authorizing purchase for display fields
    Granted(Purchase),
    Denied,
}

impl Entitlement {
    pub fn is_granted(&self) -> bool {
        matches!(self, Entitlement::Granted(_))
    }
}

#[derive(Clone)]
pub struct EntitlementService {
    purchases: PurchaseLedger,
}

impl EntitlementService {
    pub fn new(store: LedgerStore) -> Self {
        Self {
            purchases: PurchaseLedger::new(store),
        }
    }

    pub async fn check(&self, user_email: &str, track_id: i32) -> LedgerResult<Entitlement> {
        let entitlement = match self.purchases.find_succeeded(user_email, track_id).await? {
            Some(purchase) => Entitlement::Granted(purchase),
            None => Entitlement::Denied,
        };
        Ok(entitlement)
    }

    pub async fn is_entitled(&self, user_email: &str, track_id: i32) -> LedgerResult<bool> {
        Ok(self.check(user_email, track_id).await?.is_granted())
    }
}

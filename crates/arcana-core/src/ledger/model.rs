//! Ledger transaction log model.
//!
//! Entries are append-only: they are never mutated or deleted once
//! written. `source_event_id` is present only for credits originating
//! from the payment platform and is the de-duplication key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a balance adjustment happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionReason {
    /// Credit from a verified payment-platform purchase.
    PurchaseCredit,
    /// Reservation for a generation request.
    GenerationSpend,
    /// Compensating credit after a failed generation.
    GenerationRefund,
    /// Operator-issued correction.
    ManualAdjustment,
}

/// One immutable entry in an account's transaction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerTransaction {
    pub account_id: String,
    /// Signed delta applied to the balance.
    pub delta: i64,
    pub reason: TransactionReason,
    /// De-duplication key for payment-platform credits.
    #[serde(default)]
    pub source_event_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LedgerTransaction {
    /// Creates an entry stamped with the current time.
    pub fn new(
        account_id: impl Into<String>,
        delta: i64,
        reason: TransactionReason,
        source_event_id: Option<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            delta,
            reason,
            source_event_id,
            timestamp: Utc::now(),
        }
    }
}

/// Identifies the external purchase event behind an idempotent credit.
///
/// Carried through `LedgerService::adjust` so the store can gate on the
/// event id and record which product granted the credit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditSource {
    pub product_id: String,
    pub event_id: String,
}

impl CreditSource {
    pub fn new(product_id: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            event_id: event_id.into(),
        }
    }
}

//! Entitlement event and idempotency record models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A purchase/entitlement event as delivered by the payment platform.
///
/// The same event can arrive more than once (startup snapshot and live
/// push race, crash before finalization) and arbitrarily late. The
/// `transaction_id` is unique per underlying purchase and is the only
/// thing the idempotency gate trusts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitlementEvent {
    pub product_id: String,
    /// Platform-unique id for this transaction; de-duplication key.
    pub transaction_id: String,
    /// Platform-issued signature over the event. Events that fail
    /// verification are dropped, never applied.
    pub verification_token: String,
    /// True when the platform has revoked this purchase.
    #[serde(default)]
    pub revoked: bool,
}

/// Local record that a unique event was applied.
///
/// One record per unique event ever applied; no two records share a
/// `source_event_id`. The storage layer's unique-key constraint on that
/// field is what makes concurrent duplicate processing safe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntitlementRecord {
    pub product_id: String,
    pub source_event_id: String,
    pub applied_at: DateTime<Utc>,
}

impl EntitlementRecord {
    /// Creates a record stamped with the current time.
    pub fn new(product_id: impl Into<String>, source_event_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            source_event_id: source_event_id.into(),
            applied_at: Utc::now(),
        }
    }
}

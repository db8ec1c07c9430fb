//! Payment platform boundary.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::entitlement::EntitlementEvent;
use crate::error::PaymentError;

/// An abstract payment platform (the vendor store SDK sits behind this).
///
/// The platform is the record of truth for purchases. It exposes the
/// current holdings as a pull query and new transactions as a push
/// stream; every event must be finalized back to the platform once fully
/// processed, otherwise the platform re-delivers it.
#[async_trait]
pub trait PaymentPlatform: Send + Sync {
    /// All unexpired, unrevoked holdings as of now.
    async fn current_entitlements(&self) -> Result<Vec<EntitlementEvent>, PaymentError>;

    /// Subscribes to the push stream of new transaction events. The
    /// stream can terminate transiently; the consumer resubscribes.
    fn subscribe(&self) -> mpsc::Receiver<EntitlementEvent>;

    /// Checks the platform-issued signature on an event.
    fn verify(&self, event: &EntitlementEvent) -> bool;

    /// Tells the platform the transaction is fully processed. Must only
    /// be called after the local credit succeeded (or was already
    /// applied): finalizing first would let a crash drop a paid credit.
    async fn finalize(&self, transaction_id: &str) -> Result<(), PaymentError>;
}

//! Purchase-entitlement reconciler.
//!
//! Converges local entitlements (premium flag, karma credits) onto the
//! payment platform's record of truth. Events arrive from two sources
//! that race and overlap: the startup snapshot of current holdings and
//! the live push stream. Both funnel into [`EntitlementReconciler::process_event`],
//! which is safe to run any number of times per event because the
//! ledger's idempotency gate keys on the platform transaction id.
//!
//! Finalization ordering is the one hard rule here: an event is
//! finalized back to the platform only after the local credit succeeded
//! or proved already-applied. A crash between credit and finalization
//! re-delivers the event, and the gate absorbs the replay.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;

use arcana_core::entitlement::{EntitlementEvent, ProductKind};
use arcana_core::error::LedgerError;
use arcana_core::identity::EconomicCache;
use arcana_core::ledger::{CreditSource, TransactionReason};
use arcana_core::payments::PaymentPlatform;
use arcana_core::store::DocumentStore;

use crate::ledger::LedgerService;

const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(200);

/// Outcome of processing one entitlement event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// A consumable credit was applied to the ledger.
    Credited,
    /// The event had been applied before; nothing changed.
    Duplicate,
    /// The premium flag was set (or cleared, for a revoked event).
    PremiumUpdated,
    /// The event was dropped: failed verification or unknown product.
    Dropped,
    /// A transient failure; the event stays unfinalized for re-delivery.
    Deferred,
}

/// Reconciles platform entitlements into the ledger and premium flag.
pub struct EntitlementReconciler {
    platform: Arc<dyn PaymentPlatform>,
    ledger: Arc<LedgerService>,
    store: Arc<dyn DocumentStore>,
    premium: RwLock<Option<bool>>,
}

impl EntitlementReconciler {
    pub fn new(
        platform: Arc<dyn PaymentPlatform>,
        ledger: Arc<LedgerService>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            platform,
            ledger,
            store,
            premium: RwLock::new(None),
        }
    }

    /// Cached premium flag, read through to the account document.
    pub async fn premium(&self, account_id: &str) -> bool {
        if let Some(premium) = *self.premium.read().await {
            return premium;
        }
        match self.store.account(account_id).await {
            Ok(Some(account)) => {
                *self.premium.write().await = Some(account.premium);
                account.premium
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("premium read failed for '{account_id}': {e}");
                false
            }
        }
    }

    /// Startup reconciliation pass over the platform's current holdings.
    ///
    /// Any event already applied is a harmless duplicate; any event the
    /// push stream dropped (crash before finalization, missed delivery)
    /// is caught up here. When the snapshot holds no active subscription
    /// the premium flag is converged to off.
    pub async fn reconcile_current_holdings(&self, account_id: &str) {
        let events = match self.platform.current_entitlements().await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("entitlement snapshot unavailable: {e}");
                return;
            }
        };

        let mut any_subscription = false;
        for event in &events {
            if !event.revoked
                && ProductKind::classify(&event.product_id) == Some(ProductKind::Subscription)
            {
                any_subscription = true;
            }
            self.process_event(account_id, event).await;
        }

        if !any_subscription {
            self.set_premium(account_id, false).await;
        }
    }

    /// The live listener. Resubscribes whenever the platform stream
    /// terminates; runs until cancelled.
    pub async fn run(&self, account_id: &str, cancel: CancellationToken) {
        loop {
            let mut events = self.platform.subscribe();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = events.recv() => match event {
                        Some(event) => {
                            self.process_event(account_id, &event).await;
                        }
                        None => break,
                    }
                }
            }
            tracing::debug!("entitlement stream ended, resubscribing");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(RESUBSCRIBE_DELAY) => {}
            }
        }
    }

    /// Processes one event end to end: verify, classify, apply, finalize.
    ///
    /// Idempotent per `transaction_id`; safe against replays and races
    /// between the snapshot and the stream.
    pub async fn process_event(&self, account_id: &str, event: &EntitlementEvent) -> EventOutcome {
        if !self.platform.verify(event) {
            tracing::warn!(
                transaction_id = %event.transaction_id,
                "entitlement event failed verification, dropping"
            );
            return EventOutcome::Dropped;
        }

        let Some(kind) = ProductKind::classify(&event.product_id) else {
            tracing::warn!(product_id = %event.product_id, "unknown product, dropping event");
            return EventOutcome::Dropped;
        };

        let outcome = match kind {
            ProductKind::Subscription => {
                // Revocation clears the flag; karma already granted by
                // past consumables is never clawed back.
                if !self.set_premium(account_id, !event.revoked).await {
                    return EventOutcome::Deferred;
                }
                EventOutcome::PremiumUpdated
            }
            ProductKind::Consumable { credit } => {
                if event.revoked {
                    tracing::info!(
                        transaction_id = %event.transaction_id,
                        "revoked consumable, acknowledging without credit"
                    );
                    EventOutcome::Dropped
                } else {
                    let source =
                        CreditSource::new(event.product_id.as_str(), event.transaction_id.as_str());
                    match self
                        .ledger
                        .adjust(account_id, credit, TransactionReason::PurchaseCredit, Some(source))
                        .await
                    {
                        Ok(balance) => {
                            tracing::info!(
                                transaction_id = %event.transaction_id,
                                credit,
                                balance,
                                "purchase credit applied"
                            );
                            EventOutcome::Credited
                        }
                        Err(LedgerError::AlreadyApplied { .. }) => EventOutcome::Duplicate,
                        Err(e) => {
                            tracing::warn!(
                                transaction_id = %event.transaction_id,
                                "credit failed, leaving event for re-delivery: {e}"
                            );
                            return EventOutcome::Deferred;
                        }
                    }
                }
            }
        };

        // Only now is the platform told the event is done. Duplicates are
        // finalized too: the first application already holds the value.
        if let Err(e) = self.platform.finalize(&event.transaction_id).await {
            tracing::warn!(
                transaction_id = %event.transaction_id,
                "finalization failed, platform will re-deliver: {e}"
            );
        }
        outcome
    }

    async fn set_premium(&self, account_id: &str, premium: bool) -> bool {
        match self.store.set_premium(account_id, premium).await {
            Ok(()) => {
                *self.premium.write().await = Some(premium);
                true
            }
            Err(e) => {
                tracing::warn!("premium flag update failed for '{account_id}': {e}");
                false
            }
        }
    }
}

#[async_trait]
impl EconomicCache for EntitlementReconciler {
    async fn invalidate(&self) {
        *self.premium.write().await = None;
    }
}

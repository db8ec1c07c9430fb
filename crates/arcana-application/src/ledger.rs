//! Ledger service.
//!
//! Owns the currency balance and the append-only transaction log.
//! [`LedgerService::adjust`] is the single balance-mutation primitive in
//! the whole system: everything else (reconciler credits, generation
//! spends and refunds, manual corrections) goes through it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use arcana_core::entitlement::EntitlementRecord;
use arcana_core::error::LedgerError;
use arcana_core::identity::EconomicCache;
use arcana_core::ledger::{CreditSource, LedgerTransaction, TransactionReason};
use arcana_core::store::{CreditOutcome, DocumentStore};

/// Balance + transaction-log service for one backing store.
///
/// Concurrency is delegated to the store: `adjust` relies on the store's
/// atomic read-modify-write, so concurrent calls for the same account
/// serialize there and the final balance always equals the sum of the
/// applied deltas. The per-account read cache only ever holds values the
/// store returned and is dropped whole on session loss.
pub struct LedgerService {
    store: Arc<dyn DocumentStore>,
    balances: RwLock<HashMap<String, i64>>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            balances: RwLock::new(HashMap::new()),
        }
    }

    /// Current balance, read through the cache.
    pub async fn balance(&self, account_id: &str) -> Result<i64, LedgerError> {
        if let Some(balance) = self.balances.read().await.get(account_id) {
            return Ok(*balance);
        }
        let balance = self.store.balance(account_id).await?;
        self.cache_balance(account_id, balance).await;
        Ok(balance)
    }

    /// Atomically applies `delta` to the account balance, appending one
    /// transaction to the log in the same store transaction: the balance
    /// and its log entry commit together or not at all.
    ///
    /// # Arguments
    ///
    /// * `delta` - signed amount; spends are negative
    /// * `reason` - why the balance moved
    /// * `source` - present only for payment-platform credits; its event
    ///   id is the idempotency key
    ///
    /// # Errors
    ///
    /// - [`LedgerError::AlreadyApplied`]: the source event was applied
    ///   before; informational, the balance did not change
    /// - [`LedgerError::InsufficientFunds`]: a spend would go below zero;
    ///   the re-check here is authoritative regardless of earlier reads
    /// - [`LedgerError::AccountNotFound`] / [`LedgerError::BackendUnavailable`]:
    ///   nothing was applied and nothing was logged
    pub async fn adjust(
        &self,
        account_id: &str,
        delta: i64,
        reason: TransactionReason,
        source: Option<CreditSource>,
    ) -> Result<i64, LedgerError> {
        let tx = LedgerTransaction::new(
            account_id,
            delta,
            reason,
            source.as_ref().map(|s| s.event_id.clone()),
        );

        let new_balance = match &source {
            Some(src) => {
                let record =
                    EntitlementRecord::new(src.product_id.as_str(), src.event_id.as_str());
                match self.store.apply_credit(&tx, &record).await? {
                    CreditOutcome::Applied { new_balance } => new_balance,
                    CreditOutcome::AlreadyApplied { balance } => {
                        self.drop_cached(account_id).await;
                        return Err(LedgerError::AlreadyApplied { balance });
                    }
                }
            }
            None => {
                // Only spends refuse to cross zero; credit/refund/manual
                // paths clamp at the floor instead.
                let require_funds = reason == TransactionReason::GenerationSpend;
                self.store.adjust_balance(&tx, require_funds).await?
            }
        };

        // Invalidate rather than insert: writing the returned balance
        // here would race a neighbouring adjust that committed later but
        // reached the cache first.
        self.drop_cached(account_id).await;
        Ok(new_balance)
    }

    /// The account's transaction log, oldest first.
    pub async fn transactions(
        &self,
        account_id: &str,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        Ok(self.store.transactions(account_id).await?)
    }

    async fn cache_balance(&self, account_id: &str, balance: i64) {
        let mut balances = self.balances.write().await;
        balances.insert(account_id.to_string(), balance);
    }

    async fn drop_cached(&self, account_id: &str) {
        let mut balances = self.balances.write().await;
        balances.remove(account_id);
    }
}

#[async_trait]
impl EconomicCache for LedgerService {
    async fn invalidate(&self) {
        let mut balances = self.balances.write().await;
        balances.clear();
    }
}

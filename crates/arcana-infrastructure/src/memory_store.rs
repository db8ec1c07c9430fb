//! In-memory document store.
//!
//! Every operation runs under a single async mutex, which gives the two
//! balance primitives the same linearizable-per-account behavior a real
//! backend provides with native transactions. The entitlement set is a
//! map keyed by `source_event_id`; the key acting as a unique constraint
//! is what makes concurrent duplicate credits safe.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use arcana_core::account::Account;
use arcana_core::artifact::{ArtifactStatus, GenerationArtifact};
use arcana_core::entitlement::EntitlementRecord;
use arcana_core::error::StoreError;
use arcana_core::ledger::LedgerTransaction;
use arcana_core::store::{CreditOutcome, DocumentStore, IpAccountKind};

#[derive(Debug, Clone)]
struct IpRegistration {
    ip: String,
    account_id: String,
    kind: &'static str,
}

#[derive(Default)]
struct StoreInner {
    accounts: HashMap<String, Account>,
    /// Per-account transaction logs, oldest first.
    transactions: HashMap<String, Vec<LedgerTransaction>>,
    /// Keyed by source_event_id (the unique constraint).
    entitlements: HashMap<String, EntitlementRecord>,
    artifacts: HashMap<String, GenerationArtifact>,
    ip_registry: Vec<IpRegistration>,
}

/// In-process [`DocumentStore`] implementation.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entitlement records ever applied. Test/inspection aid.
    pub async fn entitlement_count(&self) -> usize {
        self.inner.lock().await.entitlements.len()
    }
}

fn clamped(old: i64, delta: i64) -> i64 {
    (old + delta).max(0)
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.accounts.contains_key(&account.id) {
            return Err(StoreError::unavailable(format!(
                "account document already exists: '{}'",
                account.id
            )));
        }
        inner.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn account(&self, account_id: &str) -> Result<Option<Account>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.accounts.get(account_id).cloned())
    }

    async fn touch_last_seen(
        &self,
        account_id: &str,
        when: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let account = inner
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| StoreError::not_found(account_id))?;
        account.last_seen_at = when;
        Ok(())
    }

    async fn set_premium(&self, account_id: &str, premium: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let account = inner
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| StoreError::not_found(account_id))?;
        account.premium = premium;
        Ok(())
    }

    async fn increment_generations(&self, account_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let account = inner
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| StoreError::not_found(account_id))?;
        account.total_generations += 1;
        Ok(())
    }

    async fn delete_account(&self, account_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.accounts.remove(account_id);
        inner.transactions.remove(account_id);
        inner.artifacts.retain(|_, a| a.account_id != account_id);
        Ok(())
    }

    async fn balance(&self, account_id: &str) -> Result<i64, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .accounts
            .get(account_id)
            .map(|a| a.balance)
            .ok_or_else(|| StoreError::not_found(account_id))
    }

    async fn adjust_balance(
        &self,
        tx: &LedgerTransaction,
        require_funds: bool,
    ) -> Result<i64, StoreError> {
        // Balance mutation and log append commit under the same lock:
        // the log can never disagree with the balance.
        let mut inner = self.inner.lock().await;
        let account = inner
            .accounts
            .get_mut(&tx.account_id)
            .ok_or_else(|| StoreError::not_found(tx.account_id.as_str()))?;
        if require_funds && account.balance + tx.delta < 0 {
            return Err(StoreError::InsufficientFunds {
                balance: account.balance,
            });
        }
        account.balance = clamped(account.balance, tx.delta);
        let new_balance = account.balance;
        inner
            .transactions
            .entry(tx.account_id.clone())
            .or_default()
            .push(tx.clone());
        Ok(new_balance)
    }

    async fn apply_credit(
        &self,
        tx: &LedgerTransaction,
        record: &EntitlementRecord,
    ) -> Result<CreditOutcome, StoreError> {
        // Gate, credit, record insert and log append all happen under the
        // same lock, so a duplicate event can never be half-applied.
        let mut inner = self.inner.lock().await;
        if inner.entitlements.contains_key(&record.source_event_id) {
            let balance = inner
                .accounts
                .get(&tx.account_id)
                .map(|a| a.balance)
                .ok_or_else(|| StoreError::not_found(tx.account_id.as_str()))?;
            return Ok(CreditOutcome::AlreadyApplied { balance });
        }
        let account = inner
            .accounts
            .get_mut(&tx.account_id)
            .ok_or_else(|| StoreError::not_found(tx.account_id.as_str()))?;
        account.balance = clamped(account.balance, tx.delta);
        let new_balance = account.balance;
        inner
            .entitlements
            .insert(record.source_event_id.clone(), record.clone());
        inner
            .transactions
            .entry(tx.account_id.clone())
            .or_default()
            .push(tx.clone());
        Ok(CreditOutcome::Applied { new_balance })
    }

    async fn transactions(&self, account_id: &str) -> Result<Vec<LedgerTransaction>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.transactions.get(account_id).cloned().unwrap_or_default())
    }

    async fn record_entitlement(&self, record: &EntitlementRecord) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.entitlements.contains_key(&record.source_event_id) {
            return Ok(false);
        }
        inner
            .entitlements
            .insert(record.source_event_id.clone(), record.clone());
        Ok(true)
    }

    async fn has_entitlement(&self, source_event_id: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.entitlements.contains_key(source_event_id))
    }

    async fn save_artifact(&self, artifact: &GenerationArtifact) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .artifacts
            .insert(artifact.id.clone(), artifact.clone());
        Ok(())
    }

    async fn update_artifact_status(
        &self,
        artifact_id: &str,
        status: ArtifactStatus,
        result_text: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let artifact = inner
            .artifacts
            .get_mut(artifact_id)
            .ok_or_else(|| StoreError::not_found(artifact_id))?;
        artifact.status = status;
        if result_text.is_some() {
            artifact.result_text = result_text;
        }
        Ok(())
    }

    async fn artifacts(&self, account_id: &str) -> Result<Vec<GenerationArtifact>, StoreError> {
        let inner = self.inner.lock().await;
        let mut list: Vec<_> = inner
            .artifacts
            .values()
            .filter(|a| a.account_id == account_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn pending_artifacts_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<GenerationArtifact>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .artifacts
            .values()
            .filter(|a| a.status == ArtifactStatus::Pending && a.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn is_ip_used(&self, ip: &str, kind: IpAccountKind) -> Result<bool, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .ip_registry
            .iter()
            .any(|r| r.ip == ip && r.kind == kind.as_str()))
    }

    async fn register_ip(
        &self,
        ip: &str,
        account_id: &str,
        kind: IpAccountKind,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.ip_registry.push(IpRegistration {
            ip: ip.to_string(),
            account_id: account_id.to_string(),
            kind: kind.as_str(),
        });
        Ok(())
    }

    async fn unregister_ips_for(&self, account_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.ip_registry.retain(|r| r.account_id != account_id);
        Ok(())
    }
}

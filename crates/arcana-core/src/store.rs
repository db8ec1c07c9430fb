//! Document store boundary.
//!
//! Abstracts the remote per-account document store, decoupling the
//! services from the specific backend. The two balance primitives are the
//! only place the backend's native transaction/compare-and-swap support is
//! required: multiple processes and devices can act on the same account,
//! so a client-side lock is not enough.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::account::Account;
use crate::artifact::{ArtifactStatus, GenerationArtifact};
use crate::entitlement::EntitlementRecord;
use crate::error::StoreError;
use crate::ledger::LedgerTransaction;

/// Result of an idempotency-gated credit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditOutcome {
    /// The credit was applied; the balance is the new balance.
    Applied { new_balance: i64 },
    /// The event id was already recorded; the balance is unchanged.
    AlreadyApplied { balance: i64 },
}

/// Account type recorded in the IP registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpAccountKind {
    Registered,
    Guest,
}

impl IpAccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Guest => "guest",
        }
    }
}

/// An abstract per-account document store.
///
/// # Implementation Notes
///
/// Implementations must make `adjust_balance` and `apply_credit`
/// linearizable per account: concurrent calls serialize such that the
/// final balance equals the sum of all applied deltas, never a lost
/// update. Both primitives append the ledger transaction inside the same
/// transaction as the balance mutation: either the balance moves and its
/// log entry exists, or neither does. `apply_credit` additionally checks
/// the entitlement-record set and inserts the record under that same
/// transaction, so a crash cannot split the gate from the credit.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // ------------------------------------------------------------------
    // Account documents
    // ------------------------------------------------------------------

    /// Creates the account document. Fails if one already exists.
    async fn create_account(&self, account: &Account) -> Result<(), StoreError>;

    /// Reads the account document by id.
    async fn account(&self, account_id: &str) -> Result<Option<Account>, StoreError>;

    /// Touches `last_seen_at` on an existing document.
    async fn touch_last_seen(
        &self,
        account_id: &str,
        when: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Sets the premium entitlement flag.
    async fn set_premium(&self, account_id: &str, premium: bool) -> Result<(), StoreError>;

    /// Increments the completed-generation counter.
    async fn increment_generations(&self, account_id: &str) -> Result<(), StoreError>;

    /// Hard-deletes the account document and its sub-collections. Only the
    /// explicit account-deletion flow calls this.
    async fn delete_account(&self, account_id: &str) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Balance (the only contended resource)
    // ------------------------------------------------------------------

    /// Current balance of the account.
    async fn balance(&self, account_id: &str) -> Result<i64, StoreError>;

    /// Atomically applies `tx.delta` to the balance of `tx.account_id`,
    /// appends `tx` to the log, and returns the new balance. The mutation
    /// and the append commit together or not at all.
    ///
    /// With `require_funds` the mutation fails with
    /// [`StoreError::InsufficientFunds`] instead of going below zero;
    /// without it the result is clamped at a floor of 0.
    async fn adjust_balance(
        &self,
        tx: &LedgerTransaction,
        require_funds: bool,
    ) -> Result<i64, StoreError>;

    /// Atomically: if `record.source_event_id` is unknown, credit
    /// `tx.delta` (clamped at 0), insert the record and append `tx` to
    /// the log; otherwise change nothing.
    async fn apply_credit(
        &self,
        tx: &LedgerTransaction,
        record: &EntitlementRecord,
    ) -> Result<CreditOutcome, StoreError>;

    // ------------------------------------------------------------------
    // Transaction log (append-only; written by the balance primitives)
    // ------------------------------------------------------------------

    /// Returns the account's transaction log, oldest first.
    async fn transactions(&self, account_id: &str) -> Result<Vec<LedgerTransaction>, StoreError>;

    // ------------------------------------------------------------------
    // Entitlement records (append-only, keyed by source_event_id)
    // ------------------------------------------------------------------

    /// Inserts the record unless its `source_event_id` is already present.
    /// Returns `true` when inserted, `false` on a duplicate.
    async fn record_entitlement(&self, record: &EntitlementRecord) -> Result<bool, StoreError>;

    /// Whether an event id has already been applied.
    async fn has_entitlement(&self, source_event_id: &str) -> Result<bool, StoreError>;

    // ------------------------------------------------------------------
    // Generation artifacts
    // ------------------------------------------------------------------

    /// Persists a new artifact.
    async fn save_artifact(&self, artifact: &GenerationArtifact) -> Result<(), StoreError>;

    /// Transitions an artifact's status, setting the result text when
    /// completing.
    async fn update_artifact_status(
        &self,
        artifact_id: &str,
        status: ArtifactStatus,
        result_text: Option<String>,
    ) -> Result<(), StoreError>;

    /// The account's artifacts, newest first.
    async fn artifacts(&self, account_id: &str) -> Result<Vec<GenerationArtifact>, StoreError>;

    /// Artifacts still `Pending` that were created before `cutoff`.
    /// Consumed by the background sweep.
    async fn pending_artifacts_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<GenerationArtifact>, StoreError>;

    // ------------------------------------------------------------------
    // IP registry (best-effort anti-abuse, outside the ledger invariants)
    // ------------------------------------------------------------------

    /// Whether an IP already created an account of this kind.
    async fn is_ip_used(&self, ip: &str, kind: IpAccountKind) -> Result<bool, StoreError>;

    /// Records an IP against an account.
    async fn register_ip(
        &self,
        ip: &str,
        account_id: &str,
        kind: IpAccountKind,
    ) -> Result<(), StoreError>;

    /// Removes every IP registration for an account.
    async fn unregister_ips_for(&self, account_id: &str) -> Result<(), StoreError>;
}

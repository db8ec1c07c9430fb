//! Generation pipeline.
//!
//! Drives a paid reading end to end: reserve the karma, persist a
//! pending artifact, call the generation API, then complete the artifact
//! or compensate. The reserve happens before the external call so a
//! crash can never produce an unpaid reading; the compensating refund
//! makes the failure path net-zero for the seeker.
//!
//! Two deliberate asymmetries:
//! - a 401 from the API leaves the artifact pending and refunds nothing,
//!   because the session teardown it triggers makes local writes
//!   untrustworthy; the background sweep settles it later.
//! - a refund that fails after one retry is recorded as a reconciliation
//!   debt instead of being retried forever, so the caller gets a bounded
//!   answer and repair can happen out of band.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use arcana_core::account::Account;
use arcana_core::artifact::{ArtifactStatus, GenerationArtifact};
use arcana_core::error::{ApiError, GenerationError, LedgerError};
use arcana_core::generation::GenerationClient;
use arcana_core::ledger::TransactionReason;
use arcana_core::store::DocumentStore;

use crate::ledger::LedgerService;
use crate::prompt::{self, ReadingInput};

/// A refund the pipeline could not deliver.
///
/// Recorded when the compensating refund failed after its retry; the
/// seeker paid for a reading they did not get. Settled out of band.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationDebt {
    pub account_id: String,
    pub artifact_id: String,
    pub amount: i64,
    pub recorded_at: DateTime<Utc>,
}

/// Orchestrates paid readings against the ledger and the generation API.
pub struct GenerationPipeline {
    ledger: Arc<LedgerService>,
    store: Arc<dyn DocumentStore>,
    client: Arc<dyn GenerationClient>,
    model: String,
    debts: Mutex<Vec<ReconciliationDebt>>,
}

impl GenerationPipeline {
    pub fn new(
        ledger: Arc<LedgerService>,
        store: Arc<dyn DocumentStore>,
        client: Arc<dyn GenerationClient>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            store,
            client,
            model: model.into(),
            debts: Mutex::new(Vec::new()),
        }
    }

    /// Runs one paid reading.
    ///
    /// Sequence: sufficiency pre-check, atomic reserve, pending artifact,
    /// API call, completion. Any failure after the reserve (except a 401)
    /// marks the artifact failed and refunds the reservation.
    ///
    /// # Errors
    ///
    /// - [`GenerationError::InsufficientFunds`]: nothing was created and
    ///   no funds moved
    /// - [`GenerationError::GenerationFailed`]: the reading failed; the
    ///   reservation was refunded (or, on a 401, left for the sweep)
    /// - [`GenerationError::RefundFailed`]: the reading failed and so did
    ///   the refund; a [`ReconciliationDebt`] was recorded
    pub async fn generate_reading(
        &self,
        account: &Account,
        input: ReadingInput,
    ) -> Result<GenerationArtifact, GenerationError> {
        let kind = input.kind();
        let cost = kind.karma_cost();

        // Cheap pre-check for a friendly early refusal. The reserve below
        // re-checks authoritatively; this read can be stale.
        let balance = self
            .ledger
            .balance(&account.id)
            .await
            .map_err(GenerationError::failed)?;
        if balance < cost {
            return Err(GenerationError::InsufficientFunds { balance, cost });
        }

        match self
            .ledger
            .adjust(&account.id, -cost, TransactionReason::GenerationSpend, None)
            .await
        {
            Ok(_) => {}
            Err(LedgerError::InsufficientFunds { balance }) => {
                return Err(GenerationError::InsufficientFunds { balance, cost });
            }
            Err(e) => return Err(GenerationError::failed(e)),
        }

        let mut artifact =
            GenerationArtifact::pending(account.id.as_str(), kind, cost, input.input_refs());
        if let Err(e) = self.store.save_artifact(&artifact).await {
            tracing::warn!("pending artifact persist failed: {e}");
            self.refund(&account.id, &artifact.id, cost).await?;
            return Err(GenerationError::failed(e));
        }

        let request = prompt::build_request(&self.model, account, &input);
        let response = match self.client.generate(&request).await {
            Ok(response) => response,
            Err(ApiError::Unauthorized) => {
                // Session is being torn down; the artifact stays pending
                // and the sweep settles it once a session exists again.
                tracing::warn!(
                    artifact_id = %artifact.id,
                    "generation rejected as unauthorized, leaving artifact pending"
                );
                return Err(GenerationError::failed(ApiError::Unauthorized));
            }
            Err(e) => {
                tracing::warn!(artifact_id = %artifact.id, "generation call failed: {e}");
                self.fail_artifact(&artifact.id).await;
                self.refund(&account.id, &artifact.id, cost).await?;
                return Err(e.into());
            }
        };

        if let Err(e) = self
            .store
            .update_artifact_status(
                &artifact.id,
                ArtifactStatus::Completed,
                Some(response.result_text.clone()),
            )
            .await
        {
            tracing::warn!(artifact_id = %artifact.id, "completion persist failed: {e}");
            self.fail_artifact(&artifact.id).await;
            self.refund(&account.id, &artifact.id, cost).await?;
            return Err(GenerationError::failed(e));
        }

        if let Err(e) = self.store.increment_generations(&account.id).await {
            tracing::warn!("generation counter update failed: {e}");
        }

        artifact.status = ArtifactStatus::Completed;
        artifact.result_text = Some(response.result_text);
        tracing::info!(
            artifact_id = %artifact.id,
            kind = kind.title(),
            cost,
            "reading completed"
        );
        Ok(artifact)
    }

    /// The account's reading history, newest first.
    pub async fn history(
        &self,
        account_id: &str,
    ) -> Result<Vec<GenerationArtifact>, GenerationError> {
        self.store
            .artifacts(account_id)
            .await
            .map_err(GenerationError::failed)
    }

    /// Settles artifacts stuck in `Pending` for longer than `max_age`:
    /// marks them failed and refunds their reservation. Returns the
    /// number settled.
    pub async fn sweep_pending(&self, max_age: ChronoDuration) -> usize {
        let cutoff = Utc::now() - max_age;
        let stale = match self.store.pending_artifacts_before(cutoff).await {
            Ok(stale) => stale,
            Err(e) => {
                tracing::warn!("pending-artifact sweep query failed: {e}");
                return 0;
            }
        };

        let mut settled = 0;
        for artifact in stale {
            self.fail_artifact(&artifact.id).await;
            match self
                .refund(&artifact.account_id, &artifact.id, artifact.karma_cost)
                .await
            {
                Ok(()) => settled += 1,
                Err(e) => {
                    tracing::warn!(artifact_id = %artifact.id, "sweep refund failed: {e}");
                }
            }
        }
        settled
    }

    /// Debts recorded by failed refunds, oldest first.
    pub async fn outstanding_debts(&self) -> Vec<ReconciliationDebt> {
        self.debts.lock().await.clone()
    }

    async fn fail_artifact(&self, artifact_id: &str) {
        if let Err(e) = self
            .store
            .update_artifact_status(artifact_id, ArtifactStatus::Failed, None)
            .await
        {
            tracing::warn!(artifact_id, "artifact failure persist failed: {e}");
        }
    }

    /// Compensating refund, retried once. A second failure records a
    /// debt and surfaces [`GenerationError::RefundFailed`].
    async fn refund(
        &self,
        account_id: &str,
        artifact_id: &str,
        amount: i64,
    ) -> Result<(), GenerationError> {
        for attempt in 0..2 {
            match self
                .ledger
                .adjust(account_id, amount, TransactionReason::GenerationRefund, None)
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) => {
                    tracing::warn!(attempt, "refund of {amount} failed: {e}");
                }
            }
        }

        self.debts.lock().await.push(ReconciliationDebt {
            account_id: account_id.to_string(),
            artifact_id: artifact_id.to_string(),
            amount,
            recorded_at: Utc::now(),
        });
        Err(GenerationError::RefundFailed {
            account_id: account_id.to_string(),
            amount,
        })
    }
}

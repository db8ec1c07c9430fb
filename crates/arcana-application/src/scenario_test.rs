//! End-to-end service tests over in-memory fakes.
//!
//! Each fake scripts one boundary: the identity provider, the payment
//! platform, the generation API, and a store wrapper that can be told to
//! start failing balance mutations.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;

use arcana_core::account::Account;
use arcana_core::artifact::{ArtifactStatus, GenerationArtifact};
use arcana_core::entitlement::{EntitlementEvent, EntitlementRecord};
use arcana_core::error::{ApiError, AuthError, GenerationError, StoreError};
use arcana_core::generation::{GenerationClient, GenerationRequest, GenerationResponse};
use arcana_core::identity::{DuplicateAccountGuard, IdentityProvider};
use arcana_core::ledger::{LedgerTransaction, TransactionReason};
use arcana_core::payments::PaymentPlatform;
use arcana_core::session::{AuthUser, Credential};
use arcana_core::store::{CreditOutcome, DocumentStore, IpAccountKind};
use arcana_infrastructure::memory_store::InMemoryDocumentStore;

use crate::identity::IdentitySessionManager;
use crate::ledger::LedgerService;
use crate::pipeline::GenerationPipeline;
use crate::prompt::ReadingInput;
use crate::reconciler::{EntitlementReconciler, EventOutcome};

const VALID_TOKEN: &str = "sig-ok";

// ----------------------------------------------------------------------
// Fakes
// ----------------------------------------------------------------------

struct FakeIdentityProvider {
    current: Mutex<Option<AuthUser>>,
    changes: broadcast::Sender<Option<AuthUser>>,
    next_id: AtomicU32,
}

impl FakeIdentityProvider {
    fn new() -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            current: Mutex::new(None),
            changes,
            next_id: AtomicU32::new(1),
        }
    }

    /// Announces a session change without going through `sign_in`, the
    /// way a restored or remotely revoked provider session arrives.
    async fn push_session(&self, user: Option<AuthUser>) {
        *self.current.lock().await = user.clone();
        let _ = self.changes.send(user);
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn sign_in(&self, credential: Credential) -> Result<AuthUser, AuthError> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let user = match credential {
            Credential::Guest { .. } => AuthUser {
                id: format!("guest-{n}"),
                email: None,
                display_name: None,
                anonymous: true,
            },
            Credential::EmailPassword { email, .. } | Credential::Register { email, .. } => {
                AuthUser {
                    id: format!("user-{n}"),
                    email: Some(email),
                    display_name: None,
                    anonymous: false,
                }
            }
        };
        *self.current.lock().await = Some(user.clone());
        let _ = self.changes.send(Some(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        *self.current.lock().await = None;
        let _ = self.changes.send(None);
        Ok(())
    }

    async fn current_user(&self) -> Option<AuthUser> {
        self.current.lock().await.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<Option<AuthUser>> {
        self.changes.subscribe()
    }

    async fn id_token(&self) -> Option<String> {
        self.current.lock().await.as_ref().map(|u| format!("token-{}", u.id))
    }

    async fn delete_account(&self) -> Result<(), AuthError> {
        self.sign_out().await
    }
}

struct FakePaymentPlatform {
    snapshot: Mutex<Vec<EntitlementEvent>>,
    finalized: Mutex<Vec<String>>,
    stream: StdMutex<Option<mpsc::Sender<EntitlementEvent>>>,
}

impl FakePaymentPlatform {
    fn new(snapshot: Vec<EntitlementEvent>) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            finalized: Mutex::new(Vec::new()),
            stream: StdMutex::new(None),
        }
    }

    async fn finalized(&self) -> Vec<String> {
        self.finalized.lock().await.clone()
    }

    /// Delivers an event on the live stream, if anyone is subscribed.
    async fn push(&self, event: EntitlementEvent) {
        let sender = self.stream.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    /// Terminates the live stream, as the platform does on app background.
    fn end_stream(&self) {
        self.stream.lock().unwrap().take();
    }

    fn has_subscriber(&self) -> bool {
        self.stream
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|s| !s.is_closed())
    }
}

#[async_trait]
impl PaymentPlatform for FakePaymentPlatform {
    async fn current_entitlements(&self) -> Result<Vec<EntitlementEvent>, arcana_core::error::PaymentError> {
        Ok(self.snapshot.lock().await.clone())
    }

    fn subscribe(&self) -> mpsc::Receiver<EntitlementEvent> {
        let (tx, rx) = mpsc::channel(16);
        *self.stream.lock().unwrap() = Some(tx);
        rx
    }

    fn verify(&self, event: &EntitlementEvent) -> bool {
        event.verification_token == VALID_TOKEN
    }

    async fn finalize(&self, transaction_id: &str) -> Result<(), arcana_core::error::PaymentError> {
        self.finalized.lock().await.push(transaction_id.to_string());
        Ok(())
    }
}

struct ScriptedClient {
    responses: Mutex<VecDeque<Result<GenerationResponse, ApiError>>>,
}

impl ScriptedClient {
    fn new(responses: Vec<Result<GenerationResponse, ApiError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
        }
    }

    fn ok(text: &str) -> Result<GenerationResponse, ApiError> {
        Ok(GenerationResponse {
            result_text: text.to_string(),
        })
    }
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationResponse, ApiError> {
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or(Err(ApiError::Network("unscripted call".to_string())))
    }
}

/// Which balance mutations a [`FlakyStore`] rejects, counted across
/// `adjust_balance` and `apply_credit` together, starting at 1.
enum FailurePlan {
    /// Every call from the n-th onwards fails (backend gone for good).
    FromCall(u32),
    /// Only the n-th call fails (one transient drop).
    OnlyCall(u32),
}

/// Store wrapper that fails selected balance mutations, simulating
/// backend loss between a spend and its refund.
struct FlakyStore {
    inner: InMemoryDocumentStore,
    plan: FailurePlan,
    calls: AtomicU32,
}

impl FlakyStore {
    fn failing_from(call: u32) -> Self {
        Self {
            inner: InMemoryDocumentStore::new(),
            plan: FailurePlan::FromCall(call),
            calls: AtomicU32::new(0),
        }
    }

    fn failing_only(call: u32) -> Self {
        Self {
            inner: InMemoryDocumentStore::new(),
            plan: FailurePlan::OnlyCall(call),
            calls: AtomicU32::new(0),
        }
    }

    fn next_call_fails(&self) -> bool {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.plan {
            FailurePlan::FromCall(n) => call >= n,
            FailurePlan::OnlyCall(n) => call == n,
        }
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn create_account(&self, account: &Account) -> Result<(), StoreError> {
        self.inner.create_account(account).await
    }
    async fn account(&self, account_id: &str) -> Result<Option<Account>, StoreError> {
        self.inner.account(account_id).await
    }
    async fn touch_last_seen(
        &self,
        account_id: &str,
        when: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.touch_last_seen(account_id, when).await
    }
    async fn set_premium(&self, account_id: &str, premium: bool) -> Result<(), StoreError> {
        self.inner.set_premium(account_id, premium).await
    }
    async fn increment_generations(&self, account_id: &str) -> Result<(), StoreError> {
        self.inner.increment_generations(account_id).await
    }
    async fn delete_account(&self, account_id: &str) -> Result<(), StoreError> {
        self.inner.delete_account(account_id).await
    }
    async fn balance(&self, account_id: &str) -> Result<i64, StoreError> {
        self.inner.balance(account_id).await
    }
    async fn adjust_balance(
        &self,
        tx: &LedgerTransaction,
        require_funds: bool,
    ) -> Result<i64, StoreError> {
        if self.next_call_fails() {
            return Err(StoreError::unavailable("backend gone"));
        }
        self.inner.adjust_balance(tx, require_funds).await
    }
    async fn apply_credit(
        &self,
        tx: &LedgerTransaction,
        record: &EntitlementRecord,
    ) -> Result<CreditOutcome, StoreError> {
        if self.next_call_fails() {
            return Err(StoreError::unavailable("backend gone"));
        }
        self.inner.apply_credit(tx, record).await
    }
    async fn transactions(&self, account_id: &str) -> Result<Vec<LedgerTransaction>, StoreError> {
        self.inner.transactions(account_id).await
    }
    async fn record_entitlement(&self, record: &EntitlementRecord) -> Result<bool, StoreError> {
        self.inner.record_entitlement(record).await
    }
    async fn has_entitlement(&self, source_event_id: &str) -> Result<bool, StoreError> {
        self.inner.has_entitlement(source_event_id).await
    }
    async fn save_artifact(&self, artifact: &GenerationArtifact) -> Result<(), StoreError> {
        self.inner.save_artifact(artifact).await
    }
    async fn update_artifact_status(
        &self,
        artifact_id: &str,
        status: ArtifactStatus,
        result_text: Option<String>,
    ) -> Result<(), StoreError> {
        self.inner.update_artifact_status(artifact_id, status, result_text).await
    }
    async fn artifacts(&self, account_id: &str) -> Result<Vec<GenerationArtifact>, StoreError> {
        self.inner.artifacts(account_id).await
    }
    async fn pending_artifacts_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<GenerationArtifact>, StoreError> {
        self.inner.pending_artifacts_before(cutoff).await
    }
    async fn is_ip_used(&self, ip: &str, kind: IpAccountKind) -> Result<bool, StoreError> {
        self.inner.is_ip_used(ip, kind).await
    }
    async fn register_ip(
        &self,
        ip: &str,
        account_id: &str,
        kind: IpAccountKind,
    ) -> Result<(), StoreError> {
        self.inner.register_ip(ip, account_id, kind).await
    }
    async fn unregister_ips_for(&self, account_id: &str) -> Result<(), StoreError> {
        self.inner.unregister_ips_for(account_id).await
    }
}

struct StaticGuard {
    duplicate: bool,
    registered: Mutex<Vec<String>>,
}

#[async_trait]
impl DuplicateAccountGuard for StaticGuard {
    async fn is_duplicate(&self, _kind: IpAccountKind) -> bool {
        self.duplicate
    }
    async fn register(&self, account_id: &str, _kind: IpAccountKind) {
        self.registered.lock().await.push(account_id.to_string());
    }
    async fn unregister(&self, account_id: &str) {
        self.registered.lock().await.retain(|id| id != account_id);
    }
}

// ----------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------

fn consumable_event(transaction_id: &str) -> EntitlementEvent {
    EntitlementEvent {
        product_id: "com.arcana.karma.100".to_string(),
        transaction_id: transaction_id.to_string(),
        verification_token: VALID_TOKEN.to_string(),
        revoked: false,
    }
}

fn subscription_event(transaction_id: &str) -> EntitlementEvent {
    EntitlementEvent {
        product_id: "com.arcana.premium.monthly".to_string(),
        transaction_id: transaction_id.to_string(),
        verification_token: VALID_TOKEN.to_string(),
        revoked: false,
    }
}

async fn seeded_store(balance: i64) -> Arc<InMemoryDocumentStore> {
    let store = Arc::new(InMemoryDocumentStore::new());
    let mut account = Account::with_defaults("acct-1", "Luna");
    account.balance = balance;
    store.create_account(&account).await.unwrap();
    store
}

async fn account(store: &dyn DocumentStore) -> Account {
    store.account("acct-1").await.unwrap().unwrap()
}

/// Polls until the condition holds, for tests driving background tasks.
async fn wait_for<F, Fut>(cond: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if cond().await {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

// ----------------------------------------------------------------------
// Entitlement reconciliation
// ----------------------------------------------------------------------

#[tokio::test]
async fn startup_snapshot_catches_up_missed_purchases() {
    let store = seeded_store(10).await;
    let ledger = Arc::new(LedgerService::new(store.clone()));
    let platform = Arc::new(FakePaymentPlatform::new(vec![
        consumable_event("txn-a"),
        subscription_event("txn-b"),
    ]));
    let reconciler = EntitlementReconciler::new(platform.clone(), ledger.clone(), store.clone());

    reconciler.reconcile_current_holdings("acct-1").await;

    assert_eq!(ledger.balance("acct-1").await.unwrap(), 110);
    assert!(account(store.as_ref()).await.premium);
    assert_eq!(platform.finalized().await, vec!["txn-a", "txn-b"]);

    // Running the whole pass again converges to the same state.
    reconciler.reconcile_current_holdings("acct-1").await;
    assert_eq!(ledger.balance("acct-1").await.unwrap(), 110);
    assert_eq!(ledger.transactions("acct-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn snapshot_and_stream_racing_on_one_event_credit_once() {
    let store = seeded_store(0).await;
    let ledger = Arc::new(LedgerService::new(store.clone()));
    let platform = Arc::new(FakePaymentPlatform::new(vec![]));
    let reconciler = Arc::new(EntitlementReconciler::new(
        platform.clone(),
        ledger.clone(),
        store.clone(),
    ));

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let reconciler = reconciler.clone();
            tokio::spawn(async move {
                reconciler.process_event("acct-1", &consumable_event("txn-race")).await
            })
        })
        .collect();

    let outcomes = futures::future::join_all(tasks).await;
    let credited = outcomes
        .into_iter()
        .filter(|o| *o.as_ref().unwrap() == EventOutcome::Credited)
        .count();
    assert_eq!(credited, 1);
    assert_eq!(ledger.balance("acct-1").await.unwrap(), 100);
    assert_eq!(ledger.transactions("acct-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn redelivered_event_is_a_harmless_duplicate() {
    let store = seeded_store(0).await;
    let ledger = Arc::new(LedgerService::new(store.clone()));
    let platform = Arc::new(FakePaymentPlatform::new(vec![]));
    let reconciler = EntitlementReconciler::new(platform.clone(), ledger.clone(), store.clone());

    let event = consumable_event("txn-1");
    assert_eq!(
        reconciler.process_event("acct-1", &event).await,
        EventOutcome::Credited
    );
    // Crash before finalization: the platform re-delivers.
    assert_eq!(
        reconciler.process_event("acct-1", &event).await,
        EventOutcome::Duplicate
    );
    assert_eq!(ledger.balance("acct-1").await.unwrap(), 100);
    // Both passes finalize; only the first credited.
    assert_eq!(platform.finalized().await.len(), 2);
}

#[tokio::test]
async fn unverifiable_and_unknown_events_are_dropped_unfinalized() {
    let store = seeded_store(0).await;
    let ledger = Arc::new(LedgerService::new(store.clone()));
    let platform = Arc::new(FakePaymentPlatform::new(vec![]));
    let reconciler = EntitlementReconciler::new(platform.clone(), ledger.clone(), store.clone());

    let mut forged = consumable_event("txn-forged");
    forged.verification_token = "sig-bad".to_string();
    assert_eq!(
        reconciler.process_event("acct-1", &forged).await,
        EventOutcome::Dropped
    );

    let mut unknown = consumable_event("txn-unknown");
    unknown.product_id = "com.arcana.mystery.box".to_string();
    assert_eq!(
        reconciler.process_event("acct-1", &unknown).await,
        EventOutcome::Dropped
    );

    assert_eq!(ledger.balance("acct-1").await.unwrap(), 0);
    assert!(platform.finalized().await.is_empty());
}

#[tokio::test]
async fn lapsed_subscription_clears_premium_on_reconcile() {
    let store = seeded_store(0).await;
    store.set_premium("acct-1", true).await.unwrap();
    let ledger = Arc::new(LedgerService::new(store.clone()));
    let platform = Arc::new(FakePaymentPlatform::new(vec![]));
    let reconciler = EntitlementReconciler::new(platform, ledger, store.clone());

    reconciler.reconcile_current_holdings("acct-1").await;
    assert!(!account(store.as_ref()).await.premium);
    assert!(!reconciler.premium("acct-1").await);
}

#[tokio::test]
async fn live_listener_resubscribes_after_stream_loss() {
    let store = seeded_store(0).await;
    let ledger = Arc::new(LedgerService::new(store.clone()));
    let platform = Arc::new(FakePaymentPlatform::new(vec![]));
    let reconciler = Arc::new(EntitlementReconciler::new(
        platform.clone(),
        ledger.clone(),
        store.clone(),
    ));

    let cancel = CancellationToken::new();
    let listener = tokio::spawn({
        let reconciler = reconciler.clone();
        let cancel = cancel.clone();
        async move { reconciler.run("acct-1", cancel).await }
    });

    wait_for(|| async { platform.has_subscriber() }).await;
    platform.push(consumable_event("txn-live-1")).await;
    wait_for(|| async { ledger.balance("acct-1").await.unwrap() == 100 }).await;

    // The platform drops the stream; the listener must come back for the
    // events delivered after the gap.
    platform.end_stream();
    wait_for(|| async { platform.has_subscriber() }).await;
    platform.push(consumable_event("txn-live-2")).await;
    wait_for(|| async { ledger.balance("acct-1").await.unwrap() == 200 }).await;

    assert_eq!(platform.finalized().await, vec!["txn-live-1", "txn-live-2"]);

    cancel.cancel();
    listener.await.unwrap();
}

// ----------------------------------------------------------------------
// Generation pipeline
// ----------------------------------------------------------------------

fn pipeline_with(
    store: Arc<dyn DocumentStore>,
    client: Arc<dyn GenerationClient>,
) -> (Arc<GenerationPipeline>, Arc<LedgerService>) {
    let ledger = Arc::new(LedgerService::new(store.clone()));
    let pipeline = Arc::new(GenerationPipeline::new(
        ledger.clone(),
        store,
        client,
        "gpt-4o",
    ));
    (pipeline, ledger)
}

#[tokio::test]
async fn successful_reading_spends_and_completes() {
    let store = seeded_store(10).await;
    let client = Arc::new(ScriptedClient::new(vec![ScriptedClient::ok(
        "The Tower speaks of upheaval...",
    )]));
    let (pipeline, ledger) = pipeline_with(store.clone(), client);

    let seeker = account(store.as_ref()).await;
    let artifact = pipeline
        .generate_reading(
            &seeker,
            ReadingInput::Tarot {
                card_names: vec!["The Tower".into()],
                question: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(artifact.status, ArtifactStatus::Completed);
    assert!(artifact.result_text.as_deref().unwrap().contains("Tower"));
    assert_eq!(ledger.balance("acct-1").await.unwrap(), 5);
    assert_eq!(account(store.as_ref()).await.total_generations, 1);

    let history = pipeline.history("acct-1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ArtifactStatus::Completed);
}

#[tokio::test]
async fn insufficient_funds_refuses_before_any_side_effect() {
    let store = seeded_store(3).await;
    let client = Arc::new(ScriptedClient::new(vec![]));
    let (pipeline, ledger) = pipeline_with(store.clone(), client);

    let seeker = account(store.as_ref()).await;
    let err = pipeline
        .generate_reading(&seeker, ReadingInput::Tarot { card_names: vec![], question: None })
        .await
        .unwrap_err();

    assert_eq!(err, GenerationError::InsufficientFunds { balance: 3, cost: 5 });
    assert_eq!(ledger.balance("acct-1").await.unwrap(), 3);
    assert!(ledger.transactions("acct-1").await.unwrap().is_empty());
    assert!(pipeline.history("acct-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_generation_refunds_and_marks_failed() {
    let store = seeded_store(10).await;
    let client = Arc::new(ScriptedClient::new(vec![Err(ApiError::ServerError(502))]));
    let (pipeline, ledger) = pipeline_with(store.clone(), client);

    let seeker = account(store.as_ref()).await;
    let err = pipeline
        .generate_reading(&seeker, ReadingInput::DailyHoroscope)
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::GenerationFailed(_)));

    // Net zero: spend then refund, both logged.
    assert_eq!(ledger.balance("acct-1").await.unwrap(), 10);
    let log = ledger.transactions("acct-1").await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].reason, TransactionReason::GenerationSpend);
    assert_eq!(log[1].reason, TransactionReason::GenerationRefund);

    let history = pipeline.history("acct-1").await.unwrap();
    assert_eq!(history[0].status, ArtifactStatus::Failed);
}

#[tokio::test]
async fn unauthorized_leaves_artifact_pending_for_the_sweep() {
    let store = seeded_store(10).await;
    let client = Arc::new(ScriptedClient::new(vec![Err(ApiError::Unauthorized)]));
    let (pipeline, ledger) = pipeline_with(store.clone(), client);

    let seeker = account(store.as_ref()).await;
    let err = pipeline
        .generate_reading(&seeker, ReadingInput::DailyHoroscope)
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::GenerationFailed(_)));

    // No refund yet, artifact still pending.
    assert_eq!(ledger.balance("acct-1").await.unwrap(), 7);
    let history = pipeline.history("acct-1").await.unwrap();
    assert_eq!(history[0].status, ArtifactStatus::Pending);

    // The sweep settles it: failed + refunded.
    let settled = pipeline.sweep_pending(ChronoDuration::zero()).await;
    assert_eq!(settled, 1);
    assert_eq!(ledger.balance("acct-1").await.unwrap(), 10);
    let history = pipeline.history("acct-1").await.unwrap();
    assert_eq!(history[0].status, ArtifactStatus::Failed);
}

#[tokio::test]
async fn failed_refund_is_recorded_as_debt() {
    // The spend (call 1) succeeds; the backend is gone by the time the
    // refund and its retry run.
    let store = Arc::new(FlakyStore::failing_from(2));
    let mut seeker = Account::with_defaults("acct-1", "Luna");
    seeker.balance = 10;
    store.create_account(&seeker).await.unwrap();

    let client = Arc::new(ScriptedClient::new(vec![Err(ApiError::ServerError(500))]));
    let ledger = Arc::new(LedgerService::new(store.clone()));
    let pipeline = GenerationPipeline::new(ledger.clone(), store.clone(), client, "gpt-4o");

    let err = pipeline
        .generate_reading(&seeker, ReadingInput::DailyHoroscope)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GenerationError::RefundFailed {
            account_id: "acct-1".to_string(),
            amount: 3,
        }
    );

    let debts = pipeline.outstanding_debts().await;
    assert_eq!(debts.len(), 1);
    assert_eq!(debts[0].account_id, "acct-1");
    assert_eq!(debts[0].amount, 3);

    // The spend went through; the seeker is owed the recorded amount.
    assert_eq!(store.balance("acct-1").await.unwrap(), 7);
}

#[tokio::test]
async fn backend_failure_during_reserve_leaves_no_trace() {
    // The backend is down before the spend: the reservation must not
    // half-commit as a moved balance, a log entry, or an artifact.
    let store = Arc::new(FlakyStore::failing_from(1));
    let mut seeker = Account::with_defaults("acct-1", "Luna");
    seeker.balance = 10;
    store.create_account(&seeker).await.unwrap();

    let client = Arc::new(ScriptedClient::new(vec![]));
    let ledger = Arc::new(LedgerService::new(store.clone()));
    let pipeline = GenerationPipeline::new(ledger.clone(), store.clone(), client, "gpt-4o");

    let err = pipeline
        .generate_reading(&seeker, ReadingInput::DailyHoroscope)
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::GenerationFailed(_)));

    assert_eq!(store.balance("acct-1").await.unwrap(), 10);
    assert!(store.transactions("acct-1").await.unwrap().is_empty());
    assert!(store.artifacts("acct-1").await.unwrap().is_empty());
    assert!(pipeline.outstanding_debts().await.is_empty());
}

#[tokio::test]
async fn refund_retry_after_transient_failure_credits_once() {
    // The spend (call 1) lands, the first refund attempt (call 2) drops,
    // the retry (call 3) lands. The seeker must end up made whole
    // exactly once.
    let store = Arc::new(FlakyStore::failing_only(2));
    let mut seeker = Account::with_defaults("acct-1", "Luna");
    seeker.balance = 10;
    store.create_account(&seeker).await.unwrap();

    let client = Arc::new(ScriptedClient::new(vec![Err(ApiError::ServerError(500))]));
    let ledger = Arc::new(LedgerService::new(store.clone()));
    let pipeline = GenerationPipeline::new(ledger.clone(), store.clone(), client, "gpt-4o");

    let err = pipeline
        .generate_reading(&seeker, ReadingInput::DailyHoroscope)
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::GenerationFailed(_)));

    // Net zero, with exactly one spend and one refund in the log.
    assert_eq!(store.balance("acct-1").await.unwrap(), 10);
    let log = store.transactions("acct-1").await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].reason, TransactionReason::GenerationSpend);
    assert_eq!(log[1].reason, TransactionReason::GenerationRefund);

    let history = pipeline.history("acct-1").await.unwrap();
    assert_eq!(history[0].status, ArtifactStatus::Failed);
    assert!(pipeline.outstanding_debts().await.is_empty());
}

// ----------------------------------------------------------------------
// Identity and session
// ----------------------------------------------------------------------

#[tokio::test]
async fn guest_sign_in_creates_account_with_starting_balance() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let provider = Arc::new(FakeIdentityProvider::new());
    let manager = IdentitySessionManager::new(provider, store.clone());
    let mut changes = manager.subscribe();

    let session = manager
        .sign_in(Credential::Guest { birth_date: None })
        .await
        .unwrap();
    assert!(session.active);
    assert_eq!(changes.recv().await.unwrap(), Some(session.clone()));

    let account = store.account(&session.account_id).await.unwrap().unwrap();
    assert_eq!(account.balance, 10);
    assert!(!account.premium);
    assert_eq!(manager.profile().await.unwrap().id, session.account_id);
}

#[tokio::test]
async fn duplicate_guard_refuses_second_guest_from_same_location() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let provider = Arc::new(FakeIdentityProvider::new());
    let guard = Arc::new(StaticGuard {
        duplicate: true,
        registered: Mutex::new(Vec::new()),
    });
    let manager = IdentitySessionManager::new(provider, store.clone()).with_guard(guard);

    let err = manager
        .sign_in(Credential::Guest { birth_date: None })
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredential(_)));
    assert!(manager.current_session().await.is_none());
}

#[tokio::test]
async fn guard_never_blocks_existing_account_sign_in() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let provider = Arc::new(FakeIdentityProvider::new());
    let guard = Arc::new(StaticGuard {
        duplicate: true,
        registered: Mutex::new(Vec::new()),
    });
    let manager = IdentitySessionManager::new(provider, store.clone()).with_guard(guard);

    let session = manager
        .sign_in(Credential::EmailPassword {
            email: "luna@example.com".to_string(),
            password: "hunter2".to_string(),
        })
        .await
        .unwrap();
    assert!(session.active);
}

#[tokio::test]
async fn session_loss_invalidates_economic_caches() {
    let store = seeded_store(10).await;
    let provider = Arc::new(FakeIdentityProvider::new());
    let manager = IdentitySessionManager::new(provider, store.clone());
    let ledger = Arc::new(LedgerService::new(store.clone()));
    manager.register_cache(ledger.clone()).await;

    assert_eq!(ledger.balance("acct-1").await.unwrap(), 10);
    // Mutate behind the cache, then lose the session.
    let tx = LedgerTransaction::new("acct-1", 25, TransactionReason::ManualAdjustment, None);
    store.adjust_balance(&tx, false).await.unwrap();
    let mut changes = manager.subscribe();
    manager.sign_out().await.unwrap();

    assert_eq!(changes.recv().await.unwrap(), None);
    assert!(manager.current_session().await.is_none());
    assert!(manager.profile().await.is_none());
    assert_eq!(ledger.balance("acct-1").await.unwrap(), 35);
}

#[tokio::test]
async fn delete_account_removes_the_document() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let provider = Arc::new(FakeIdentityProvider::new());
    let manager = IdentitySessionManager::new(provider, store.clone());

    let session = manager
        .sign_in(Credential::Guest { birth_date: None })
        .await
        .unwrap();
    manager.delete_account().await.unwrap();

    assert!(store.account(&session.account_id).await.unwrap().is_none());
    assert!(manager.current_session().await.is_none());
}

#[tokio::test]
async fn session_listener_ensures_accounts_and_tears_down_on_loss() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let provider = Arc::new(FakeIdentityProvider::new());
    let manager = Arc::new(IdentitySessionManager::new(provider.clone(), store.clone()));
    let ledger = Arc::new(LedgerService::new(store.clone()));
    manager.register_cache(ledger.clone()).await;

    let cancel = CancellationToken::new();
    let listener = tokio::spawn({
        let manager = manager.clone();
        let cancel = cancel.clone();
        async move { manager.run(cancel).await }
    });

    // The listener may not have subscribed yet; ensuring the account is
    // idempotent, so re-announcing until the change lands is safe.
    let user = AuthUser {
        id: "wanderer-1".to_string(),
        email: None,
        display_name: None,
        anonymous: true,
    };
    wait_for(|| async {
        provider.push_session(Some(user.clone())).await;
        manager.current_session().await.is_some()
    })
    .await;

    let session = manager.current_session().await.unwrap();
    assert_eq!(session.account_id, "wanderer-1");
    let created = store.account("wanderer-1").await.unwrap().unwrap();
    assert_eq!(created.balance, 10);
    assert_eq!(manager.profile().await.unwrap().id, "wanderer-1");

    // Prime the ledger's read cache, then mutate behind it so teardown's
    // invalidation is observable.
    assert_eq!(ledger.balance("wanderer-1").await.unwrap(), 10);
    let tx = LedgerTransaction::new("wanderer-1", 15, TransactionReason::ManualAdjustment, None);
    store.adjust_balance(&tx, false).await.unwrap();

    wait_for(|| async {
        provider.push_session(None).await;
        manager.current_session().await.is_none()
    })
    .await;

    assert!(manager.profile().await.is_none());
    assert_eq!(ledger.balance("wanderer-1").await.unwrap(), 25);

    cancel.cancel();
    listener.await.unwrap();
}

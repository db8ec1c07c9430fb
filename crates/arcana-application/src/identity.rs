//! Identity session manager.
//!
//! Owns the current [`Session`] and the locally mirrored account profile.
//! Once a session exists, a matching account document is guaranteed to
//! exist: every non-nil session observation runs the idempotent
//! "ensure account" step (create with defaults, or touch `last_seen_at`).
//! Loss of the session invalidates every registered economic cache so a
//! later session for a different account never sees stale figures.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use arcana_core::account::Account;
use arcana_core::error::AuthError;
use arcana_core::identity::{
    BearerTokenProvider, DuplicateAccountGuard, EconomicCache, IdentityProvider, SessionTeardown,
};
use arcana_core::session::{AuthUser, Credential, Session};
use arcana_core::store::{DocumentStore, IpAccountKind};

/// Session and profile manager over an identity provider.
pub struct IdentitySessionManager {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn DocumentStore>,
    guard: Option<Arc<dyn DuplicateAccountGuard>>,
    caches: RwLock<Vec<Arc<dyn EconomicCache>>>,
    session: RwLock<Option<Session>>,
    profile: RwLock<Option<Account>>,
    changes: broadcast::Sender<Option<Session>>,
}

impl IdentitySessionManager {
    pub fn new(provider: Arc<dyn IdentityProvider>, store: Arc<dyn DocumentStore>) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            provider,
            store,
            guard: None,
            caches: RwLock::new(Vec::new()),
            session: RwLock::new(None),
            profile: RwLock::new(None),
            changes,
        }
    }

    /// Attaches the optional duplicate-account guard. The guard is a
    /// heuristic gate on account creation only; its failures never block
    /// anything.
    pub fn with_guard(mut self, guard: Arc<dyn DuplicateAccountGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Registers a cache to invalidate on session loss.
    pub async fn register_cache(&self, cache: Arc<dyn EconomicCache>) {
        self.caches.write().await.push(cache);
    }

    /// The current session, if any.
    pub async fn current_session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    /// Subscribes to session changes. Fires `Some` on establishment and
    /// `None` on loss; consumers treat `None` as "drop everything".
    pub fn subscribe(&self) -> broadcast::Receiver<Option<Session>> {
        self.changes.subscribe()
    }

    /// The locally mirrored account profile, if any.
    pub async fn profile(&self) -> Option<Account> {
        self.profile.read().await.clone()
    }

    /// Signs in and establishes a session.
    ///
    /// For account-creating credentials (guest, register) the duplicate
    /// guard runs first; a positive detection refuses the creation. After
    /// provider sign-in the account document is ensured (best-effort).
    ///
    /// # Errors
    ///
    /// [`AuthError`] from the provider, unclassified beyond its taxonomy;
    /// no retries happen here.
    pub async fn sign_in(&self, credential: Credential) -> Result<Session, AuthError> {
        let ip_kind = match &credential {
            Credential::Guest { .. } => Some(IpAccountKind::Guest),
            Credential::Register { .. } => Some(IpAccountKind::Registered),
            Credential::EmailPassword { .. } => None,
        };

        if let (Some(guard), Some(kind)) = (&self.guard, ip_kind) {
            if guard.is_duplicate(kind).await {
                tracing::info!("duplicate-account guard refused {} creation", kind.as_str());
                return Err(AuthError::InvalidCredential(
                    "an account was already created from this network location".to_string(),
                ));
            }
        }

        let user = self.provider.sign_in(credential.clone()).await?;
        self.ensure_account(&user, Some(&credential)).await;

        if let (Some(guard), Some(kind)) = (&self.guard, ip_kind) {
            guard.register(&user.id, kind).await;
        }

        let session = Session::new(user.id);
        *self.session.write().await = Some(session.clone());
        let _ = self.changes.send(Some(session.clone()));
        Ok(session)
    }

    /// Signs out and drops all local economic state.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let result = self.provider.sign_out().await;
        self.teardown_local().await;
        result
    }

    /// Deletes the current account: IP registrations, the account
    /// document, then the provider identity, then local teardown.
    pub async fn delete_account(&self) -> Result<(), AuthError> {
        let Some(session) = self.current_session().await else {
            return Err(AuthError::Unknown("no active session".to_string()));
        };

        if let Some(guard) = &self.guard {
            guard.unregister(&session.account_id).await;
        }
        self.store
            .delete_account(&session.account_id)
            .await
            .map_err(|e| AuthError::Unknown(e.to_string()))?;
        self.provider.delete_account().await?;
        self.teardown_local().await;
        Ok(())
    }

    /// The session-change listener. Runs until cancelled (process
    /// shutdown); on every non-nil session it re-runs the idempotent
    /// ensure step, on nil it tears local state down.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut changes = self.provider.subscribe();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                change = changes.recv() => match change {
                    Ok(Some(user)) => {
                        self.ensure_account(&user, None).await;
                        let session = Session::new(user.id);
                        *self.session.write().await = Some(session.clone());
                        let _ = self.changes.send(Some(session));
                    }
                    Ok(None) => self.teardown_local().await,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "session stream lagged");
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        }
    }

    /// Idempotent, best-effort: create the account document with defaults
    /// on first observation, touch `last_seen_at` otherwise. Safe to run
    /// on every app foreground; failures are logged, never fatal.
    async fn ensure_account(&self, user: &AuthUser, credential: Option<&Credential>) {
        match self.store.account(&user.id).await {
            Ok(Some(account)) => {
                if let Err(e) = self.store.touch_last_seen(&user.id, Utc::now()).await {
                    tracing::warn!("failed to touch last_seen_at for '{}': {e}", user.id);
                }
                *self.profile.write().await = Some(account);
            }
            Ok(None) => {
                let account = build_account(user, credential);
                match self.store.create_account(&account).await {
                    Ok(()) => *self.profile.write().await = Some(account),
                    Err(e) => {
                        tracing::warn!("failed to create account document for '{}': {e}", user.id);
                    }
                }
            }
            Err(e) => {
                tracing::warn!("failed to read account document for '{}': {e}", user.id);
            }
        }
    }

    async fn teardown_local(&self) {
        *self.session.write().await = None;
        *self.profile.write().await = None;
        let _ = self.changes.send(None);
        let caches = self.caches.read().await.clone();
        for cache in caches {
            cache.invalidate().await;
        }
    }
}

fn build_account(user: &AuthUser, credential: Option<&Credential>) -> Account {
    match credential {
        Some(Credential::Register {
            email,
            display_name,
            birth_date,
            gender,
            ..
        }) => {
            let mut account = Account::with_defaults(user.id.as_str(), display_name.as_str());
            account.email = email.clone();
            account.gender = Some(gender.clone());
            account.set_birth_date(*birth_date);
            account
        }
        Some(Credential::Guest { birth_date }) => {
            let mut account = Account::with_defaults(user.id.as_str(), "Guest");
            if let Some(birth_date) = birth_date {
                account.set_birth_date(*birth_date);
            }
            account
        }
        _ => {
            // Session observed for an identity with no document yet
            // (e.g. account created on another device).
            let name = user
                .display_name
                .clone()
                .or_else(|| {
                    user.email
                        .as_deref()
                        .and_then(|e| e.split('@').next())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| "Seeker".to_string());
            let mut account = Account::with_defaults(user.id.as_str(), name);
            account.email = user.email.clone().unwrap_or_default();
            account
        }
    }
}

#[async_trait]
impl SessionTeardown for IdentitySessionManager {
    /// 401 side effect: revoke the provider session and drop local state.
    async fn teardown(&self) {
        if let Err(e) = self.provider.sign_out().await {
            tracing::warn!("provider sign-out during teardown failed: {e}");
        }
        self.teardown_local().await;
    }
}

#[async_trait]
impl BearerTokenProvider for IdentitySessionManager {
    async fn bearer_token(&self) -> Option<String> {
        self.provider.id_token().await
    }
}

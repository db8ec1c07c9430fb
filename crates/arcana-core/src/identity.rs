//! Identity provider boundary and session-coupled traits.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::AuthError;
use crate::session::{AuthUser, Credential};
use crate::store::IpAccountKind;

/// An abstract identity provider (the vendor auth SDK sits behind this).
///
/// The provider owns credential handling and the push stream of session
/// changes. It performs no retries; callers decide.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Signs in with the given credential.
    async fn sign_in(&self, credential: Credential) -> Result<AuthUser, AuthError>;

    /// Signs the current user out. Also fires a `None` on the session
    /// stream.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// The currently signed-in user, if any.
    async fn current_user(&self) -> Option<AuthUser>;

    /// Subscribes to session changes. Fires on sign-in, sign-out and
    /// token invalidation; `None` means the session is gone.
    fn subscribe(&self) -> broadcast::Receiver<Option<AuthUser>>;

    /// Short-lived bearer token for the current session.
    async fn id_token(&self) -> Option<String>;

    /// Deletes the current identity at the provider. Fires `None` on the
    /// session stream.
    async fn delete_account(&self) -> Result<(), AuthError>;
}

/// Local session teardown, triggered by the gateway on a 401 before the
/// error is surfaced to the caller.
#[async_trait]
pub trait SessionTeardown: Send + Sync {
    async fn teardown(&self);
}

/// A cache of economic state that must be dropped when the session is
/// lost, so a later session for a different account never observes stale
/// figures.
#[async_trait]
pub trait EconomicCache: Send + Sync {
    async fn invalidate(&self);
}

/// Supplies the bearer token the gateway injects into outgoing requests.
#[async_trait]
pub trait BearerTokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Option<String>;
}

/// Best-effort duplicate-account gate.
///
/// A heuristic anti-abuse measure, not a correctness requirement: every
/// method fails open, and a guard failure must never block a legitimate
/// economic operation.
#[async_trait]
pub trait DuplicateAccountGuard: Send + Sync {
    /// Whether the caller's network location already created an account
    /// of this kind. Returns `false` when the check cannot be performed.
    async fn is_duplicate(&self, kind: IpAccountKind) -> bool;

    /// Records the new account against the caller's network location.
    async fn register(&self, account_id: &str, kind: IpAccountKind);

    /// Removes all registrations for the account.
    async fn unregister(&self, account_id: &str);
}

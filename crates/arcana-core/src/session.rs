//! Session and credential types.
//!
//! A [`Session`] is ephemeral, held only in memory, and rebuilt from the
//! identity provider's current state on process start. Loss of the session
//! (sign-out, token revocation, account deletion) must invalidate every
//! cached piece of economic state.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The in-memory session for the current identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub account_id: String,
    pub active: bool,
}

impl Session {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            active: true,
        }
    }
}

/// The identity-provider view of a signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    /// True for guest (anonymous) identities.
    #[serde(default)]
    pub anonymous: bool,
}

/// Credential passed to `sign_in`.
#[derive(Debug, Clone, PartialEq)]
pub enum Credential {
    /// Existing account.
    EmailPassword { email: String, password: String },
    /// Anonymous guest identity, optionally carrying a birth date for
    /// zodiac derivation.
    Guest { birth_date: Option<NaiveDate> },
    /// New registered account.
    Register {
        email: String,
        password: String,
        display_name: String,
        birth_date: NaiveDate,
        gender: String,
    },
}

impl Credential {
    /// Whether this credential creates a new account rather than opening
    /// an existing one. Only creation paths run the duplicate-account
    /// guard.
    pub fn creates_account(&self) -> bool {
        matches!(self, Self::Guest { .. } | Self::Register { .. })
    }
}

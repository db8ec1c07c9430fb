//! Error taxonomy for the Arcana economic subsystem.
//!
//! Each boundary surfaces its own typed error enum so callers can make
//! retry/abort decisions without string matching. None of the services
//! retry internally; classification happens here, policy happens in the
//! caller.

use std::collections::HashMap;

use thiserror::Error;

/// Errors surfaced by the identity provider boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    /// The supplied credential was rejected (wrong password, malformed
    /// email, already-used email, duplicate-account refusal).
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// The account exists but has been disabled by the provider.
    #[error("account disabled")]
    AccountDisabled,

    /// Too many attempts; the provider asked us to back off.
    #[error("rate limited by identity provider")]
    RateLimited,

    /// Transport-level failure reaching the provider.
    #[error("network error: {0}")]
    Network(String),

    /// Anything the provider reported that we do not classify.
    #[error("identity provider error: {0}")]
    Unknown(String),
}

/// Errors surfaced by ledger balance mutations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// No account document exists for the given id.
    #[error("account not found: '{id}'")]
    AccountNotFound { id: String },

    /// The backing store could not complete the operation.
    #[error("ledger backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The `source_event_id` was already applied. Informational, not a
    /// failure: the carried balance is the current (unchanged) balance.
    #[error("credit already applied; balance unchanged at {balance}")]
    AlreadyApplied { balance: i64 },

    /// A spend would take the balance below zero. The reservation step is
    /// authoritative: this is returned even when a prior read looked
    /// sufficient.
    #[error("insufficient funds: balance {balance}")]
    InsufficientFunds { balance: i64 },
}

impl LedgerError {
    /// Creates an AccountNotFound error.
    pub fn account_not_found(id: impl Into<String>) -> Self {
        Self::AccountNotFound { id: id.into() }
    }

    /// Check whether this is the informational AlreadyApplied signal.
    pub fn is_already_applied(&self) -> bool {
        matches!(self, Self::AlreadyApplied { .. })
    }
}

/// Errors surfaced by the remote API gateway.
///
/// Classified from the HTTP status code; the gateway never retries, the
/// caller decides which classes are retryable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// 401. The gateway tears the local session down before returning this.
    #[error("unauthorized")]
    Unauthorized,

    /// 403.
    #[error("forbidden")]
    Forbidden,

    /// 404.
    #[error("resource not found")]
    NotFound,

    /// 422, with per-field validation messages when the body carried them.
    #[error("validation failed ({} fields)", .0.len())]
    Validation(HashMap<String, Vec<String>>),

    /// 429.
    #[error("rate limited")]
    RateLimited,

    /// Any 5xx.
    #[error("server error: {0}")]
    ServerError(u16),

    /// Transport-level failure before a status code was available.
    #[error("network error: {0}")]
    Network(String),

    /// A 2xx response whose body could not be decoded.
    #[error("response decoding failed: {0}")]
    Decode(String),

    /// Any other status code.
    #[error("unexpected status: {0}")]
    Unknown(u16),
}

/// Errors surfaced by the generation pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// The balance was below the reading's cost. No artifact was created
    /// and no funds moved.
    #[error("insufficient funds: balance {balance}, cost {cost}")]
    InsufficientFunds { balance: i64, cost: i64 },

    /// The external call (or a persistence step after the reserve) failed.
    /// The reserved funds were refunded and the artifact marked failed,
    /// except on a 401 where the pending artifact is left for the sweep.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// The compensating refund itself failed after one retry. The amount
    /// is recorded as a reconciliation debt for out-of-band repair.
    #[error("refund of {amount} failed for account '{account_id}'")]
    RefundFailed { account_id: String, amount: i64 },
}

impl GenerationError {
    /// Creates a GenerationFailed error from any displayable cause.
    pub fn failed(cause: impl std::fmt::Display) -> Self {
        Self::GenerationFailed(cause.to_string())
    }
}

impl From<ApiError> for GenerationError {
    fn from(err: ApiError) -> Self {
        Self::GenerationFailed(err.to_string())
    }
}

/// Errors surfaced by the document store boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// No document exists for the given account id.
    #[error("document not found: '{id}'")]
    NotFound { id: String },

    /// A balance mutation would go below zero on a funds-checked path.
    #[error("insufficient funds: balance {balance}")]
    InsufficientFunds { balance: i64 },

    /// The store could not complete the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Creates a NotFound error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates an Unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { id } => LedgerError::AccountNotFound { id },
            StoreError::InsufficientFunds { balance } => {
                LedgerError::InsufficientFunds { balance }
            }
            StoreError::Unavailable(message) => LedgerError::BackendUnavailable(message),
        }
    }
}

/// Errors surfaced by the payment platform boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PaymentError {
    /// The platform could not be reached or rejected the call.
    #[error("payment platform unavailable: {0}")]
    Unavailable(String),
}

//! Domain models and boundary traits for the Arcana economic subsystem.
//!
//! This crate holds the pure core: the account/ledger/entitlement/artifact
//! data model, the typed error taxonomy, and the traits behind which the
//! external collaborators sit (identity provider, document store, payment
//! platform, generation API). It performs no I/O itself.

pub mod account;
pub mod artifact;
pub mod config;
pub mod entitlement;
pub mod error;
pub mod generation;
pub mod identity;
pub mod ledger;
pub mod payments;
pub mod session;
pub mod store;

pub use error::{ApiError, AuthError, GenerationError, LedgerError, PaymentError, StoreError};

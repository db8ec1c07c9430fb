//! Ledger domain module.
//!
//! # Module Structure
//!
//! - `model`: append-only transaction log entries (`LedgerTransaction`,
//!   `TransactionReason`) and the idempotency key carrier (`CreditSource`)

mod model;

pub use model::{CreditSource, LedgerTransaction, TransactionReason};

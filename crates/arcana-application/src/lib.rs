//! Application services for the Arcana economic subsystem.
//!
//! Wires the core boundaries together: session management over the
//! identity provider, the ledger over the document store, entitlement
//! reconciliation over the payment platform, and the generation pipeline
//! over the paid API.

pub mod identity;
pub mod ledger;
pub mod pipeline;
pub mod prompt;
pub mod reconciler;

pub use identity::IdentitySessionManager;
pub use ledger::LedgerService;
pub use pipeline::{GenerationPipeline, ReconciliationDebt};
pub use prompt::ReadingInput;
pub use reconciler::{EntitlementReconciler, EventOutcome};

#[cfg(test)]
mod scenario_test;

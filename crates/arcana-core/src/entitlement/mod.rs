//! Entitlement domain module.
//!
//! # Module Structure
//!
//! - `model`: payment-platform event and local idempotency record
//! - `catalog`: the product catalog and product classification

mod catalog;
mod model;

pub use catalog::{consumable_credit_for, ProductKind};
pub use model::{EntitlementEvent, EntitlementRecord};

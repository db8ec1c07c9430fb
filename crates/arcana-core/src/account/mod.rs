//! Account domain module.
//!
//! # Module Structure
//!
//! - `model`: the persisted account document (`Account`, `AccountPreferences`)
//!   and derived attributes (`ZodiacSign`)

mod model;

pub use model::{Account, AccountPreferences, ZodiacSign, DEFAULT_STARTING_BALANCE};

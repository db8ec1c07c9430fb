//! Generation artifact domain module.
//!
//! # Module Structure
//!
//! - `model`: persisted reading artifacts (`GenerationArtifact`,
//!   `ArtifactStatus`) and the reading taxonomy (`ReadingKind`)

mod model;

pub use model::{ArtifactStatus, GenerationArtifact, ReadingKind};

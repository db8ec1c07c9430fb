//! Generation artifact model.
//!
//! An artifact is created in `Pending` before the paid external call is
//! made, so funds reserved for it are always accounted for by a persisted
//! record. It transitions to `Completed` (immutable from then on) or
//! `Failed` (which pairs with a compensating refund).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kinds of paid readings the app offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingKind {
    Tarot,
    Coffee,
    Palm,
    Dream,
    DailyHoroscope,
    LoveCompatibility,
}

impl ReadingKind {
    /// Karma cost charged for this kind of reading.
    pub fn karma_cost(&self) -> i64 {
        match self {
            Self::Tarot => 5,
            Self::Coffee => 8,
            Self::Palm => 10,
            Self::Dream => 6,
            Self::DailyHoroscope => 3,
            Self::LoveCompatibility => 5,
        }
    }

    /// Human-readable title for histories and logs.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Tarot => "Tarot Reading",
            Self::Coffee => "Coffee Reading",
            Self::Palm => "Palm Reading",
            Self::Dream => "Dream Interpretation",
            Self::DailyHoroscope => "Daily Horoscope",
            Self::LoveCompatibility => "Love Compatibility",
        }
    }
}

/// Lifecycle state of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Pending,
    Completed,
    Failed,
}

/// A paid reading, persisted at spend time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationArtifact {
    pub id: String,
    pub account_id: String,
    pub kind: ReadingKind,
    pub status: ArtifactStatus,
    /// References to the inputs the reading was produced from (card ids,
    /// uploaded image urls, the dream text, ...).
    #[serde(default)]
    pub input_refs: Vec<String>,
    /// The generated text once completed.
    #[serde(default)]
    pub result_text: Option<String>,
    /// Karma reserved for this reading.
    pub karma_cost: i64,
    pub created_at: DateTime<Utc>,
}

impl GenerationArtifact {
    /// Creates a new artifact in `Pending` state.
    pub fn pending(
        account_id: impl Into<String>,
        kind: ReadingKind,
        karma_cost: i64,
        input_refs: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            kind,
            status: ArtifactStatus::Pending,
            input_refs,
            result_text: None,
            karma_cost,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_artifact_has_no_result() {
        let artifact = GenerationArtifact::pending("acct-1", ReadingKind::Coffee, 8, vec![]);
        assert_eq!(artifact.status, ArtifactStatus::Pending);
        assert!(artifact.result_text.is_none());
        assert_eq!(artifact.karma_cost, 8);
        assert!(!artifact.id.is_empty());
    }

    #[test]
    fn costs_match_the_catalog() {
        assert_eq!(ReadingKind::Tarot.karma_cost(), 5);
        assert_eq!(ReadingKind::Coffee.karma_cost(), 8);
        assert_eq!(ReadingKind::Palm.karma_cost(), 10);
    }
}

//! Account domain model.
//!
//! The per-account document held by the remote document store. Every
//! session with a valid identity has exactly one of these; it is created
//! with defaults on first observation of the session.
//!
//! The balance field is deliberately not public-write anywhere in the
//! services: it only changes through the ledger's adjust primitive.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Balance granted to a newly created account.
pub const DEFAULT_STARTING_BALANCE: i64 = 10;

/// The per-account document.
///
/// Schema'd record validated at the serialization boundary: unknown fields
/// are rejected rather than silently defaulted into business logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Account {
    /// Opaque account id issued by the identity provider.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Email address; empty for guest accounts.
    #[serde(default)]
    pub email: String,
    /// Birth date, when the user provided one.
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    /// Self-reported gender, when provided.
    #[serde(default)]
    pub gender: Option<String>,
    /// Age derived from `birth_date`.
    #[serde(default)]
    pub age: Option<u32>,
    /// Zodiac category derived from `birth_date`.
    #[serde(default)]
    pub zodiac_sign: Option<ZodiacSign>,
    /// Karma balance. Non-negative; mutated only through the ledger.
    pub balance: i64,
    /// Premium entitlement flag, owned by the entitlement reconciler.
    pub premium: bool,
    /// Cumulative number of completed generations.
    #[serde(default)]
    pub total_generations: u32,
    /// Cumulative number of tests taken.
    #[serde(default)]
    pub total_tests: u32,
    pub created_at: DateTime<Utc>,
    /// Touched on every session observation (best-effort).
    pub last_seen_at: DateTime<Utc>,
    #[serde(default)]
    pub preferences: AccountPreferences,
}

impl Account {
    /// Creates a fresh account document with the default starting balance.
    pub fn with_defaults(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            email: String::new(),
            birth_date: None,
            gender: None,
            age: None,
            zodiac_sign: None,
            balance: DEFAULT_STARTING_BALANCE,
            premium: false,
            total_generations: 0,
            total_tests: 0,
            created_at: now,
            last_seen_at: now,
            preferences: AccountPreferences::default(),
        }
    }

    /// Sets the birth date and recomputes the derived attributes.
    pub fn set_birth_date(&mut self, birth_date: NaiveDate) {
        self.age = Some(age_from(birth_date, Utc::now().date_naive()));
        self.zodiac_sign = Some(ZodiacSign::from_birth_date(birth_date));
        self.birth_date = Some(birth_date);
    }

    /// Whether the balance covers the given cost.
    pub fn has_funds(&self, cost: i64) -> bool {
        self.balance >= cost
    }
}

/// User-tunable settings persisted alongside the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountPreferences {
    pub notifications: bool,
    pub sound: bool,
    pub auto_save_readings: bool,
    pub show_balance_notifications: bool,
    pub language: String,
    pub theme: String,
}

impl Default for AccountPreferences {
    fn default() -> Self {
        Self {
            notifications: true,
            sound: true,
            auto_save_readings: true,
            show_balance_notifications: true,
            language: "en".to_string(),
            theme: "mystical".to_string(),
        }
    }
}

/// Zodiac category derived from the birth date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZodiacSign {
    Aries,
    Taurus,
    Gemini,
    Cancer,
    Leo,
    Virgo,
    Libra,
    Scorpio,
    Sagittarius,
    Capricorn,
    Aquarius,
    Pisces,
}

impl ZodiacSign {
    /// Derives the sign from a birth date.
    pub fn from_birth_date(date: NaiveDate) -> Self {
        match (date.month(), date.day()) {
            (3, 21..) | (4, ..=19) => Self::Aries,
            (4, 20..) | (5, ..=20) => Self::Taurus,
            (5, 21..) | (6, ..=20) => Self::Gemini,
            (6, 21..) | (7, ..=22) => Self::Cancer,
            (7, 23..) | (8, ..=22) => Self::Leo,
            (8, 23..) | (9, ..=22) => Self::Virgo,
            (9, 23..) | (10, ..=22) => Self::Libra,
            (10, 23..) | (11, ..=21) => Self::Scorpio,
            (11, 22..) | (12, ..=21) => Self::Sagittarius,
            (12, 22..) | (1, ..=19) => Self::Capricorn,
            (1, 20..) | (2, ..=18) => Self::Aquarius,
            _ => Self::Pisces,
        }
    }

    /// English display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aries => "Aries",
            Self::Taurus => "Taurus",
            Self::Gemini => "Gemini",
            Self::Cancer => "Cancer",
            Self::Leo => "Leo",
            Self::Virgo => "Virgo",
            Self::Libra => "Libra",
            Self::Scorpio => "Scorpio",
            Self::Sagittarius => "Sagittarius",
            Self::Capricorn => "Capricorn",
            Self::Aquarius => "Aquarius",
            Self::Pisces => "Pisces",
        }
    }
}

fn age_from(birth: NaiveDate, today: NaiveDate) -> u32 {
    let mut years = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    years.max(0) as u32
}

//! Configuration loaded from TOML.
//!
//! Only the generation gateway needs configuration today; everything else
//! is injected.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ArcanaConfig {
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// Settings for the paid generation API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Base URL of the generation service.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// API key used when no session token is available.
    #[serde(default)]
    pub api_key: String,
    /// Model identifier sent with every request.
    #[serde(default = "default_model")]
    pub model: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.arcana.app/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ArcanaConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, StoreError> {
        toml::from_str(raw).map_err(|e| StoreError::unavailable(format!("config parse: {e}")))
    }
}

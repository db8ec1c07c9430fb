//! Generation API boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Request sent to the paid generation API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
}

/// Response from the generation API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub result_text: String,
}

/// Client for the paid generation API.
///
/// Implemented by the remote gateway; the pipeline only sees this trait
/// so tests can script responses.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, ApiError>;
}

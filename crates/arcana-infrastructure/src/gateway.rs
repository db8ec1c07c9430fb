//! Remote API gateway.
//!
//! Builds authenticated requests against the generation service and
//! classifies responses into the fixed [`ApiError`] taxonomy. The gateway
//! performs no retries; callers decide whether a failure class is
//! retryable. A 401 tears the local session down before the error is
//! returned.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use arcana_core::config::GenerationConfig;
use arcana_core::error::ApiError;
use arcana_core::generation::{GenerationClient, GenerationRequest, GenerationResponse};
use arcana_core::identity::{BearerTokenProvider, SessionTeardown};

#[derive(Debug, Deserialize)]
struct ValidationBody {
    errors: HashMap<String, Vec<String>>,
}

/// Classifies a non-2xx HTTP status (with its body) into an [`ApiError`].
///
/// Pure so the taxonomy is testable without a server.
pub fn classify_status(status: u16, body: &str) -> ApiError {
    match status {
        401 => ApiError::Unauthorized,
        403 => ApiError::Forbidden,
        404 => ApiError::NotFound,
        422 => {
            let fields = serde_json::from_str::<ValidationBody>(body)
                .map(|b| b.errors)
                .unwrap_or_default();
            ApiError::Validation(fields)
        }
        429 => ApiError::RateLimited,
        500..=599 => ApiError::ServerError(status),
        other => ApiError::Unknown(other),
    }
}

/// HTTP gateway to the paid generation API.
pub struct RemoteApiGateway {
    client: reqwest::Client,
    config: GenerationConfig,
    tokens: Arc<dyn BearerTokenProvider>,
    teardown: Arc<dyn SessionTeardown>,
}

impl RemoteApiGateway {
    /// Builds the gateway with the configured request timeout.
    pub fn new(
        config: GenerationConfig,
        tokens: Arc<dyn BearerTokenProvider>,
        teardown: Arc<dyn SessionTeardown>,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            client,
            config,
            tokens,
            teardown,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Session token when one exists, else the configured API key.
    async fn bearer(&self) -> Option<String> {
        if let Some(token) = self.tokens.bearer_token().await {
            return Some(token);
        }
        if self.config.api_key.is_empty() {
            None
        } else {
            Some(self.config.api_key.clone())
        }
    }

    async fn handle_failure(&self, status: u16, body: String) -> ApiError {
        let err = classify_status(status, &body);
        if err == ApiError::Unauthorized {
            tracing::warn!("gateway got 401; tearing down local session");
            self.teardown.teardown().await;
        }
        err
    }
}

#[async_trait]
impl GenerationClient for RemoteApiGateway {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, ApiError> {
        let url = self.endpoint("generate");
        let mut builder = self.client.post(&url).json(request);
        if let Some(token) = self.bearer().await {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let status = response.status().as_u16();

        if (200..300).contains(&status) {
            return response
                .json::<GenerationResponse>()
                .await
                .map_err(|e| ApiError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status, "generation request failed");
        Err(self.handle_failure(status, body).await)
    }
}

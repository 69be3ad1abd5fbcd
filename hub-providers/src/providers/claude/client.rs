//! Anthropic HTTP client with vendor error mapping

use super::types::ApiError;
use hub_core::ProviderError;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

const PROVIDER: &str = "claude";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API client.
pub struct ClaudeClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl ClaudeClient {
    /// Create a new client with a per-call deadline.
    pub fn new(api_key: impl Into<String>, deadline: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(deadline)
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com/v1".to_string(),
        }
    }

    /// Make an API request, mapping vendor failures into `ProviderError`.
    pub async fn request<Req: Serialize, Res: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Req,
    ) -> Result<Res, ProviderError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                // Deadline exceeded and connection failures are transient.
                let message = if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    format!("HTTP request failed: {}", e)
                };
                ProviderError::Upstream {
                    provider: PROVIDER.to_string(),
                    message,
                    retriable: true,
                    status: None,
                }
            })?;

        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ProviderError::Upstream {
                    provider: PROVIDER.to_string(),
                    message: format!("Failed to parse response: {}", e),
                    retriable: false,
                    status: Some(status.as_u16()),
                });
        }

        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let error_msg = serde_json::from_str::<ApiError>(&error_text)
            .map(|e| e.error.message)
            .unwrap_or(error_text);

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
                provider: PROVIDER.to_string(),
                retry_after_secs,
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Authentication {
                provider: PROVIDER.to_string(),
            },
            _ => ProviderError::Upstream {
                provider: PROVIDER.to_string(),
                message: error_msg,
                retriable: status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT,
                status: Some(status.as_u16()),
            },
        })
    }
}

impl std::fmt::Debug for ClaudeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

//! Gemini completion adapter implementation

use super::types::{
    ApiContent, ApiError, GenerateContentRequest, GenerateContentResponse, GenerationConfig,
    InlineData, Part, SystemInstruction, UsageMetadata,
};
use crate::{CompletionParams, ProviderAdapter, ProviderCapability};
use async_trait::async_trait;
use hub_core::{CompletionResult, Content, ContentBlock, Message, ProviderError, Role};
use reqwest::{Client, StatusCode};
use std::time::Duration;

const CAPABILITIES: &[ProviderCapability] =
    &[ProviderCapability::Complete, ProviderCapability::HealthCheck];

const HEALTH_CHECK_MODEL: &str = "gemini-3-flash-preview";

/// Adapter for Gemini models via the Google generateContent API.
pub struct GeminiAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(api_key: impl Into<String>, deadline: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(deadline)
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }

    /// Split the common message list into the Gemini shape: system messages
    /// feed systemInstruction; assistant turns become role "model".
    fn build_request(messages: &[Message], params: &CompletionParams) -> GenerateContentRequest {
        let mut system_parts: Vec<Part> = Vec::new();
        let mut contents: Vec<ApiContent> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(Part::text(msg.content.as_text())),
                Role::User | Role::Assistant => {
                    let role = if msg.role == Role::Assistant {
                        "model"
                    } else {
                        "user"
                    };
                    contents.push(ApiContent {
                        role: Some(role.to_string()),
                        parts: Self::convert_content(&msg.content),
                    });
                }
            }
        }

        GenerateContentRequest {
            contents,
            system_instruction: if system_parts.is_empty() {
                None
            } else {
                Some(SystemInstruction {
                    parts: system_parts,
                })
            },
            generation_config: GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_tokens,
            },
        }
    }

    fn convert_content(content: &Content) -> Vec<Part> {
        match content {
            Content::Text(text) => vec![Part::text(text.clone())],
            Content::Blocks(blocks) => blocks
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => Part::text(text.clone()),
                    ContentBlock::Image { media_type, data } => Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: media_type.clone(),
                            data: data.clone(),
                        }),
                    },
                    other => Part::text(serde_json::to_string(other).unwrap_or_default()),
                })
                .collect(),
        }
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, ProviderError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );
        let response = self.client.post(&url).json(request).send().await.map_err(|e| {
            let message = if e.is_timeout() {
                "request timed out".to_string()
            } else {
                format!("HTTP request failed: {}", e)
            };
            ProviderError::Upstream {
                provider: "gemini".to_string(),
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
                    provider: "gemini".to_string(),
                    message: format!("Failed to parse response: {}", e),
                    retriable: false,
                    status: Some(status.as_u16()),
                });
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let error_msg = serde_json::from_str::<ApiError>(&error_text)
            .map(|e| e.error.message)
            .unwrap_or(error_text);
        let lowered = error_msg.to_lowercase();

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
                provider: "gemini".to_string(),
                retry_after_secs: None,
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Authentication {
                provider: "gemini".to_string(),
            },
            _ if lowered.contains("quota") || lowered.contains("rate") => {
                ProviderError::RateLimited {
                    provider: "gemini".to_string(),
                    retry_after_secs: None,
                }
            }
            _ if lowered.contains("api key") => ProviderError::Authentication {
                provider: "gemini".to_string(),
            },
            _ => ProviderError::Upstream {
                provider: "gemini".to_string(),
                message: error_msg,
                retriable: status.is_server_error(),
                status: Some(status.as_u16()),
            },
        })
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn provider_name(&self) -> &str {
        "gemini"
    }

    fn capabilities(&self) -> &[ProviderCapability] {
        CAPABILITIES
    }

    async fn complete(
        &self,
        messages: &[Message],
        model: &str,
        params: &CompletionParams,
    ) -> Result<CompletionResult, ProviderError> {
        let request = Self::build_request(messages, params);
        let response = self.generate(model, &request).await?;

        let candidate = response.candidates.first();
        let content = candidate
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let finish_reason = candidate.and_then(|c| c.finish_reason.clone());

        let usage = response.usage_metadata.unwrap_or(UsageMetadata {
            prompt_token_count: 0,
            candidates_token_count: 0,
            cached_content_token_count: 0,
        });

        Ok(CompletionResult {
            content,
            model: model.to_string(),
            provider: self.provider_name().to_string(),
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
            cached_input_tokens: usage.cached_content_token_count,
            finish_reason,
            thinking: None,
        })
    }

    async fn health_check(&self) -> bool {
        let request = GenerateContentRequest {
            contents: vec![ApiContent {
                role: Some("user".to_string()),
                parts: vec![Part::text("ping")],
            }],
            system_instruction: None,
            generation_config: GenerationConfig {
                temperature: 0.0,
                max_output_tokens: 8,
            },
        };
        match self.generate(HEALTH_CHECK_MODEL, &request).await {
            Ok(response) => !response.candidates.is_empty(),
            Err(e) => {
                tracing::warn!(error = %e, "Gemini health check failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for GeminiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiAdapter")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CompletionParams {
        CompletionParams {
            max_tokens: 256,
            temperature: 0.5,
            thinking_level: None,
        }
    }

    #[test]
    fn test_assistant_role_maps_to_model() {
        let messages = vec![Message::user("Hi"), Message::assistant("Hello")];
        let request = GeminiAdapter::build_request(&messages, &params());
        assert_eq!(request.contents[0].role.as_deref(), Some("user"));
        assert_eq!(request.contents[1].role.as_deref(), Some("model"));
    }

    #[test]
    fn test_system_message_routes_to_instruction_slot() {
        let messages = vec![Message::system("Answer in French."), Message::user("Hi")];
        let request = GeminiAdapter::build_request(&messages, &params());
        let instruction = request.system_instruction.expect("system instruction");
        assert_eq!(
            instruction.parts[0].text.as_deref(),
            Some("Answer in French.")
        );
        assert_eq!(request.contents.len(), 1);
    }

    #[test]
    fn test_generation_config_carries_params() {
        let request = GeminiAdapter::build_request(&[Message::user("Hi")], &params());
        assert_eq!(request.generation_config.max_output_tokens, 256);
        assert!((request.generation_config.temperature - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_response_parsing() -> Result<(), serde_json::Error> {
        let json = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "bonjour"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 3}
        }"#;
        let response: GenerateContentResponse = serde_json::from_str(json)?;
        assert_eq!(response.candidates.len(), 1);
        let usage = response.usage_metadata.expect("usage");
        assert_eq!(usage.prompt_token_count, 7);
        assert_eq!(usage.cached_content_token_count, 0);
        Ok(())
    }
}

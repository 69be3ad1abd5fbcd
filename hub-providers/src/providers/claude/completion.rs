//! Claude completion adapter implementation

use super::client::ClaudeClient;
use super::types::{
    ApiMessage, ImageSource, MessageRequest, MessageResponse, RequestBlock, ResponseBlock,
    ThinkingParam,
};
use crate::{CompletionParams, ProviderAdapter, ProviderCapability};
use async_trait::async_trait;
use hub_core::{CompletionResult, Content, ContentBlock, Message, ProviderError, Role, ThinkingLevel};
use std::time::Duration;

const CAPABILITIES: &[ProviderCapability] =
    &[ProviderCapability::Complete, ProviderCapability::HealthCheck];

const HEALTH_CHECK_MODEL: &str = "claude-haiku-4-5";

/// Adapter for Claude models via the Anthropic Messages API.
pub struct ClaudeAdapter {
    client: ClaudeClient,
}

impl ClaudeAdapter {
    pub fn new(api_key: impl Into<String>, deadline: Duration) -> Self {
        Self {
            client: ClaudeClient::new(api_key, deadline),
        }
    }

    /// Split the common message list into the Anthropic shape: system
    /// messages feed the dedicated system slot, the rest become
    /// user/assistant turns.
    fn build_request(
        messages: &[Message],
        model: &str,
        params: &CompletionParams,
    ) -> MessageRequest {
        let mut system_parts: Vec<String> = Vec::new();
        let mut api_messages: Vec<ApiMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(msg.content.as_text()),
                Role::User | Role::Assistant => api_messages.push(ApiMessage {
                    role: msg.role.as_str().to_string(),
                    content: Self::convert_content(&msg.content),
                }),
            }
        }

        MessageRequest {
            model: model.to_string(),
            messages: api_messages,
            max_tokens: params.max_tokens,
            system: if system_parts.is_empty() {
                None
            } else {
                Some(system_parts.join("\n\n"))
            },
            temperature: Some(params.temperature),
            thinking: params
                .thinking_level
                .map(|level| ThinkingParam::enabled(Self::thinking_budget(level))),
        }
    }

    fn thinking_budget(level: ThinkingLevel) -> u32 {
        match level {
            ThinkingLevel::Low => 2048,
            ThinkingLevel::Medium => 8192,
            ThinkingLevel::High => 16384,
        }
    }

    fn convert_content(content: &Content) -> Vec<RequestBlock> {
        match content {
            Content::Text(text) => vec![RequestBlock::Text { text: text.clone() }],
            Content::Blocks(blocks) => blocks
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => RequestBlock::Text { text: text.clone() },
                    ContentBlock::Image { media_type, data } => RequestBlock::Image {
                        source: ImageSource::base64(media_type.clone(), data.clone()),
                    },
                    // Tool traffic is carried as serialized text; the gateway
                    // does not replay tool calls against the vendor.
                    other => RequestBlock::Text {
                        text: serde_json::to_string(other).unwrap_or_default(),
                    },
                })
                .collect(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for ClaudeAdapter {
    fn provider_name(&self) -> &str {
        "claude"
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
        let request = Self::build_request(messages, model, params);
        let response: MessageResponse = self.client.request("messages", request).await?;

        let mut content_parts: Vec<&str> = Vec::new();
        let mut thinking: Option<String> = None;
        for block in &response.content {
            match block {
                ResponseBlock::Text { text } => content_parts.push(text),
                ResponseBlock::Thinking { thinking: t } => thinking = Some(t.clone()),
                ResponseBlock::Unknown => {}
            }
        }

        Ok(CompletionResult {
            content: content_parts.join("\n"),
            model: response.model,
            provider: self.provider_name().to_string(),
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            cached_input_tokens: response.usage.cache_read_input_tokens,
            finish_reason: response.stop_reason,
            thinking,
        })
    }

    async fn health_check(&self) -> bool {
        let request = MessageRequest {
            model: HEALTH_CHECK_MODEL.to_string(),
            messages: vec![ApiMessage {
                role: "user".to_string(),
                content: vec![RequestBlock::Text {
                    text: "ping".to_string(),
                }],
            }],
            max_tokens: 8,
            system: None,
            temperature: None,
            thinking: None,
        };
        match self
            .client
            .request::<_, MessageResponse>("messages", request)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Claude health check failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for ClaudeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeAdapter").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CompletionParams {
        CompletionParams {
            max_tokens: 512,
            temperature: 0.2,
            thinking_level: None,
        }
    }

    #[test]
    fn test_system_messages_feed_system_slot() {
        let messages = vec![
            Message::system("Be terse."),
            Message::user("Hello"),
            Message::assistant("Hi"),
        ];
        let request = ClaudeAdapter::build_request(&messages, "claude-sonnet-4-5", &params());

        assert_eq!(request.system.as_deref(), Some("Be terse."));
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "user");
        assert_eq!(request.messages[1].role, "assistant");
    }

    #[test]
    fn test_multiple_system_messages_joined() {
        let messages = vec![
            Message::system("First."),
            Message::system("Second."),
            Message::user("Hi"),
        ];
        let request = ClaudeAdapter::build_request(&messages, "claude-sonnet-4-5", &params());
        assert_eq!(request.system.as_deref(), Some("First.\n\nSecond."));
    }

    #[test]
    fn test_thinking_level_maps_to_budget() {
        let mut p = params();
        p.thinking_level = Some(ThinkingLevel::High);
        let request = ClaudeAdapter::build_request(&[Message::user("Hi")], "claude-opus-4-5", &p);
        let thinking = request.thinking.expect("thinking param");
        assert_eq!(thinking.budget_tokens, 16384);
        assert_eq!(thinking.thinking_type, "enabled");
    }

    #[test]
    fn test_image_blocks_convert_to_base64_source() {
        let content = Content::Blocks(vec![ContentBlock::Image {
            media_type: "image/png".to_string(),
            data: "aGVsbG8=".to_string(),
        }]);
        let blocks = ClaudeAdapter::convert_content(&content);
        assert!(matches!(&blocks[0], RequestBlock::Image { source } if source.media_type == "image/png"));
    }

    #[test]
    fn test_response_block_unknown_tolerated() -> Result<(), serde_json::Error> {
        let json = r#"[
            {"type": "text", "text": "hi"},
            {"type": "redacted_thinking", "data": "xxxx"}
        ]"#;
        let blocks: Vec<ResponseBlock> = serde_json::from_str(json)?;
        assert_eq!(blocks.len(), 2);
        assert!(matches!(blocks[1], ResponseBlock::Unknown));
        Ok(())
    }
}

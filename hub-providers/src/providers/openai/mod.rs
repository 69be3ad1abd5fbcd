//! OpenAI provider adapter - reserved slot.
//!
//! Exists so that requests naming OpenAI models fail with a clear typed
//! error rather than an unknown-provider surprise. Advertises no
//! capabilities; every operation reports "not supported".

use crate::{CompletionParams, ProviderAdapter, ProviderCapability};
use async_trait::async_trait;
use hub_core::{CompletionResult, Message, ProviderError};

/// Placeholder adapter for OpenAI models.
#[derive(Debug, Default)]
pub struct OpenAiAdapter;

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self
    }

    fn not_supported(operation: &str) -> ProviderError {
        ProviderError::NotSupported {
            provider: "openai".to_string(),
            operation: format!(
                "{} (supported providers: claude, gemini)",
                operation
            ),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn capabilities(&self) -> &[ProviderCapability] {
        &[]
    }

    async fn complete(
        &self,
        _messages: &[Message],
        _model: &str,
        _params: &CompletionParams,
    ) -> Result<CompletionResult, ProviderError> {
        Err(Self::not_supported("complete"))
    }

    async fn health_check(&self) -> bool {
        false
    }
}

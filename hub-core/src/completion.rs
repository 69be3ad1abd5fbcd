//! Completion request and result types.

use crate::Message;
use serde::{Deserialize, Serialize};

// ============================================================================
// THINKING LEVEL
// ============================================================================

/// Requested extended-thinking effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    Low,
    Medium,
    High,
}

impl ThinkingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

// ============================================================================
// COMPLETION REQUEST
// ============================================================================

/// An accepted completion request. Immutable after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model hint; when absent the tier classifier picks one.
    #[serde(default)]
    pub model: Option<String>,
    /// Ordered conversation messages.
    pub messages: Vec<Message>,
    /// Maximum tokens in the response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Existing session to continue, if any.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Project tag for memory scoping and access checks.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Caller-supplied correlation id, stored on the session and used to
    /// key experiment variant assignment.
    #[serde(default)]
    pub external_id: Option<String>,
    /// Extended-thinking effort, if requested.
    #[serde(default)]
    pub thinking_level: Option<ThinkingLevel>,
    /// Opt out of response caching for this request.
    #[serde(default)]
    pub no_cache: bool,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    1.0
}

impl CompletionRequest {
    /// Text of the last user message, used for classification and memory
    /// retrieval. Empty string when no user message is present.
    pub fn last_user_text(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::Role::User)
            .map(|m| m.content.as_text())
            .unwrap_or_default()
    }
}

// ============================================================================
// COMPLETION RESULT
// ============================================================================

/// Result from a served completion. Produced once per successful provider
/// call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub content: String,
    /// Model that actually served the request (post-remap on fallback).
    pub model: String,
    /// Provider that actually served the request.
    pub provider: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Input tokens served from the provider-side prompt cache.
    #[serde(default)]
    pub cached_input_tokens: u32,
    pub finish_reason: Option<String>,
    /// Thinking block emitted alongside the answer, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

impl CompletionResult {
    /// Whether the response stopped because the output budget ran out.
    pub fn is_truncated(&self) -> bool {
        matches!(
            self.finish_reason.as_deref(),
            Some("max_tokens") | Some("length") | Some("MAX_TOKENS")
        )
    }

    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

//! Agent Hub Providers - Vendor Adapter Layer
//!
//! Provider-agnostic async trait for chat completions plus the concrete
//! vendor adapters. Each adapter normalizes one vendor's protocol into the
//! common contract:
//! - Async trait with tokio support
//! - Exhaustive vendor error mapping into `ProviderError`
//! - Capability sets so callers test capabilities rather than types
//! - Process-scope credential store passed by reference

pub mod providers;

use async_trait::async_trait;
use hub_core::{CompletionResult, HubConfig, Message, ProviderError, ThinkingLevel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use providers::claude::ClaudeAdapter;
pub use providers::gemini::GeminiAdapter;
pub use providers::openai::OpenAiAdapter;

// ============================================================================
// CAPABILITIES
// ============================================================================

/// Operations a provider can offer. Callers test capabilities rather than
/// downcasting adapter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCapability {
    Complete,
    HealthCheck,
    Stream,
}

// ============================================================================
// COMPLETION PARAMETERS
// ============================================================================

/// Request parameters shared by all adapters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub thinking_level: Option<ThinkingLevel>,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 1.0,
            thinking_level: None,
        }
    }
}

// ============================================================================
// PROVIDER ADAPTER TRAIT
// ============================================================================

/// Adapter trait normalizing one vendor's protocol.
///
/// Implementations must be safe to call concurrently with distinct requests
/// and must not hold request-scoped state across calls.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider name (e.g. "claude", "gemini").
    fn provider_name(&self) -> &str;

    /// Capabilities this adapter offers.
    fn capabilities(&self) -> &[ProviderCapability];

    /// Generate a completion for the given messages.
    async fn complete(
        &self,
        messages: &[Message],
        model: &str,
        params: &CompletionParams,
    ) -> Result<CompletionResult, ProviderError>;

    /// Check whether the provider is reachable and serving.
    async fn health_check(&self) -> bool;
}

impl std::fmt::Debug for dyn ProviderAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAdapter")
            .field("provider_name", &self.provider_name())
            .finish()
    }
}

// ============================================================================
// CREDENTIAL STORE
// ============================================================================

/// Process-scope credential cache, loaded once at startup and passed by
/// reference to adapters.
#[derive(Clone, Default)]
pub struct CredentialStore {
    keys: HashMap<String, String>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load provider API keys from configuration.
    pub fn from_config(config: &HubConfig) -> Self {
        let mut keys = HashMap::new();
        if let Some(key) = &config.anthropic_api_key {
            keys.insert("claude".to_string(), key.clone());
        }
        if let Some(key) = &config.gemini_api_key {
            keys.insert("gemini".to_string(), key.clone());
        }
        tracing::info!(loaded = keys.len(), "Loaded provider credentials");
        Self { keys }
    }

    pub fn api_key(&self, provider: &str) -> Option<&str> {
        self.keys.get(provider).map(String::as_str)
    }

    pub fn set(&mut self, provider: impl Into<String>, key: impl Into<String>) {
        self.keys.insert(provider.into(), key.into());
    }

    /// Providers with configured credentials, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = self.keys.keys().cloned().collect();
        providers.sort();
        providers
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("providers", &self.providers())
            .finish()
    }
}

// ============================================================================
// ADAPTER REGISTRY
// ============================================================================

/// Registry of long-lived adapter singletons, keyed by provider name.
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Build the standard registry from credentials: claude and gemini when
    /// keys are present, plus the reserved openai slot.
    pub fn from_credentials(credentials: &CredentialStore, deadline: Duration) -> Self {
        let mut registry = Self::new();
        if let Some(key) = credentials.api_key("claude") {
            registry.register(Arc::new(ClaudeAdapter::new(key, deadline)));
        }
        if let Some(key) = credentials.api_key("gemini") {
            registry.register(Arc::new(GeminiAdapter::new(key, deadline)));
        }
        registry.register(Arc::new(OpenAiAdapter::new()));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters
            .insert(adapter.provider_name().to_string(), adapter);
    }

    /// Look up an adapter by provider name.
    pub fn get(&self, provider: &str) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        self.adapters
            .get(provider)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider {
                provider: provider.to_string(),
            })
    }

    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }

    /// Adapters advertising a capability.
    pub fn with_capability(&self, capability: ProviderCapability) -> Vec<Arc<dyn ProviderAdapter>> {
        self.adapters
            .values()
            .filter(|a| a.capabilities().contains(&capability))
            .cloned()
            .collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("providers", &self.provider_names())
            .finish()
    }
}

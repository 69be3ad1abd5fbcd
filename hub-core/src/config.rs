//! Gateway configuration.
//!
//! Loaded from environment variables with compiled defaults. Every knob the
//! resilience plane recognizes lives here; components receive their slice of
//! the config by value at construction.

use crate::{ConfigError, SessionKind};
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

const DEFAULT_PROVIDER_CHAIN: &[&str] = &["claude", "gemini"];
const DEFAULT_CIRCUIT_THRESHOLD: u32 = 2;
const DEFAULT_CIRCUIT_COOLDOWN_BASE_SECS: u64 = 30;
const DEFAULT_CIRCUIT_COOLDOWN_MAX_SECS: u64 = 300;
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_CACHE_CAPACITY: usize = 1000;
const DEFAULT_CACHE_TEMPERATURE_CUTOFF: f32 = 0.7;
const DEFAULT_MEMORY_TOTAL_BUDGET: u32 = 3500;
const DEFAULT_WEBHOOK_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_WEBHOOK_BACKOFF_CAP_SECS: u64 = 300;
const DEFAULT_WEBHOOK_QUEUE_CAPACITY: usize = 64;
const DEFAULT_ADAPTER_DEADLINE_SECS: u64 = 120;

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// ============================================================================
// COMPONENT CONFIGS
// ============================================================================

/// Circuit breaker tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitConfig {
    /// Consecutive failures that trip the breaker. Aligned with the
    /// thrashing threshold by default.
    pub threshold: u32,
    /// Cooldown after the first trip; grows with consecutive failures.
    pub cooldown_base: Duration,
    /// Upper bound on the grown cooldown.
    pub cooldown_max: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CIRCUIT_THRESHOLD,
            cooldown_base: Duration::from_secs(DEFAULT_CIRCUIT_COOLDOWN_BASE_SECS),
            cooldown_max: Duration::from_secs(DEFAULT_CIRCUIT_COOLDOWN_MAX_SECS),
        }
    }
}

/// Response cache tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub ttl: Duration,
    /// Maximum entry count; LRU eviction on overflow.
    pub capacity: usize,
    /// Requests with temperature above this are never cached.
    pub temperature_cutoff: f32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            capacity: DEFAULT_CACHE_CAPACITY,
            temperature_cutoff: DEFAULT_CACHE_TEMPERATURE_CUTOFF,
        }
    }
}

/// Memory injection defaults; the admin surface can override the singleton
/// at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    pub enabled: bool,
    pub budget_enabled: bool,
    pub total_budget: u32,
    pub mandates_fraction: f32,
    pub guardrails_fraction: f32,
    pub reference_fraction: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            budget_enabled: true,
            total_budget: DEFAULT_MEMORY_TOTAL_BUDGET,
            mandates_fraction: 0.50,
            guardrails_fraction: 0.30,
            reference_fraction: 0.20,
        }
    }
}

/// Idle timeouts per session kind, in minutes.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionTimeouts {
    pub completion: u64,
    pub chat: u64,
    pub roundtable: u64,
    pub image_generation: u64,
    pub agent: u64,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            completion: 30,
            chat: 60,
            roundtable: 120,
            image_generation: 30,
            agent: 240,
        }
    }
}

impl SessionTimeouts {
    /// Idle timeout for a session kind.
    pub fn for_kind(&self, kind: SessionKind) -> Duration {
        let minutes = match kind {
            SessionKind::Completion => self.completion,
            SessionKind::Chat => self.chat,
            SessionKind::Roundtable => self.roundtable,
            SessionKind::ImageGeneration => self.image_generation,
            SessionKind::Agent => self.agent,
        };
        Duration::from_secs(minutes * 60)
    }
}

/// Webhook delivery tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookConfig {
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Per-subscription in-memory queue depth.
    pub queue_capacity: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_WEBHOOK_MAX_ATTEMPTS,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(DEFAULT_WEBHOOK_BACKOFF_CAP_SECS),
            queue_capacity: DEFAULT_WEBHOOK_QUEUE_CAPACITY,
        }
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Master configuration for the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
    /// Ordered provider fallback chain.
    pub provider_chain: Vec<String>,
    /// Anthropic API key, if configured.
    pub anthropic_api_key: Option<String>,
    /// Google API key, if configured.
    pub gemini_api_key: Option<String>,
    pub circuit: CircuitConfig,
    pub cache: CacheConfig,
    pub memory: MemoryConfig,
    pub session_timeouts: SessionTimeouts,
    pub webhook: WebhookConfig,
    /// Per-call deadline for adapter network calls. Generous to accommodate
    /// extended thinking.
    pub adapter_deadline: Duration,
    pub bind_host: String,
    pub bind_port: u16,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            provider_chain: DEFAULT_PROVIDER_CHAIN
                .iter()
                .map(|s| s.to_string())
                .collect(),
            anthropic_api_key: None,
            gemini_api_key: None,
            circuit: CircuitConfig::default(),
            cache: CacheConfig::default(),
            memory: MemoryConfig::default(),
            session_timeouts: SessionTimeouts::default(),
            webhook: WebhookConfig::default(),
            adapter_deadline: Duration::from_secs(DEFAULT_ADAPTER_DEADLINE_SECS),
            bind_host: "0.0.0.0".to_string(),
            bind_port: 8003,
        }
    }
}

impl HubConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `AGENTHUB_PROVIDER_CHAIN`: Comma-separated provider order (default: "claude,gemini")
    /// - `ANTHROPIC_API_KEY` / `GEMINI_API_KEY`: Provider credentials
    /// - `AGENTHUB_CIRCUIT_THRESHOLD`: Failures before the breaker trips (default: 2)
    /// - `AGENTHUB_CIRCUIT_COOLDOWN_BASE_SECS` / `AGENTHUB_CIRCUIT_COOLDOWN_MAX_SECS`
    /// - `AGENTHUB_CACHE_TTL_SECS`, `AGENTHUB_CACHE_CAPACITY`, `AGENTHUB_CACHE_TEMPERATURE_CUTOFF`
    /// - `AGENTHUB_MEMORY_ENABLED`, `AGENTHUB_MEMORY_BUDGET_ENABLED`, `AGENTHUB_MEMORY_TOTAL_BUDGET`
    /// - `AGENTHUB_SESSION_TIMEOUT_<KIND>_MINS` for each session kind
    /// - `AGENTHUB_WEBHOOK_MAX_ATTEMPTS`, `AGENTHUB_WEBHOOK_BACKOFF_CAP_SECS`
    /// - `AGENTHUB_ADAPTER_DEADLINE_SECS` (default: 120)
    /// - `AGENTHUB_BIND`, `PORT`
    pub fn from_env() -> Self {
        let provider_chain = std::env::var("AGENTHUB_PROVIDER_CHAIN")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_lowercase())
                    .filter(|p| !p.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|chain| !chain.is_empty())
            .unwrap_or_else(|| {
                DEFAULT_PROVIDER_CHAIN
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            });

        let memory_enabled = std::env::var("AGENTHUB_MEMORY_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);
        let budget_enabled = std::env::var("AGENTHUB_MEMORY_BUDGET_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            provider_chain,
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty()),
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()),
            circuit: CircuitConfig {
                threshold: env_parse("AGENTHUB_CIRCUIT_THRESHOLD", DEFAULT_CIRCUIT_THRESHOLD),
                cooldown_base: Duration::from_secs(env_parse(
                    "AGENTHUB_CIRCUIT_COOLDOWN_BASE_SECS",
                    DEFAULT_CIRCUIT_COOLDOWN_BASE_SECS,
                )),
                cooldown_max: Duration::from_secs(env_parse(
                    "AGENTHUB_CIRCUIT_COOLDOWN_MAX_SECS",
                    DEFAULT_CIRCUIT_COOLDOWN_MAX_SECS,
                )),
            },
            cache: CacheConfig {
                ttl: Duration::from_secs(env_parse(
                    "AGENTHUB_CACHE_TTL_SECS",
                    DEFAULT_CACHE_TTL_SECS,
                )),
                capacity: env_parse("AGENTHUB_CACHE_CAPACITY", DEFAULT_CACHE_CAPACITY),
                temperature_cutoff: env_parse(
                    "AGENTHUB_CACHE_TEMPERATURE_CUTOFF",
                    DEFAULT_CACHE_TEMPERATURE_CUTOFF,
                ),
            },
            memory: MemoryConfig {
                enabled: memory_enabled,
                budget_enabled,
                total_budget: env_parse(
                    "AGENTHUB_MEMORY_TOTAL_BUDGET",
                    DEFAULT_MEMORY_TOTAL_BUDGET,
                ),
                ..MemoryConfig::default()
            },
            session_timeouts: SessionTimeouts {
                completion: env_parse("AGENTHUB_SESSION_TIMEOUT_COMPLETION_MINS", 30),
                chat: env_parse("AGENTHUB_SESSION_TIMEOUT_CHAT_MINS", 60),
                roundtable: env_parse("AGENTHUB_SESSION_TIMEOUT_ROUNDTABLE_MINS", 120),
                image_generation: env_parse("AGENTHUB_SESSION_TIMEOUT_IMAGE_GENERATION_MINS", 30),
                agent: env_parse("AGENTHUB_SESSION_TIMEOUT_AGENT_MINS", 240),
            },
            webhook: WebhookConfig {
                max_attempts: env_parse(
                    "AGENTHUB_WEBHOOK_MAX_ATTEMPTS",
                    DEFAULT_WEBHOOK_MAX_ATTEMPTS,
                ),
                backoff_base: Duration::from_secs(env_parse("AGENTHUB_WEBHOOK_BACKOFF_BASE_SECS", 1)),
                backoff_cap: Duration::from_secs(env_parse(
                    "AGENTHUB_WEBHOOK_BACKOFF_CAP_SECS",
                    DEFAULT_WEBHOOK_BACKOFF_CAP_SECS,
                )),
                queue_capacity: env_parse(
                    "AGENTHUB_WEBHOOK_QUEUE_CAPACITY",
                    DEFAULT_WEBHOOK_QUEUE_CAPACITY,
                ),
            },
            adapter_deadline: Duration::from_secs(env_parse(
                "AGENTHUB_ADAPTER_DEADLINE_SECS",
                DEFAULT_ADAPTER_DEADLINE_SECS,
            )),
            bind_host: std::env::var("AGENTHUB_BIND").unwrap_or_else(|_| "0.0.0.0".to_string()),
            bind_port: env_parse("PORT", 8003),
        }
    }

    /// Validate invariants that cannot be expressed in the type system.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider_chain.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "provider_chain".to_string(),
            });
        }
        if self.circuit.threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "circuit.threshold".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let fractions = self.memory.mandates_fraction
            + self.memory.guardrails_fraction
            + self.memory.reference_fraction;
        if !(0.99..=1.01).contains(&fractions) {
            return Err(ConfigError::InvalidValue {
                field: "memory.tier_fractions".to_string(),
                value: format!("{:.2}", fractions),
                reason: "tier fractions must sum to 1.0".to_string(),
            });
        }
        if self.webhook.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "webhook.max_attempts".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

//! Error types for Agent Hub operations

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Provider and chain-traversal errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("Rate limit exceeded for {provider}")]
    RateLimited {
        provider: String,
        /// Seconds the vendor asked us to wait, if it said.
        retry_after_secs: Option<u64>,
    },

    #[error("Authentication failed for {provider}")]
    Authentication { provider: String },

    #[error("Request to {provider} failed: {message}")]
    Upstream {
        provider: String,
        message: String,
        retriable: bool,
        status: Option<u16>,
    },

    #[error("Circuit open for {provider} until {cooldown_until} ({consecutive_failures} consecutive failures)")]
    CircuitOpen {
        provider: String,
        consecutive_failures: u32,
        last_error_signature: String,
        cooldown_until: DateTime<Utc>,
    },

    #[error("Provider {provider} does not support {operation}")]
    NotSupported { provider: String, operation: String },

    #[error("Unknown provider: {provider}")]
    UnknownProvider { provider: String },

    #[error("No API key configured for {provider}")]
    MissingCredentials { provider: String },

    #[error("All providers exhausted; last error: {last}")]
    Exhausted { last: Box<ProviderError> },
}

impl ProviderError {
    /// Whether trying again later could plausibly succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Upstream { retriable, .. } => *retriable,
            Self::CircuitOpen { .. } => true,
            Self::Exhausted { last } => last.is_retriable(),
            Self::Authentication { .. }
            | Self::NotSupported { .. }
            | Self::UnknownProvider { .. }
            | Self::MissingCredentials { .. } => false,
        }
    }

    /// Whether this failure reflects caller or deployment configuration
    /// rather than provider health. Config errors skip the error tracker.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. }
                | Self::NotSupported { .. }
                | Self::UnknownProvider { .. }
                | Self::MissingCredentials { .. }
        )
    }

    /// Stable kind name used as the leading field of an error signature.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "RateLimitError",
            Self::Authentication { .. } => "AuthenticationError",
            Self::Upstream { .. } => "ProviderError",
            Self::CircuitOpen { .. } => "CircuitBreakerError",
            Self::NotSupported { .. } => "NotSupportedError",
            Self::UnknownProvider { .. } => "UnknownProviderError",
            Self::MissingCredentials { .. } => "MissingCredentialsError",
            Self::Exhausted { .. } => "AllProvidersExhaustedError",
        }
    }

    /// Provider the error is attributed to.
    pub fn provider(&self) -> &str {
        match self {
            Self::RateLimited { provider, .. }
            | Self::Authentication { provider }
            | Self::Upstream { provider, .. }
            | Self::CircuitOpen { provider, .. }
            | Self::NotSupported { provider, .. }
            | Self::UnknownProvider { provider }
            | Self::MissingCredentials { provider } => provider,
            Self::Exhausted { last } => last.provider(),
        }
    }
}

/// Request validation errors, fast-failed at the router boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Provider chain is empty")]
    EmptyChain,
}

/// Session lifecycle errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session not found: {id}")]
    NotFound { id: String },

    #[error("Session {id} is {status}, not active")]
    Closed { id: String, status: String },
}

/// Access-layer denials.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("Unknown client: {client_id}")]
    UnknownClient { client_id: String },

    /// Kill switch: the reason is surfaced verbatim so SDKs can enter
    /// dormant mode.
    #[error("{reason}")]
    Suspended { client_id: String, reason: String },

    #[error("Client {client_id} is disabled")]
    Disabled { client_id: String },

    #[error("Quota exceeded for {client_id}: {limit} {unit} per minute")]
    QuotaExceeded {
        client_id: String,
        limit: u32,
        unit: String,
    },

    #[error("Client {client_id} is not allowed to use project {project_id}")]
    ProjectNotAllowed {
        client_id: String,
        project_id: String,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Agent Hub errors.
#[derive(Debug, Clone, Error)]
pub enum HubError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Access error: {0}")]
    Access(#[from] AccessError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Data-plane failures (store writes, serialization) that must not be
    /// swallowed.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Agent Hub operations.
pub type HubResult<T> = Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(ProviderError::RateLimited {
            provider: "claude".to_string(),
            retry_after_secs: Some(30),
        }
        .is_retriable());

        assert!(!ProviderError::Authentication {
            provider: "gemini".to_string(),
        }
        .is_retriable());

        assert!(ProviderError::Upstream {
            provider: "claude".to_string(),
            message: "upstream timeout".to_string(),
            retriable: true,
            status: Some(503),
        }
        .is_retriable());
    }

    #[test]
    fn test_config_errors_skip_tracking() {
        assert!(ProviderError::MissingCredentials {
            provider: "claude".to_string(),
        }
        .is_config());
        assert!(!ProviderError::RateLimited {
            provider: "claude".to_string(),
            retry_after_secs: None,
        }
        .is_config());
    }

    #[test]
    fn test_exhausted_delegates_to_last() {
        let err = ProviderError::Exhausted {
            last: Box::new(ProviderError::RateLimited {
                provider: "gemini".to_string(),
                retry_after_secs: Some(10),
            }),
        };
        assert!(err.is_retriable());
        assert_eq!(err.provider(), "gemini");
    }

    #[test]
    fn test_suspension_reason_verbatim() {
        let err = AccessError::Suspended {
            client_id: "cli-1".to_string(),
            reason: "Disabled pending billing review".to_string(),
        };
        assert_eq!(err.to_string(), "Disabled pending billing review");
    }
}

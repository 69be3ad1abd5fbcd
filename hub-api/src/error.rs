//! Error Types for the Agent Hub API
//!
//! Defines the structured error surface for the HTTP layer:
//! - ApiError struct for structured error responses
//! - ErrorCode enum mapping onto HTTP status codes
//! - IntoResponse implementation carrying Retry-After semantics
//!
//! Provider and access failures map onto the wire contract: rate limits are
//! 429 with a Retry-After header, kill-switch denials are 403 with the
//! `Retry-After: -1` sentinel that tells SDKs to go dormant.

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use hub_core::{AccessError, HubError, ProviderError, SessionError, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Retry-After value for kill-switch denials. Clients seeing this MUST enter
/// dormant mode.
pub const KILL_SWITCH_RETRY_AFTER: i64 = -1;

const DEFAULT_RATE_LIMIT_RETRY_AFTER: i64 = 60;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Request lacks valid credentials, or every provider rejected ours
    Unauthorized,

    /// Request is authenticated but denied (including kill switch)
    Forbidden,

    /// Request validation failed
    ValidationFailed,

    /// Referenced session does not exist
    SessionNotFound,

    /// Referenced session is no longer active
    SessionClosed,

    /// Requested entity does not exist
    EntityNotFound,

    /// Rate limited upstream or by client quota
    RateLimited,

    /// Every provider in the chain is unavailable
    ServiceUnavailable,

    /// Internal server error
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::ValidationFailed | ErrorCode::SessionNotFound => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ErrorCode::SessionClosed => StatusCode::CONFLICT,
            ErrorCode::EntityNotFound => StatusCode::NOT_FOUND,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Seconds to wait before retrying; -1 is the dormant-mode sentinel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<i64>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: i64) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn not_found(entity: &str, id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::EntityNotFound,
            format!("{} {} not found", entity, id),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = self.retry_after;
        let mut response = (status, Json(self)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

fn from_provider_error(err: &ProviderError) -> ApiError {
    match err {
        ProviderError::RateLimited {
            retry_after_secs, ..
        } => ApiError::new(ErrorCode::RateLimited, err.to_string()).with_retry_after(
            retry_after_secs
                .map(|s| s as i64)
                .unwrap_or(DEFAULT_RATE_LIMIT_RETRY_AFTER),
        ),
        ProviderError::Authentication { .. } => {
            ApiError::new(ErrorCode::Unauthorized, err.to_string())
        }
        ProviderError::CircuitOpen { .. } => {
            ApiError::new(ErrorCode::ServiceUnavailable, err.to_string())
        }
        ProviderError::Exhausted { last } => {
            // The chain was exhausted; surface the character of the last
            // failure. Config problems become a plain 500.
            match last.as_ref() {
                ProviderError::RateLimited { .. }
                | ProviderError::Authentication { .. }
                | ProviderError::CircuitOpen { .. } => from_provider_error(last),
                inner if inner.is_config() => ApiError::internal(err.to_string()),
                _ => ApiError::new(ErrorCode::ServiceUnavailable, err.to_string()),
            }
        }
        ProviderError::NotSupported { .. }
        | ProviderError::UnknownProvider { .. }
        | ProviderError::MissingCredentials { .. } => ApiError::internal(err.to_string()),
        ProviderError::Upstream { .. } => {
            ApiError::new(ErrorCode::ServiceUnavailable, err.to_string())
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        from_provider_error(&err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::validation(err.to_string())
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match &err {
            SessionError::NotFound { .. } => {
                ApiError::new(ErrorCode::SessionNotFound, err.to_string())
            }
            SessionError::Closed { .. } => {
                ApiError::new(ErrorCode::SessionClosed, err.to_string())
            }
        }
    }
}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        match &err {
            // Kill switch: reason verbatim plus the dormant-mode sentinel.
            AccessError::Suspended { .. } | AccessError::Disabled { .. } => {
                ApiError::new(ErrorCode::Forbidden, err.to_string())
                    .with_retry_after(KILL_SWITCH_RETRY_AFTER)
            }
            AccessError::QuotaExceeded { .. } => {
                ApiError::new(ErrorCode::RateLimited, err.to_string())
                    .with_retry_after(DEFAULT_RATE_LIMIT_RETRY_AFTER)
            }
            AccessError::UnknownClient { .. } => {
                ApiError::new(ErrorCode::Unauthorized, err.to_string())
            }
            AccessError::ProjectNotAllowed { .. } => {
                ApiError::new(ErrorCode::Forbidden, err.to_string())
            }
        }
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Provider(e) => e.into(),
            HubError::Validation(e) => e.into(),
            HubError::Session(e) => e.into(),
            HubError::Access(e) => e.into(),
            HubError::Config(e) => ApiError::internal(e.to_string()),
            HubError::Internal(message) => ApiError::internal(message),
        }
    }
}

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

//! Completion endpoint.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::{extract::State, http::HeaderMap, Json};
use hub_core::CompletionRequest;
use serde::{Deserialize, Serialize};

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageInfo {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

/// Response body for the completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    /// Model that actually served the request
    pub model: String,
    /// Provider that served the request
    pub provider: String,
    pub usage: UsageInfo,
    /// Session ID for continuing the conversation
    pub session_id: String,
    pub finish_reason: Option<String>,
    /// Complexity tier the request was classified into
    pub tier: u8,
    /// Whether the response was served from the cache
    pub cached: bool,
}

/// POST /api/complete - Generate a completion for the given messages.
///
/// Routes through tier classification, the response cache, memory injection
/// and the provider chain. The optional `X-Client-Id` header enables access
/// control and quota enforcement.
pub async fn complete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CompletionRequest>,
) -> ApiResult<Json<CompletionResponse>> {
    let client_id = headers
        .get("x-client-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let served = state.gateway.complete(client_id.as_deref(), request).await?;

    Ok(Json(CompletionResponse {
        content: served.result.content.clone(),
        model: served.result.model.clone(),
        provider: served.result.provider.clone(),
        usage: UsageInfo {
            input_tokens: served.result.input_tokens,
            output_tokens: served.result.output_tokens,
            total_tokens: served.result.total_tokens(),
        },
        session_id: served.session_id,
        finish_reason: served.result.finish_reason,
        tier: served.tier.as_u8(),
        cached: served.from_cache,
    }))
}

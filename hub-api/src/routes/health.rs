//! Health endpoint.

use crate::state::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub uptime_secs: u64,
    /// Per-provider reachability from the adapters' health checks.
    pub providers: HashMap<String, bool>,
}

/// GET /health - Service health with per-provider reachability.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let providers = state.gateway.provider_health().await;
    Json(HealthResponse {
        status: "healthy",
        service: "agent-hub",
        uptime_secs: state.start_time.elapsed().as_secs(),
        providers,
    })
}

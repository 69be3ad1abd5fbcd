//! Memory settings admin surface.

use crate::state::AppState;
use axum::{extract::State, Json};
use hub_memory::{MemorySettings, MemorySettingsUpdate};

/// GET /api/memory/settings - Current memory injection settings.
pub async fn get_settings(State(state): State<AppState>) -> Json<MemorySettings> {
    Json(state.gateway.injector().settings().get())
}

/// PUT /api/memory/settings - Partially update the settings singleton.
pub async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<MemorySettingsUpdate>,
) -> Json<MemorySettings> {
    Json(state.gateway.injector().settings().update(update))
}

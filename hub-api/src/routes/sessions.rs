//! Session inspection endpoints.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use hub_core::{Session, StoredMessage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<Session>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionDetailResponse {
    pub session: Session,
    pub messages: Vec<StoredMessage>,
}

/// GET /api/sessions - List sessions, newest first.
pub async fn list_sessions(State(state): State<AppState>) -> Json<ListSessionsResponse> {
    let sessions = state.gateway.sessions().list();
    let total = sessions.len();
    Json(ListSessionsResponse { sessions, total })
}

/// GET /api/sessions/{id} - A session with its ordered message log.
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionDetailResponse>> {
    let record = state
        .gateway
        .sessions()
        .get(&id)
        .map_err(|_| ApiError::not_found("Session", &id))?;
    Ok(Json(SessionDetailResponse {
        session: record.session,
        messages: record.messages,
    }))
}

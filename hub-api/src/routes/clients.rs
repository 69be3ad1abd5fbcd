//! Client access-control admin endpoints.

use crate::access::Client;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateClientRequest {
    pub id: String,
    pub display_name: String,
    pub rate_limit_rpm: Option<u32>,
    pub rate_limit_tpm: Option<u32>,
    pub allowed_projects: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuspendClientRequest {
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListClientsResponse {
    pub clients: Vec<Client>,
    pub total: usize,
}

/// POST /api/clients - Register a client.
pub async fn create_client(
    State(state): State<AppState>,
    Json(req): Json<CreateClientRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.id.trim().is_empty() {
        return Err(ApiError::validation("Client id must not be blank"));
    }
    let mut client = Client::new(req.id, req.display_name);
    client.rate_limit_rpm = req.rate_limit_rpm;
    client.rate_limit_tpm = req.rate_limit_tpm;
    client.allowed_projects = req.allowed_projects;
    state.gateway.access().upsert(client.clone());
    tracing::info!(client_id = %client.id, "Client registered");
    Ok((StatusCode::CREATED, Json(client)))
}

/// GET /api/clients - List registered clients.
pub async fn list_clients(State(state): State<AppState>) -> Json<ListClientsResponse> {
    let clients = state.gateway.access().list();
    let total = clients.len();
    Json(ListClientsResponse { clients, total })
}

/// POST /api/clients/{id}/suspend - Flip the kill switch.
pub async fn suspend_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SuspendClientRequest>,
) -> ApiResult<Json<Client>> {
    let client = state
        .gateway
        .access()
        .suspend(&id, req.reason)
        .ok_or_else(|| ApiError::not_found("Client", &id))?;
    tracing::warn!(client_id = %id, "Client suspended");
    Ok(Json(client))
}

/// POST /api/clients/{id}/reinstate - Clear a suspension.
pub async fn reinstate_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Client>> {
    let client = state
        .gateway
        .access()
        .reinstate(&id)
        .ok_or_else(|| ApiError::not_found("Client", &id))?;
    tracing::info!(client_id = %id, "Client reinstated");
    Ok(Json(client))
}

//! Shared application state for Axum routers.

use crate::gateway::Gateway;
use crate::jobs::SessionReaperMetrics;
use crate::webhooks::WebhookDispatcher;
use axum::extract::FromRef;
use hub_router::RouterMetrics;
use std::sync::Arc;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub webhooks: Arc<WebhookDispatcher>,
    pub router_metrics: Arc<RouterMetrics>,
    pub reaper_metrics: Arc<SessionReaperMetrics>,
    pub start_time: std::time::Instant,
}

// Webhook routes extract their dispatcher as a substate.
impl FromRef<AppState> for Arc<WebhookDispatcher> {
    fn from_ref(state: &AppState) -> Self {
        state.webhooks.clone()
    }
}

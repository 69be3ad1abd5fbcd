//! Agent Hub API - HTTP Gateway Surface
//!
//! Axum REST layer over the routing/resilience plane: the completion
//! endpoint, session and client administration, memory settings, webhook
//! subscriptions, the session reaper job, and Prometheus telemetry.

pub mod access;
pub mod error;
pub mod events;
pub mod gateway;
pub mod jobs;
pub mod routes;
pub mod sessions;
pub mod state;
pub mod telemetry;
pub mod webhooks;

pub use access::{Client, ClientRegistry, ClientStatus};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use events::{EventBus, HubEvent};
pub use gateway::{build_gateway, Gateway, ServedCompletion};
pub use sessions::{SessionRecord, SessionStore};
pub use state::AppState;
pub use webhooks::WebhookDispatcher;

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Record request count and latency for every handled request.
async fn track_http(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let start = std::time::Instant::now();

    let response = next.run(req).await;

    if let Ok(metrics) = telemetry::METRICS.as_ref() {
        metrics.record_http_request(
            &method,
            &path,
            response.status().as_u16(),
            start.elapsed().as_secs_f64(),
        );
    }
    response
}

/// Build the full API router.
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/metrics", get(telemetry::metrics_handler))
        .route("/api/complete", post(routes::complete::complete))
        .route("/api/sessions", get(routes::sessions::list_sessions))
        .route("/api/sessions/:id", get(routes::sessions::get_session))
        .route(
            "/api/memory/settings",
            get(routes::memory_settings::get_settings),
        )
        .route(
            "/api/memory/settings",
            put(routes::memory_settings::update_settings),
        )
        .route("/api/clients", post(routes::clients::create_client))
        .route("/api/clients", get(routes::clients::list_clients))
        .route(
            "/api/clients/:id/suspend",
            post(routes::clients::suspend_client),
        )
        .route(
            "/api/clients/:id/reinstate",
            post(routes::clients::reinstate_client),
        )
        .nest("/api/webhooks", webhooks::router())
        .layer(middleware::from_fn(track_http))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

//! Prometheus Metrics Definitions
//!
//! Defines the gateway's metric series and the /metrics endpoint. The
//! resilience plane keeps its counters as plain atomics; they are published
//! here as gauges synced at scrape time so the router crates stay free of
//! HTTP-layer dependencies.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge, CounterVec, Encoder,
    HistogramVec, IntGauge, TextEncoder,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// HTTP request latency buckets (seconds)
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0, 30.0, 120.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<HubMetrics>> = Lazy::new(HubMetrics::new);

/// Container for all gateway metrics.
#[derive(Clone)]
pub struct HubMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Thrashing events witnessed by the error tracker
    pub thrashing_events_total: IntGauge,

    /// Circuit breaker trips
    pub circuit_breaker_trips_total: IntGauge,

    /// Response cache hits and misses
    pub cache_hits_total: IntGauge,
    pub cache_misses_total: IntGauge,

    /// Cost computations that used the fallback rate
    pub cost_unknown_model_total: IntGauge,

    /// Webhook delivery outcomes
    pub webhook_delivered_total: IntGauge,
    pub webhook_failed_total: IntGauge,
    pub webhook_dropped_total: IntGauge,

    /// Sessions auto-completed by the reaper
    pub sessions_reaped_total: IntGauge,

    /// Memory injections performed
    pub memory_injections_total: IntGauge,
}

fn register_err(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal(format!("Failed to register {}: {}", name, e))
}

impl HubMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "agenthub_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| register_err("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "agenthub_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| register_err("http_request_duration_seconds", e))?,

            thrashing_events_total: register_int_gauge!(
                "agenthub_thrashing_events_total",
                "Consecutive-identical-failure events witnessed"
            )
            .map_err(|e| register_err("thrashing_events_total", e))?,

            circuit_breaker_trips_total: register_int_gauge!(
                "agenthub_circuit_breaker_trips_total",
                "Circuit breaker trips"
            )
            .map_err(|e| register_err("circuit_breaker_trips_total", e))?,

            cache_hits_total: register_int_gauge!(
                "agenthub_cache_hits_total",
                "Response cache hits"
            )
            .map_err(|e| register_err("cache_hits_total", e))?,

            cache_misses_total: register_int_gauge!(
                "agenthub_cache_misses_total",
                "Response cache misses"
            )
            .map_err(|e| register_err("cache_misses_total", e))?,

            cost_unknown_model_total: register_int_gauge!(
                "agenthub_cost_unknown_model_total",
                "Cost computations that fell back to the default rate"
            )
            .map_err(|e| register_err("cost_unknown_model_total", e))?,

            webhook_delivered_total: register_int_gauge!(
                "agenthub_webhook_delivered_total",
                "Webhook deliveries acknowledged by subscribers"
            )
            .map_err(|e| register_err("webhook_delivered_total", e))?,

            webhook_failed_total: register_int_gauge!(
                "agenthub_webhook_failed_total",
                "Webhook deliveries that failed permanently"
            )
            .map_err(|e| register_err("webhook_failed_total", e))?,

            webhook_dropped_total: register_int_gauge!(
                "agenthub_webhook_dropped_total",
                "Webhook deliveries dropped on full queues"
            )
            .map_err(|e| register_err("webhook_dropped_total", e))?,

            sessions_reaped_total: register_int_gauge!(
                "agenthub_sessions_reaped_total",
                "Sessions auto-completed by the reaper"
            )
            .map_err(|e| register_err("sessions_reaped_total", e))?,

            memory_injections_total: register_int_gauge!(
                "agenthub_memory_injections_total",
                "Memory injections performed"
            )
            .map_err(|e| register_err("memory_injections_total", e))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Sync scrape-time gauges from the plane's atomic counters.
    pub fn sync(&self, state: &AppState) {
        let router = &state.router_metrics;
        self.thrashing_events_total
            .set(router.thrashing_events() as i64);
        self.circuit_breaker_trips_total
            .set(router.circuit_trips() as i64);
        self.cache_hits_total.set(router.cache_hits() as i64);
        self.cache_misses_total.set(router.cache_misses() as i64);
        self.cost_unknown_model_total
            .set(router.cost_unknown_models() as i64);

        let webhooks = &state.webhooks.metrics;
        self.webhook_delivered_total
            .set(webhooks.delivered() as i64);
        self.webhook_failed_total.set(webhooks.failed() as i64);
        self.webhook_dropped_total.set(webhooks.dropped() as i64);

        self.sessions_reaped_total
            .set(state.reaper_metrics.reaped() as i64);
        self.memory_injections_total
            .set(state.gateway.injector().records().len() as i64);
    }
}

/// Handler for GET /metrics.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = match METRICS.as_ref() {
        Ok(metrics) => metrics,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain".to_string())],
                format!("Metrics unavailable: {}", e.message).into_bytes(),
            );
        }
    };
    metrics.sync(&state);

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [(
                "content-type",
                "text/plain; version=0.0.4; charset=utf-8".to_string(),
            )],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain".to_string())],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        metrics.record_http_request("POST", "/api/complete", 200, 0.42);
        metrics.thrashing_events_total.set(3);
        assert_eq!(metrics.thrashing_events_total.get(), 3);
        Ok(())
    }
}

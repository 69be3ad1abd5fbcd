//! Telemetry: Prometheus metrics and request instrumentation.

mod metrics;

pub use metrics::{metrics_handler, HubMetrics, METRICS};

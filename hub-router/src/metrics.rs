//! Process-scope counters for the resilience plane.
//!
//! Plain atomics rather than a metrics registry so the router crates stay
//! free of HTTP-layer dependencies; the API layer exports these through its
//! Prometheus surface.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters published by the routing plane.
#[derive(Debug, Default)]
pub struct RouterMetrics {
    /// Thrashing events: K consecutive identical failures witnessed.
    pub thrashing_events_total: AtomicU64,

    /// Circuit breaker trips (Closed -> Open transitions).
    pub circuit_trips_total: AtomicU64,

    /// Response cache hits.
    pub cache_hits_total: AtomicU64,

    /// Response cache misses (producer invoked).
    pub cache_misses_total: AtomicU64,

    /// Cost computations that fell back to the default rate.
    pub cost_unknown_model_total: AtomicU64,
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_thrashing(&self) {
        self.thrashing_events_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_circuit_trips(&self) {
        self.circuit_trips_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_cache_hits(&self) {
        self.cache_hits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_cache_misses(&self) {
        self.cache_misses_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_cost_unknown_model(&self) {
        self.cost_unknown_model_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn thrashing_events(&self) -> u64 {
        self.thrashing_events_total.load(Ordering::Relaxed)
    }

    pub fn circuit_trips(&self) -> u64 {
        self.circuit_trips_total.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits_total.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses_total.load(Ordering::Relaxed)
    }

    pub fn cost_unknown_models(&self) -> u64 {
        self.cost_unknown_model_total.load(Ordering::Relaxed)
    }
}

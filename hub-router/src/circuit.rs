//! Per-provider circuit breaker.
//!
//! Three-state machine (Closed / Open / Half-Open) with capped exponential
//! cooldown growth. The breaker exclusively owns the provider -> state map;
//! the "exactly one probe in half-open" property is enforced by an atomic
//! CAS on the state field, so no lock is held while gating requests.

use crate::RouterMetrics;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use hub_core::{CircuitConfig, ProviderError};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// STATUS
// ============================================================================

/// Circuit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitStatus {
    fn from(v: u8) -> Self {
        match v {
            0 => CircuitStatus::Closed,
            1 => CircuitStatus::Open,
            _ => CircuitStatus::HalfOpen,
        }
    }
}

// ============================================================================
// PER-PROVIDER STATE
// ============================================================================

#[derive(Debug, Default)]
struct CircuitInner {
    consecutive_failures: u32,
    last_error_signature: Option<String>,
    cooldown_until: Option<DateTime<Utc>>,
}

/// State for one provider. Created lazily on first use.
struct Circuit {
    status: AtomicU8,
    inner: Mutex<CircuitInner>,
}

impl Circuit {
    fn new() -> Self {
        Self {
            status: AtomicU8::new(CircuitStatus::Closed as u8),
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    fn status(&self) -> CircuitStatus {
        CircuitStatus::from(self.status.load(Ordering::SeqCst))
    }
}

/// Read-only view of a provider's circuit state.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitSnapshot {
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub last_error_signature: Option<String>,
    pub cooldown_until: Option<DateTime<Utc>>,
}

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Per-provider circuit breaker manager.
pub struct CircuitBreaker {
    circuits: DashMap<String, Arc<Circuit>>,
    config: CircuitConfig,
    metrics: Arc<RouterMetrics>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig, metrics: Arc<RouterMetrics>) -> Self {
        Self {
            circuits: DashMap::new(),
            config,
            metrics,
        }
    }

    fn circuit(&self, provider: &str) -> Arc<Circuit> {
        self.circuits
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Circuit::new()))
            .clone()
    }

    /// Gate a request. `Ok(())` admits the request (and, out of half-open,
    /// admits exactly one probe); `Err` carries the cooldown for the caller
    /// to skip this provider.
    pub fn check(&self, provider: &str) -> Result<(), ProviderError> {
        let circuit = self.circuit(provider);
        match circuit.status() {
            CircuitStatus::Closed => Ok(()),
            // A probe is already in flight.
            CircuitStatus::HalfOpen => Err(self.open_error(provider, &circuit)),
            CircuitStatus::Open => {
                let cooled_down = {
                    let inner = circuit.inner.lock().unwrap_or_else(|e| e.into_inner());
                    inner
                        .cooldown_until
                        .map(|until| Utc::now() >= until)
                        .unwrap_or(true)
                };
                if cooled_down
                    && circuit
                        .status
                        .compare_exchange(
                            CircuitStatus::Open as u8,
                            CircuitStatus::HalfOpen as u8,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                        .is_ok()
                {
                    // This request won the probe slot.
                    tracing::info!(provider, "Circuit half-open, admitting probe");
                    Ok(())
                } else {
                    Err(self.open_error(provider, &circuit))
                }
            }
        }
    }

    /// Record a successful call: half-open probes close the circuit, and
    /// any success in closed state resets the failure counters.
    pub fn on_success(&self, provider: &str) {
        let circuit = self.circuit(provider);
        let mut inner = circuit.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.consecutive_failures = 0;
        inner.last_error_signature = None;
        inner.cooldown_until = None;
        let previous = circuit.status.swap(CircuitStatus::Closed as u8, Ordering::SeqCst);
        if CircuitStatus::from(previous) == CircuitStatus::HalfOpen {
            tracing::info!(provider, "Circuit closed after successful probe");
        }
    }

    /// Record a failed call and apply transitions. A half-open probe failure
    /// reopens immediately; in closed state the breaker trips once the
    /// threshold is reached.
    pub fn on_failure(&self, provider: &str, signature: &str) -> CircuitSnapshot {
        let circuit = self.circuit(provider);
        let mut inner = circuit.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.consecutive_failures += 1;
        inner.last_error_signature = Some(signature.to_string());

        let status = circuit.status();
        let failures = inner.consecutive_failures;

        let next = match status {
            CircuitStatus::HalfOpen => {
                // Probe failed: back to open with a recomputed cooldown.
                inner.cooldown_until = Some(Utc::now() + self.backoff(failures));
                tracing::warn!(provider, failures, "Half-open probe failed, reopening circuit");
                CircuitStatus::Open
            }
            CircuitStatus::Closed if failures >= self.config.threshold => {
                inner.cooldown_until = Some(Utc::now() + self.backoff(failures));
                self.metrics.incr_circuit_trips();
                tracing::warn!(
                    provider,
                    failures,
                    cooldown_until = ?inner.cooldown_until,
                    "Circuit tripped"
                );
                CircuitStatus::Open
            }
            other => other,
        };
        circuit.status.store(next as u8, Ordering::SeqCst);

        CircuitSnapshot {
            status: next,
            consecutive_failures: failures,
            last_error_signature: inner.last_error_signature.clone(),
            cooldown_until: inner.cooldown_until,
        }
    }

    /// Current state for a provider.
    pub fn snapshot(&self, provider: &str) -> CircuitSnapshot {
        let circuit = self.circuit(provider);
        let inner = circuit.inner.lock().unwrap_or_else(|e| e.into_inner());
        CircuitSnapshot {
            status: circuit.status(),
            consecutive_failures: inner.consecutive_failures,
            last_error_signature: inner.last_error_signature.clone(),
            cooldown_until: inner.cooldown_until,
        }
    }

    /// Cooldown grows with consecutive failures past the threshold, capped.
    fn backoff(&self, consecutive_failures: u32) -> ChronoDuration {
        let exponent = consecutive_failures.saturating_sub(self.config.threshold).min(8);
        let grown = self
            .config
            .cooldown_base
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.config.cooldown_max);
        ChronoDuration::from_std(grown).unwrap_or_else(|_| ChronoDuration::seconds(30))
    }

    fn open_error(&self, provider: &str, circuit: &Circuit) -> ProviderError {
        let inner = circuit.inner.lock().unwrap_or_else(|e| e.into_inner());
        ProviderError::CircuitOpen {
            provider: provider.to_string(),
            consecutive_failures: inner.consecutive_failures,
            last_error_signature: inner.last_error_signature.clone().unwrap_or_default(),
            cooldown_until: inner.cooldown_until.unwrap_or_else(Utc::now),
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("providers", &self.circuits.len())
            .field("threshold", &self.config.threshold)
            .finish()
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// The breaker opens after exactly `threshold` consecutive failures.
        #[test]
        fn prop_opens_after_threshold(threshold in 1u32..10) {
            let cb = CircuitBreaker::new(
                CircuitConfig {
                    threshold,
                    cooldown_base: Duration::from_secs(1),
                    cooldown_max: Duration::from_secs(60),
                },
                Arc::new(RouterMetrics::new()),
            );

            for i in 1..threshold {
                let snapshot = cb.on_failure("p", "sig");
                prop_assert_eq!(snapshot.status, CircuitStatus::Closed, "failure {}", i);
            }
            let snapshot = cb.on_failure("p", "sig");
            prop_assert_eq!(snapshot.status, CircuitStatus::Open);
        }

        /// Cooldowns never precede the failure that set them.
        #[test]
        fn prop_cooldown_not_in_past(failures in 1u32..20) {
            let cb = CircuitBreaker::new(
                CircuitConfig {
                    threshold: 1,
                    cooldown_base: Duration::from_secs(1),
                    cooldown_max: Duration::from_secs(60),
                },
                Arc::new(RouterMetrics::new()),
            );
            let before = Utc::now();
            let mut snapshot = cb.on_failure("p", "sig");
            for _ in 1..failures {
                snapshot = cb.on_failure("p", "sig");
            }
            prop_assert!(snapshot.cooldown_until.expect("cooldown") >= before);
        }
    }
}

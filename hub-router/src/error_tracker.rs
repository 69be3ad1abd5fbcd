//! Error tracking and thrashing detection.
//!
//! Keeps a bounded history of recent error signatures and reports how many
//! consecutive identical failures were just witnessed. Thrashing is an
//! observational health signal; it does not itself trip the circuit.

use crate::RouterMetrics;
use chrono::{DateTime, Utc};
use hub_core::ProviderError;
use md5::{Digest, Md5};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Default bounded history size.
pub const DEFAULT_HISTORY_SIZE: usize = 10;

/// Consecutive identical errors before a thrashing event is emitted.
pub const THRASHING_THRESHOLD: u32 = 2;

// ============================================================================
// ERROR SIGNATURE
// ============================================================================

/// Signature identifying an identical failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSignature {
    pub error_kind: String,
    pub provider: String,
    pub model: String,
    pub message_hash: String,
    pub recorded_at: DateTime<Utc>,
}

impl ErrorSignature {
    fn full(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.error_kind, self.provider, self.model, self.message_hash
        )
    }
}

/// Compute the signature string for an error:
/// `{error_kind}:{provider}:{model}:{md5-8(message)}`.
pub fn compute_error_signature(error: &ProviderError, provider: &str, model: &str) -> String {
    format!(
        "{}:{}:{}:{}",
        error.kind_name(),
        provider,
        model,
        message_hash(&error.to_string())
    )
}

fn message_hash(message: &str) -> String {
    let mut digest = hex::encode(Md5::digest(message.as_bytes()));
    digest.truncate(8);
    digest
}

// ============================================================================
// ERROR TRACKER
// ============================================================================

/// Bounded-history tracker for recent provider failures.
pub struct ErrorTracker {
    history: Mutex<VecDeque<ErrorSignature>>,
    capacity: usize,
    metrics: Arc<RouterMetrics>,
}

impl ErrorTracker {
    pub fn new(metrics: Arc<RouterMetrics>) -> Self {
        Self::with_capacity(DEFAULT_HISTORY_SIZE, metrics)
    }

    pub fn with_capacity(capacity: usize, metrics: Arc<RouterMetrics>) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            metrics,
        }
    }

    /// Record an error and return the consecutive identical error count
    /// (including this one). Tail entries are compared before the new entry
    /// is appended.
    pub fn record(&self, error: &ProviderError, provider: &str, model: &str) -> u32 {
        let sig = ErrorSignature {
            error_kind: error.kind_name().to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            message_hash: message_hash(&error.to_string()),
            recorded_at: Utc::now(),
        };
        let full = sig.full();

        let consecutive = {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());

            let mut count: u32 = 1;
            for prior in history.iter().rev() {
                if prior.full() == full {
                    count += 1;
                } else {
                    break;
                }
            }

            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(sig);
            count
        };

        if consecutive >= THRASHING_THRESHOLD {
            self.metrics.incr_thrashing();
            tracing::warn!(
                consecutive,
                provider,
                model,
                "Thrashing detected: consecutive identical errors"
            );
        }

        consecutive
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ErrorTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorTracker")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

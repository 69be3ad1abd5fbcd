//! Per-request cost accounting.
//!
//! Computes USD cost from a static per-model rate table and appends one
//! CostRecord per served completion. Cost math stays in f64 with no
//! rounding below 1e-6 USD.

use crate::RouterMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

// ============================================================================
// RATE TABLE
// ============================================================================

/// USD per million tokens for one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRate {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
    /// Cached input is billed at a discount.
    pub cached_input_per_mtok: f64,
}

const RATE_TABLE: &[(&str, ModelRate)] = &[
    (
        "claude-haiku-4-5",
        ModelRate {
            input_per_mtok: 1.0,
            output_per_mtok: 5.0,
            cached_input_per_mtok: 0.1,
        },
    ),
    (
        "claude-sonnet-4-5",
        ModelRate {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
            cached_input_per_mtok: 0.3,
        },
    ),
    (
        "claude-opus-4-5",
        ModelRate {
            input_per_mtok: 5.0,
            output_per_mtok: 25.0,
            cached_input_per_mtok: 0.5,
        },
    ),
    (
        "gemini-3-flash-preview",
        ModelRate {
            input_per_mtok: 0.3,
            output_per_mtok: 2.5,
            cached_input_per_mtok: 0.03,
        },
    ),
    (
        "gemini-3-pro-preview",
        ModelRate {
            input_per_mtok: 2.0,
            output_per_mtok: 12.0,
            cached_input_per_mtok: 0.2,
        },
    ),
];

/// Applied when a model is missing from the table.
const FALLBACK_RATE: ModelRate = ModelRate {
    input_per_mtok: 3.0,
    output_per_mtok: 15.0,
    cached_input_per_mtok: 0.3,
};

fn rate_for_model(model: &str) -> Option<ModelRate> {
    RATE_TABLE
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, rate)| *rate)
}

// ============================================================================
// COST COMPUTATION
// ============================================================================

/// Itemized cost of one completion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub cached_input_cost_usd: f64,
    pub total_cost_usd: f64,
}

/// A served completion's cost, appended once per response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub session_id: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
}

/// Append-only cost ledger with a static rate table.
pub struct CostTracker {
    records: Mutex<Vec<CostRecord>>,
    metrics: Arc<RouterMetrics>,
}

impl CostTracker {
    pub fn new(metrics: Arc<RouterMetrics>) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            metrics,
        }
    }

    /// Compute cost for a completion. Uncached input tokens are billed at
    /// the input rate; `cached_input_tokens` at the discounted rate.
    pub fn estimate_cost(
        &self,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
        cached_input_tokens: u32,
    ) -> CostBreakdown {
        let rate = rate_for_model(model).unwrap_or_else(|| {
            self.metrics.incr_cost_unknown_model();
            tracing::warn!(model, "No cost rate for model, using fallback rate");
            FALLBACK_RATE
        });

        let uncached_input = input_tokens.saturating_sub(cached_input_tokens);
        let input_cost_usd = uncached_input as f64 * rate.input_per_mtok / 1_000_000.0;
        let cached_input_cost_usd =
            cached_input_tokens as f64 * rate.cached_input_per_mtok / 1_000_000.0;
        let output_cost_usd = output_tokens as f64 * rate.output_per_mtok / 1_000_000.0;

        CostBreakdown {
            input_cost_usd,
            output_cost_usd,
            cached_input_cost_usd,
            total_cost_usd: input_cost_usd + output_cost_usd + cached_input_cost_usd,
        }
    }

    /// Compute and append the CostRecord for a served completion.
    pub fn record(
        &self,
        session_id: &str,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
        cached_input_tokens: u32,
    ) -> CostRecord {
        let cost = self.estimate_cost(model, input_tokens, output_tokens, cached_input_tokens);
        let record = CostRecord {
            session_id: session_id.to_string(),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            cost_usd: cost.total_cost_usd,
            created_at: Utc::now(),
        };
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        tracing::debug!(
            session_id,
            model,
            input_tokens,
            output_tokens,
            cost_usd = record.cost_usd,
            "Logged request cost"
        );
        record
    }

    /// Records for one session, in append order.
    pub fn for_session(&self, session_id: &str) -> Vec<CostRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Total spend across all sessions.
    pub fn total_usd(&self) -> f64 {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|r| r.cost_usd)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for CostTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostTracker")
            .field("records", &self.len())
            .finish()
    }
}

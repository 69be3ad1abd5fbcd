//! Agent Hub Router - Routing and Resilience Plane
//!
//! The path from an accepted completion request to a finished response:
//! - Tier classification for automatic model selection
//! - Cross-provider model mapping for fallback
//! - Bounded error history with thrashing detection
//! - Per-provider circuit breaking with capped-growth cooldowns
//! - Ordered provider chain traversal (strictly sequential, no fan-out)
//! - Fingerprinted response cache with per-key single-flight
//! - Per-request cost accounting against a static rate table

mod cache;
mod chain;
mod circuit;
mod cost;
mod error_tracker;
mod metrics;
mod model_map;
mod tier;

pub use cache::*;
pub use chain::*;
pub use circuit::*;
pub use cost::*;
pub use error_tracker::*;
pub use metrics::*;
pub use model_map::*;
pub use tier::*;

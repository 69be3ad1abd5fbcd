//! Response cache with request fingerprinting and per-key single-flight.
//!
//! Maps a fingerprint of the cache-relevant request fields to a previously
//! computed result. Guarantees at-most-one concurrent build per fingerprint:
//! concurrent requests with the same fingerprint coalesce on a per-key gate
//! so the downstream provider is called exactly once.

use crate::RouterMetrics;
use dashmap::DashMap;
use hub_core::{CacheConfig, CompletionResult, Message, ProviderError, ThinkingLevel};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

// ============================================================================
// FINGERPRINTING
// ============================================================================

/// Recursively sort object keys so semantically equal values canonicalize to
/// identical bytes. Shared by the response cache fingerprint and the webhook
/// payload signer.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(String, Value)> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Compute the deterministic fingerprint of a request's cache-relevant
/// fields: SHA-256 over the canonical JSON bytes.
pub fn request_fingerprint(
    model: &str,
    messages: &[Message],
    max_tokens: u32,
    temperature: f32,
    thinking_level: Option<ThinkingLevel>,
) -> String {
    let value = json!({
        "model": model,
        "messages": messages,
        "max_tokens": max_tokens,
        "temperature": temperature,
        "thinking_level": thinking_level,
    });
    let canonical = canonicalize(value);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

// ============================================================================
// CACHE
// ============================================================================

struct CacheEntry {
    result: CompletionResult,
    created_at: Instant,
    last_accessed: Instant,
}

/// In-memory response cache with TTL expiry, LRU overflow eviction, and
/// fingerprint coalescing.
pub struct ResponseCache {
    /// std Mutex: held only for map operations, never across an await.
    entries: Mutex<HashMap<String, CacheEntry>>,
    /// Per-fingerprint single-flight gates.
    inflight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    config: CacheConfig,
    metrics: Arc<RouterMetrics>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig, metrics: Arc<RouterMetrics>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            inflight: DashMap::new(),
            config,
            metrics,
        }
    }

    /// Whether a request is eligible for caching at all. High-temperature
    /// requests are non-deterministic; `no_cache` is an explicit opt-out.
    pub fn cacheable_request(&self, temperature: f32, no_cache: bool) -> bool {
        !no_cache && temperature <= self.config.temperature_cutoff
    }

    /// Look up a fingerprint. Expired entries are removed on read.
    pub fn get(&self, fingerprint: &str) -> Option<CompletionResult> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(fingerprint) {
            Some(entry) if entry.created_at.elapsed() < self.config.ttl => {
                entry.last_accessed = Instant::now();
                let result = entry.result.clone();
                drop(entries);
                self.metrics.incr_cache_hits();
                Some(result)
            }
            Some(_) => {
                entries.remove(fingerprint);
                None
            }
            None => None,
        }
    }

    /// Store a result. Truncated responses are never cached; on overflow the
    /// least-recently-accessed entry is evicted.
    fn store(&self, fingerprint: &str, result: &CompletionResult) {
        if result.is_truncated() {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= self.config.capacity && !entries.contains_key(fingerprint) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                entries.remove(&key);
            }
        }
        let now = Instant::now();
        entries.insert(
            fingerprint.to_string(),
            CacheEntry {
                result: result.clone(),
                created_at: now,
                last_accessed: now,
            },
        );
    }

    /// Return the cached result for a fingerprint, or coalesce on the
    /// per-key gate and run `producer` exactly once among concurrent
    /// callers. The boolean is true when the result came from cache.
    pub async fn get_or_fill<F, Fut>(
        &self,
        fingerprint: &str,
        producer: F,
    ) -> Result<(CompletionResult, bool), ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CompletionResult, ProviderError>>,
    {
        if let Some(hit) = self.get(fingerprint) {
            return Ok((hit, true));
        }

        let gate = {
            self.inflight
                .entry(fingerprint.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .value()
                .clone()
        };

        let guard = gate.lock().await;

        // Another caller may have filled the entry while we waited.
        if let Some(hit) = self.get(fingerprint) {
            drop(guard);
            self.release_gate(fingerprint);
            return Ok((hit, true));
        }

        self.metrics.incr_cache_misses();
        let result = producer().await;
        if let Ok(produced) = &result {
            self.store(fingerprint, produced);
        }

        drop(guard);
        self.release_gate(fingerprint);
        result.map(|r| (r, false))
    }

    fn release_gate(&self, fingerprint: &str) {
        // Two references are always alive here: the map's and ours. More
        // means late joiners still hold the gate, so keep it for them.
        self.inflight
            .remove_if(fingerprint, |_, gate| Arc::strong_count(gate) <= 2);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.len())
            .field("capacity", &self.config.capacity)
            .field("ttl", &self.config.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn cache(ttl: Duration, capacity: usize) -> ResponseCache {
        ResponseCache::new(
            CacheConfig {
                ttl,
                capacity,
                temperature_cutoff: 0.7,
            },
            Arc::new(RouterMetrics::new()),
        )
    }

    fn result(content: &str) -> CompletionResult {
        CompletionResult {
            content: content.to_string(),
            model: "claude-sonnet-4-5".to_string(),
            provider: "claude".to_string(),
            input_tokens: 5,
            output_tokens: 7,
            cached_input_tokens: 0,
            finish_reason: Some("end_turn".to_string()),
            thinking: None,
        }
    }

    #[test]
    fn test_store_and_get() {
        let cache = cache(Duration::from_secs(60), 10);
        cache.store("fp-1", &result("hello"));
        let hit = cache.get("fp-1").expect("hit");
        assert_eq!(hit.content, "hello");
    }

    #[test]
    fn test_ttl_expiry_is_a_miss() {
        let cache = cache(Duration::from_millis(10), 10);
        cache.store("fp-1", &result("hello"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("fp-1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_truncated_results_not_stored() {
        let cache = cache(Duration::from_secs(60), 10);
        let mut truncated = result("partial");
        truncated.finish_reason = Some("max_tokens".to_string());
        cache.store("fp-1", &truncated);
        assert!(cache.get("fp-1").is_none());
    }

    #[test]
    fn test_lru_eviction_on_overflow() {
        let cache = cache(Duration::from_secs(60), 2);
        cache.store("fp-1", &result("one"));
        std::thread::sleep(Duration::from_millis(2));
        cache.store("fp-2", &result("two"));
        std::thread::sleep(Duration::from_millis(2));
        // Touch fp-1 so fp-2 becomes least recently accessed.
        cache.get("fp-1");
        std::thread::sleep(Duration::from_millis(2));
        cache.store("fp-3", &result("three"));

        assert!(cache.get("fp-1").is_some());
        assert!(cache.get("fp-2").is_none());
        assert!(cache.get("fp-3").is_some());
    }

    #[test]
    fn test_cacheable_request_policy() {
        let cache = cache(Duration::from_secs(60), 10);
        assert!(cache.cacheable_request(0.2, false));
        assert!(!cache.cacheable_request(0.9, false));
        assert!(!cache.cacheable_request(0.2, true));
    }

    #[test]
    fn test_fingerprint_stable_across_key_order() {
        let messages = vec![Message::user("Hello")];
        let a = request_fingerprint("claude-sonnet-4-5", &messages, 1024, 0.2, None);
        let b = request_fingerprint("claude-sonnet-4-5", &messages, 1024, 0.2, None);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_differs_by_params() {
        let messages = vec![Message::user("Hello")];
        let a = request_fingerprint("claude-sonnet-4-5", &messages, 1024, 0.2, None);
        let b = request_fingerprint("claude-sonnet-4-5", &messages, 2048, 0.2, None);
        let c = request_fingerprint("claude-sonnet-4-5", &messages, 1024, 0.3, None);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_canonicalize_sorts_nested_keys() {
        let a = canonicalize(serde_json::json!({"b": {"z": 1, "a": 2}, "a": 3}));
        let b = canonicalize(serde_json::json!({"a": 3, "b": {"a": 2, "z": 1}}));
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[tokio::test]
    async fn test_single_flight_coalesces_producers() {
        let cache = Arc::new(cache(Duration::from_secs(60), 10));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fill("fp-sf", move || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(result("coalesced"))
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            let (produced, _) = handle.await.expect("join").expect("result");
            assert_eq!(produced.content, "coalesced");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.inflight.is_empty());
    }

    #[tokio::test]
    async fn test_producer_error_not_cached() {
        let cache = cache(Duration::from_secs(60), 10);
        let outcome = cache
            .get_or_fill("fp-err", || async {
                Err(ProviderError::Upstream {
                    provider: "claude".to_string(),
                    message: "boom".to_string(),
                    retriable: true,
                    status: Some(500),
                })
            })
            .await;
        assert!(outcome.is_err());
        assert!(cache.get("fp-err").is_none());
    }

    #[tokio::test]
    async fn test_second_call_hits_cache() {
        let cache = cache(Duration::from_secs(60), 10);
        let (_, from_cache) = cache
            .get_or_fill("fp-hit", || async { Ok(result("served")) })
            .await
            .expect("first");
        assert!(!from_cache);

        let (hit, from_cache) = cache
            .get_or_fill("fp-hit", || async {
                panic!("producer must not run on a hit")
            })
            .await
            .expect("second");
        assert!(from_cache);
        assert_eq!(hit.content, "served");
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Fingerprinting is a pure function of the canonical fields.
        #[test]
        fn prop_fingerprint_deterministic(
            text in ".{0,200}",
            max_tokens in 1u32..100000,
            temperature in 0.0f32..2.0,
        ) {
            let messages = vec![Message::user(text.as_str())];
            let a = request_fingerprint("m", &messages, max_tokens, temperature, None);
            let b = request_fingerprint("m", &messages, max_tokens, temperature, None);
            prop_assert_eq!(a, b);
        }

        /// Distinct message text yields distinct fingerprints.
        #[test]
        fn prop_fingerprint_separates_content(
            a in "[a-z]{1,40}",
            b in "[A-Z]{1,40}",
        ) {
            let fp_a = request_fingerprint("m", &[Message::user(a.as_str())], 10, 0.1, None);
            let fp_b = request_fingerprint("m", &[Message::user(b.as_str())], 10, 0.1, None);
            prop_assert_ne!(fp_a, fp_b);
        }
    }
}

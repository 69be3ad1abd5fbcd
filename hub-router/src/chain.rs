//! Provider chain traversal with fallback.
//!
//! Walks the ordered provider chain strictly sequentially: circuit gate,
//! model remap for non-primary providers, adapter invocation, failure
//! classification. Surfaces an error only after every provider has been
//! tried.

use crate::{
    compute_error_signature, map_model_to_provider, CircuitBreaker, CircuitStatus, ErrorTracker,
};
use hub_core::{CompletionResult, Message, ProviderError, ValidationError};
use hub_providers::{AdapterRegistry, CompletionParams};
use std::sync::Arc;

// ============================================================================
// PROVIDER CHAIN
// ============================================================================

/// Ordered provider fallback chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderChain {
    providers: Vec<String>,
}

impl ProviderChain {
    pub fn new(providers: Vec<String>) -> Result<Self, ValidationError> {
        if providers.is_empty() {
            return Err(ValidationError::EmptyChain);
        }
        Ok(Self { providers })
    }

    pub fn providers(&self) -> &[String] {
        &self.providers
    }

    /// Primary provider for a model: the first chain member whose name
    /// appears in the model string, else the chain head.
    pub fn determine_primary(&self, model: &str) -> String {
        let model_lower = model.to_lowercase();
        self.providers
            .iter()
            .find(|p| model_lower.contains(p.as_str()))
            .unwrap_or(&self.providers[0])
            .clone()
    }

    /// Attempt order: primary first, then the rest of the chain in
    /// configured order, without duplicates.
    pub fn attempt_order(&self, primary: &str) -> Vec<String> {
        let mut order = vec![primary.to_string()];
        for provider in &self.providers {
            if provider != primary {
                order.push(provider.clone());
            }
        }
        order
    }
}

// ============================================================================
// CHAIN EXECUTOR
// ============================================================================

/// Executes completions across the chain with circuit breaking and error
/// tracking.
pub struct ChainExecutor {
    registry: Arc<AdapterRegistry>,
    breaker: Arc<CircuitBreaker>,
    tracker: Arc<ErrorTracker>,
    chain: ProviderChain,
}

impl ChainExecutor {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        breaker: Arc<CircuitBreaker>,
        tracker: Arc<ErrorTracker>,
        chain: ProviderChain,
    ) -> Self {
        Self {
            registry,
            breaker,
            tracker,
            chain,
        }
    }

    pub fn chain(&self) -> &ProviderChain {
        &self.chain
    }

    /// Run a completion through the chain. Providers are tried strictly in
    /// order; the first success wins. Rate limits are not retried against
    /// the same provider here - the chain just moves on.
    pub async fn execute(
        &self,
        messages: &[Message],
        model: &str,
        params: &CompletionParams,
    ) -> Result<CompletionResult, ProviderError> {
        let primary = self.chain.determine_primary(model);
        let mut last_error: Option<ProviderError> = None;
        let mut min_retry_after: Option<u64> = None;

        for provider in self.chain.attempt_order(&primary) {
            if let Err(open) = self.breaker.check(&provider) {
                tracing::warn!(provider = %provider, "Circuit open, skipping");
                last_error = Some(open);
                continue;
            }

            let effective_model = if provider != primary {
                let mapped = map_model_to_provider(model, &provider);
                tracing::info!(
                    from = %primary,
                    to = %provider,
                    model,
                    mapped = %mapped,
                    "Falling back to secondary provider"
                );
                mapped
            } else {
                model.to_string()
            };

            let adapter = match self.registry.get(&provider) {
                Ok(adapter) => adapter,
                Err(err) => {
                    tracing::warn!(provider = %provider, error = %err, "No adapter, skipping");
                    last_error = Some(err);
                    continue;
                }
            };

            match adapter.complete(messages, &effective_model, params).await {
                Ok(mut result) => {
                    self.breaker.on_success(&provider);
                    result.provider = provider.clone();
                    return Ok(result);
                }
                Err(err) => {
                    if let ProviderError::RateLimited {
                        retry_after_secs: Some(secs),
                        ..
                    } = &err
                    {
                        min_retry_after =
                            Some(min_retry_after.map_or(*secs, |cur| cur.min(*secs)));
                    }

                    // Caller/config problems are not provider health signals.
                    if err.is_config() {
                        tracing::warn!(provider = %provider, error = %err, "Config error, trying next provider");
                        last_error = Some(err);
                        continue;
                    }

                    tracing::warn!(provider = %provider, error = %err, "Provider failed, trying next");
                    self.tracker.record(&err, &provider, &effective_model);
                    let signature = compute_error_signature(&err, &provider, &effective_model);
                    let snapshot = self.breaker.on_failure(&provider, &signature);

                    last_error = Some(if snapshot.status == CircuitStatus::Open {
                        ProviderError::CircuitOpen {
                            provider: provider.clone(),
                            consecutive_failures: snapshot.consecutive_failures,
                            last_error_signature: snapshot
                                .last_error_signature
                                .unwrap_or_default(),
                            cooldown_until: snapshot
                                .cooldown_until
                                .unwrap_or_else(chrono::Utc::now),
                        }
                    } else {
                        err
                    });
                }
            }
        }

        let mut last = last_error.unwrap_or(ProviderError::UnknownProvider {
            provider: primary,
        });
        // Surface the smallest retry hint observed across the chain.
        if let ProviderError::RateLimited {
            retry_after_secs, ..
        } = &mut last
        {
            *retry_after_secs = min_retry_after.or(*retry_after_secs);
        }
        Err(ProviderError::Exhausted {
            last: Box::new(last),
        })
    }
}

impl std::fmt::Debug for ChainExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainExecutor")
            .field("chain", &self.chain)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RouterMetrics;
    use async_trait::async_trait;
    use hub_core::CircuitConfig;
    use hub_providers::{ProviderAdapter, ProviderCapability};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedAdapter {
        name: &'static str,
        script: Mutex<VecDeque<Result<CompletionResult, ProviderError>>>,
        calls: AtomicUsize,
        models_seen: Mutex<Vec<String>>,
    }

    impl ScriptedAdapter {
        fn new(
            name: &'static str,
            script: Vec<Result<CompletionResult, ProviderError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                models_seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn models_seen(&self) -> Vec<String> {
            self.models_seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        fn provider_name(&self) -> &str {
            self.name
        }

        fn capabilities(&self) -> &[ProviderCapability] {
            &[ProviderCapability::Complete]
        }

        async fn complete(
            &self,
            _messages: &[Message],
            model: &str,
            _params: &CompletionParams,
        ) -> Result<CompletionResult, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.models_seen.lock().unwrap().push(model.to_string());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ok_result(self.name, model)))
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    fn ok_result(provider: &str, model: &str) -> CompletionResult {
        CompletionResult {
            content: format!("served by {}", provider),
            model: model.to_string(),
            provider: provider.to_string(),
            input_tokens: 10,
            output_tokens: 5,
            cached_input_tokens: 0,
            finish_reason: Some("end_turn".to_string()),
            thinking: None,
        }
    }

    fn rate_limited(provider: &str, retry_after: Option<u64>) -> ProviderError {
        ProviderError::RateLimited {
            provider: provider.to_string(),
            retry_after_secs: retry_after,
        }
    }

    fn timeout(provider: &str) -> ProviderError {
        ProviderError::Upstream {
            provider: provider.to_string(),
            message: "upstream timeout".to_string(),
            retriable: true,
            status: Some(504),
        }
    }

    fn executor(
        adapters: Vec<Arc<ScriptedAdapter>>,
    ) -> (ChainExecutor, Arc<RouterMetrics>) {
        let metrics = Arc::new(RouterMetrics::new());
        let mut registry = AdapterRegistry::new();
        for adapter in adapters {
            registry.register(adapter);
        }
        let breaker = Arc::new(CircuitBreaker::new(
            CircuitConfig {
                threshold: 2,
                cooldown_base: Duration::from_secs(30),
                cooldown_max: Duration::from_secs(300),
            },
            metrics.clone(),
        ));
        let tracker = Arc::new(ErrorTracker::new(metrics.clone()));
        let chain =
            ProviderChain::new(vec!["claude".to_string(), "gemini".to_string()]).unwrap();
        (
            ChainExecutor::new(Arc::new(registry), breaker, tracker, chain),
            metrics,
        )
    }

    #[test]
    fn test_empty_chain_is_a_validation_error() {
        assert_eq!(
            ProviderChain::new(vec![]).unwrap_err(),
            ValidationError::EmptyChain
        );
    }

    #[test]
    fn test_primary_from_model_substring() {
        let chain =
            ProviderChain::new(vec!["claude".to_string(), "gemini".to_string()]).unwrap();
        assert_eq!(chain.determine_primary("claude-sonnet-4-5"), "claude");
        assert_eq!(chain.determine_primary("gemini-3-pro-preview"), "gemini");
        assert_eq!(chain.determine_primary("GEMINI-3-FLASH-PREVIEW"), "gemini");
        assert_eq!(chain.determine_primary("gpt-5"), "claude");
    }

    #[test]
    fn test_attempt_order_deduplicates() {
        let chain =
            ProviderChain::new(vec!["claude".to_string(), "gemini".to_string()]).unwrap();
        assert_eq!(chain.attempt_order("gemini"), vec!["gemini", "claude"]);
        assert_eq!(chain.attempt_order("claude"), vec!["claude", "gemini"]);
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let claude = ScriptedAdapter::new("claude", vec![]);
        let gemini = ScriptedAdapter::new("gemini", vec![]);
        let (executor, _) = executor(vec![claude.clone(), gemini.clone()]);

        let result = executor
            .execute(
                &[Message::user("Hello")],
                "claude-sonnet-4-5",
                &CompletionParams::default(),
            )
            .await
            .expect("success");

        assert_eq!(result.provider, "claude");
        assert_eq!(claude.calls(), 1);
        assert_eq!(gemini.calls(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_falls_back_with_model_remap() {
        let claude = ScriptedAdapter::new("claude", vec![Err(rate_limited("claude", Some(30)))]);
        let gemini = ScriptedAdapter::new("gemini", vec![]);
        let (executor, _) = executor(vec![claude.clone(), gemini.clone()]);

        let result = executor
            .execute(
                &[Message::user("Hello")],
                "claude-sonnet-4-5",
                &CompletionParams::default(),
            )
            .await
            .expect("fallback success");

        assert_eq!(result.provider, "gemini");
        assert_eq!(gemini.models_seen(), vec!["gemini-3-flash-preview"]);
    }

    #[tokio::test]
    async fn test_circuit_trips_and_skips_provider() {
        let claude = ScriptedAdapter::new(
            "claude",
            vec![Err(timeout("claude")), Err(timeout("claude"))],
        );
        let gemini = ScriptedAdapter::new("gemini", vec![]);
        let (executor, metrics) = executor(vec![claude.clone(), gemini.clone()]);
        let params = CompletionParams::default();
        let messages = [Message::user("Hello")];

        // Two identical failures trip the breaker (threshold 2); both
        // requests still succeed via the fallback.
        executor
            .execute(&messages, "claude-sonnet-4-5", &params)
            .await
            .expect("first");
        executor
            .execute(&messages, "claude-sonnet-4-5", &params)
            .await
            .expect("second");
        assert_eq!(claude.calls(), 2);
        assert_eq!(metrics.circuit_trips(), 1);
        assert_eq!(metrics.thrashing_events(), 1);

        // Third request skips claude entirely: the adapter is not invoked.
        let result = executor
            .execute(&messages, "claude-sonnet-4-5", &params)
            .await
            .expect("third");
        assert_eq!(claude.calls(), 2);
        assert_eq!(result.provider, "gemini");
    }

    #[tokio::test]
    async fn test_all_providers_exhausted() {
        let claude = ScriptedAdapter::new("claude", vec![Err(timeout("claude"))]);
        let gemini = ScriptedAdapter::new("gemini", vec![Err(timeout("gemini"))]);
        let (executor, _) = executor(vec![claude, gemini]);

        let err = executor
            .execute(
                &[Message::user("Hello")],
                "claude-sonnet-4-5",
                &CompletionParams::default(),
            )
            .await
            .unwrap_err();

        match err {
            ProviderError::Exhausted { last } => {
                assert_eq!(last.provider(), "gemini");
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_auth_errors_do_not_pollute_tracker() {
        let claude = ScriptedAdapter::new(
            "claude",
            vec![Err(ProviderError::Authentication {
                provider: "claude".to_string(),
            })],
        );
        let gemini = ScriptedAdapter::new("gemini", vec![]);
        let metrics = Arc::new(RouterMetrics::new());
        let mut registry = AdapterRegistry::new();
        registry.register(claude);
        registry.register(gemini);
        let breaker = Arc::new(CircuitBreaker::new(CircuitConfig::default(), metrics.clone()));
        let tracker = Arc::new(ErrorTracker::new(metrics.clone()));
        let chain =
            ProviderChain::new(vec!["claude".to_string(), "gemini".to_string()]).unwrap();
        let executor = ChainExecutor::new(Arc::new(registry), breaker, tracker.clone(), chain);

        let result = executor
            .execute(
                &[Message::user("Hello")],
                "claude-sonnet-4-5",
                &CompletionParams::default(),
            )
            .await
            .expect("fallback success");

        assert_eq!(result.provider, "gemini");
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_everywhere_surfaces_smallest_retry_after() {
        let claude = ScriptedAdapter::new("claude", vec![Err(rate_limited("claude", Some(30)))]);
        let gemini = ScriptedAdapter::new("gemini", vec![Err(rate_limited("gemini", Some(10)))]);
        let (executor, _) = executor(vec![claude, gemini]);

        let err = executor
            .execute(
                &[Message::user("Hello")],
                "claude-sonnet-4-5",
                &CompletionParams::default(),
            )
            .await
            .unwrap_err();

        match err {
            ProviderError::Exhausted { last } => match *last {
                ProviderError::RateLimited {
                    retry_after_secs, ..
                } => assert_eq!(retry_after_secs, Some(10)),
                other => panic!("expected RateLimited, got {:?}", other),
            },
            other => panic!("expected Exhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_provider_in_chain_is_skipped() {
        let gemini = ScriptedAdapter::new("gemini", vec![]);
        let metrics = Arc::new(RouterMetrics::new());
        let mut registry = AdapterRegistry::new();
        registry.register(gemini);
        let breaker = Arc::new(CircuitBreaker::new(CircuitConfig::default(), metrics.clone()));
        let tracker = Arc::new(ErrorTracker::new(metrics.clone()));
        let chain =
            ProviderChain::new(vec!["claude".to_string(), "gemini".to_string()]).unwrap();
        let executor = ChainExecutor::new(Arc::new(registry), breaker, tracker, chain);

        let result = executor
            .execute(
                &[Message::user("Hello")],
                "claude-sonnet-4-5",
                &CompletionParams::default(),
            )
            .await
            .expect("gemini serves");
        assert_eq!(result.provider, "gemini");
    }
}

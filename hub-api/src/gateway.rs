//! Request orchestration.
//!
//! Threads a completion request through the full pipeline: validate, access
//! check, session resolve, tier classify, cache lookup, memory inject,
//! chain execute, cache write, cost record, message persistence, event
//! emission. Owns the request-scoped pipeline and the per-session write
//! serialization.

use crate::access::ClientRegistry;
use crate::error::{ApiError, ApiResult};
use crate::events::{EventBus, HubEvent};
use crate::sessions::SessionStore;
use dashmap::DashMap;
use hub_core::{
    CompletionRequest, CompletionResult, HubConfig, Message, Role, SessionKind, ValidationError,
};
use hub_memory::{MemoryInjector, MemoryQuery};
use hub_providers::{AdapterRegistry, CompletionParams, ProviderCapability};
use hub_router::{classify_and_select, request_fingerprint, ChainExecutor, CostTracker, ResponseCache, Tier};
use std::collections::HashMap;
use std::sync::Arc;

const MAX_OUTPUT_TOKENS: u32 = 100_000;

/// A completion served by the gateway.
#[derive(Debug, Clone)]
pub struct ServedCompletion {
    pub result: CompletionResult,
    pub session_id: String,
    pub tier: Tier,
    pub from_cache: bool,
}

/// The gateway router: front-end orchestrator over the resilience plane.
pub struct Gateway {
    registry: Arc<AdapterRegistry>,
    executor: Arc<ChainExecutor>,
    cache: Arc<ResponseCache>,
    costs: Arc<CostTracker>,
    injector: Arc<MemoryInjector>,
    sessions: Arc<SessionStore>,
    access: Arc<ClientRegistry>,
    events: Arc<EventBus>,
    /// Per-session write fences; completions on one session are serialized.
    session_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl Gateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<AdapterRegistry>,
        executor: Arc<ChainExecutor>,
        cache: Arc<ResponseCache>,
        costs: Arc<CostTracker>,
        injector: Arc<MemoryInjector>,
        sessions: Arc<SessionStore>,
        access: Arc<ClientRegistry>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            executor,
            cache,
            costs,
            injector,
            sessions,
            access,
            events,
            session_locks: DashMap::new(),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Shared handle to the session store, for the reaper.
    pub fn sessions_handle(&self) -> Arc<SessionStore> {
        self.sessions.clone()
    }

    pub fn access(&self) -> &ClientRegistry {
        &self.access
    }

    pub fn costs(&self) -> &CostTracker {
        &self.costs
    }

    pub fn injector(&self) -> &MemoryInjector {
        &self.injector
    }

    fn validate(request: &CompletionRequest) -> Result<(), ValidationError> {
        if request.messages.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "messages".to_string(),
            });
        }
        if request.messages.iter().any(|m| m.content.is_empty()) {
            return Err(ValidationError::InvalidValue {
                field: "messages".to_string(),
                reason: "message content must not be empty".to_string(),
            });
        }
        if request.max_tokens == 0 || request.max_tokens > MAX_OUTPUT_TOKENS {
            return Err(ValidationError::InvalidValue {
                field: "max_tokens".to_string(),
                reason: format!("must be between 1 and {}", MAX_OUTPUT_TOKENS),
            });
        }
        if !(0.0..=2.0).contains(&request.temperature) {
            return Err(ValidationError::InvalidValue {
                field: "temperature".to_string(),
                reason: "must be between 0.0 and 2.0".to_string(),
            });
        }
        if matches!(&request.model, Some(m) if m.trim().is_empty()) {
            return Err(ValidationError::InvalidValue {
                field: "model".to_string(),
                reason: "must not be blank".to_string(),
            });
        }
        Ok(())
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.session_locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .value()
            .clone()
    }

    /// Serve a completion request.
    pub async fn complete(
        &self,
        client_id: Option<&str>,
        request: CompletionRequest,
    ) -> ApiResult<ServedCompletion> {
        Self::validate(&request)?;

        if let Some(client_id) = client_id {
            self.access
                .check(client_id, request.project_id.as_deref(), request.max_tokens)?;
        }

        // Existing sessions must be active; fresh ones are minted only after
        // a successful completion.
        let existing_session = match &request.session_id {
            Some(id) => Some(self.sessions.resolve_active(id)?),
            None => None,
        };

        // Completions on one session are strictly serialized: the fence
        // covers history read, provider call, and message append.
        let _fence = match &existing_session {
            Some(session) => {
                let lock = self.session_lock(&session.id);
                Some(lock.lock_owned().await)
            }
            None => None,
        };

        let prompt = request.last_user_text();
        let primary = self
            .executor
            .chain()
            .providers()
            .first()
            .cloned()
            .unwrap_or_default();
        let (tier, model) = classify_and_select(&prompt, &primary, request.model.as_deref());

        // History comes from the session log; the request carries only the
        // new turn(s).
        let mut conversation: Vec<Message> = Vec::new();
        if let Some(session) = &existing_session {
            for stored in self.sessions.messages(&session.id).map_err(ApiError::from)? {
                conversation.push(Message {
                    role: stored.role,
                    content: stored.content,
                });
            }
        }
        conversation.extend(request.messages.iter().cloned());

        let params = CompletionParams {
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            thinking_level: request.thinking_level,
        };

        let fingerprint = request_fingerprint(
            &model,
            &conversation,
            request.max_tokens,
            request.temperature,
            request.thinking_level,
        );

        let query = MemoryQuery {
            prompt,
            session_id: request.session_id.clone(),
            project_id: request.project_id.clone(),
            external_id: request.external_id.clone(),
        };

        let producer = || async {
            // Memory injection happens inside the producer so cache hits pay
            // neither retrieval nor provider cost.
            let mut messages: Vec<Message> = Vec::new();
            if let Some(memory) = self.injector.inject(&query).await {
                messages.push(memory);
            }
            messages.extend(conversation.iter().cloned());
            self.executor.execute(&messages, &model, &params).await
        };

        let (result, from_cache) =
            if self.cache.cacheable_request(request.temperature, request.no_cache) {
                self.cache.get_or_fill(&fingerprint, producer).await?
            } else {
                (producer().await?, false)
            };

        // Mint the session lazily on first successful completion.
        let session_id = match existing_session {
            Some(session) => session.id,
            None => {
                self.sessions
                    .create(
                        SessionKind::Completion,
                        request.project_id.clone(),
                        request.external_id.clone(),
                    )
                    .id
            }
        };

        // Cache hits consume no provider tokens and record no new cost.
        if !from_cache {
            self.costs.record(
                &session_id,
                &result.model,
                result.input_tokens,
                result.output_tokens,
                result.cached_input_tokens,
            );
        }

        // A lost append would silently drop the exchange, so unlike the
        // other side effects this one fails the request.
        for message in &request.messages {
            self.sessions
                .append_message(&session_id, message.role, message.content.clone())
                .map_err(|e| ApiError::internal(format!("Failed to persist message: {}", e)))?;
        }
        self.sessions
            .append_message(
                &session_id,
                Role::Assistant,
                result.content.clone().into(),
            )
            .map_err(|e| ApiError::internal(format!("Failed to persist reply: {}", e)))?;

        self.events.publish(HubEvent::CompletionServed {
            session_id: session_id.clone(),
            provider: result.provider.clone(),
            model: result.model.clone(),
            input_tokens: result.input_tokens,
            output_tokens: result.output_tokens,
            cached: from_cache,
        });

        Ok(ServedCompletion {
            result,
            session_id,
            tier,
            from_cache,
        })
    }

    /// Aggregate adapter health for the health endpoint.
    pub async fn provider_health(&self) -> HashMap<String, bool> {
        let mut health = HashMap::new();
        for provider in self.executor.chain().providers() {
            let healthy = match self.registry.get(provider) {
                Ok(adapter) => {
                    adapter.capabilities().contains(&ProviderCapability::HealthCheck)
                        && adapter.health_check().await
                }
                Err(_) => false,
            };
            health.insert(provider.clone(), healthy);
        }
        health
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("chain", self.executor.chain())
            .finish()
    }
}

/// Build the full pipeline from configuration. The composition root wires
/// concrete components eagerly at startup; nothing is lazily initialized.
pub fn build_gateway(
    config: &HubConfig,
    registry: Arc<AdapterRegistry>,
    memory_store: Arc<dyn hub_memory::MemoryStore>,
) -> (Arc<Gateway>, Arc<hub_router::RouterMetrics>, Arc<EventBus>) {
    use hub_memory::{MemorySettings, MemorySettingsStore};
    use hub_router::{CircuitBreaker, ErrorTracker, ProviderChain, RouterMetrics};

    let metrics = Arc::new(RouterMetrics::new());
    let breaker = Arc::new(CircuitBreaker::new(config.circuit.clone(), metrics.clone()));
    let tracker = Arc::new(ErrorTracker::new(metrics.clone()));
    let chain = ProviderChain::new(config.provider_chain.clone())
        .expect("provider chain validated at config load");
    let executor = Arc::new(ChainExecutor::new(
        registry.clone(),
        breaker,
        tracker,
        chain,
    ));
    let cache = Arc::new(ResponseCache::new(config.cache.clone(), metrics.clone()));
    let costs = Arc::new(CostTracker::new(metrics.clone()));
    let settings = Arc::new(MemorySettingsStore::new(MemorySettings::from(&config.memory)));
    let injector = Arc::new(MemoryInjector::new(memory_store, settings));
    let sessions = Arc::new(SessionStore::new());
    let access = Arc::new(ClientRegistry::new());
    let events = Arc::new(EventBus::new(256));

    let gateway = Arc::new(Gateway::new(
        registry,
        executor,
        cache,
        costs,
        injector,
        sessions,
        access,
        events.clone(),
    ));
    (gateway, metrics, events)
}

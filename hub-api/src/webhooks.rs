//! Webhook subscriptions and delivery.
//!
//! Delivers event payloads to subscriber URLs with HMAC-SHA256 signing and
//! exponential retry. Delivery is independent per subscription: each one has
//! a bounded in-memory queue drained by its own worker, so a slow subscriber
//! never blocks others, and per-subscription concurrency is at most one
//! in-flight request. At-least-once semantics with `X-Webhook-Id` as the
//! idempotency hint; after max attempts the failure is permanent.

use crate::error::{ApiError, ApiResult};
use crate::events::{EventBus, HubEvent};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use hub_core::WebhookConfig;
use hub_router::canonicalize;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

const USER_AGENT: &str = "AgentHub-Webhook/1.0";
const ENQUEUE_GRACE: Duration = Duration::from_millis(50);

// ============================================================================
// TYPES
// ============================================================================

/// A registered webhook subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub url: String,
    /// Event types to deliver; "*" matches everything.
    pub events: Vec<String>,
    pub description: Option<String>,
    pub active: bool,
    /// Secret for HMAC signatures (not exposed in responses)
    #[serde(skip_serializing)]
    pub secret: String,
    pub created_at: DateTime<Utc>,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_delivery_at: Option<DateTime<Utc>>,
}

impl WebhookSubscription {
    fn matches(&self, event_type: &str) -> bool {
        self.events.iter().any(|e| e == "*" || e == event_type)
    }
}

/// Request to register a new webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWebhookRequest {
    pub url: String,
    pub events: Vec<String>,
    pub description: Option<String>,
    pub secret: String,
}

/// Delivery payload posted to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub delivery_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// One delivery unit: payload bytes are serialized once, the signature is
/// recomputed per attempt over those identical bytes.
#[derive(Debug, Clone)]
struct WebhookJob {
    subscription_id: Uuid,
    url: String,
    body: Vec<u8>,
    secret: String,
    attempt: u32,
}

/// Delivery counters, exported through the metrics surface.
#[derive(Debug, Default)]
pub struct WebhookMetrics {
    pub delivered_total: AtomicU64,
    pub failed_total: AtomicU64,
    pub dropped_total: AtomicU64,
}

impl WebhookMetrics {
    pub fn delivered(&self) -> u64 {
        self.delivered_total.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed_total.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }
}

// ============================================================================
// SIGNING
// ============================================================================

/// Hex HMAC-SHA256 over the payload bytes.
pub fn sign_payload(payload: &[u8], secret: &str) -> String {
    type HmacSha256 = Hmac<Sha256>;

    // HMAC accepts keys of any length; new_from_slice cannot fail here.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Canonical JSON bytes (sorted keys) for a payload.
pub fn canonical_body(payload: &WebhookPayload) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(payload)?;
    serde_json::to_vec(&canonicalize(value))
}

// ============================================================================
// DISPATCHER
// ============================================================================

/// Webhook subscription store and delivery engine.
pub struct WebhookDispatcher {
    subscriptions: DashMap<Uuid, WebhookSubscription>,
    senders: DashMap<Uuid, mpsc::Sender<WebhookJob>>,
    client: reqwest::Client,
    config: WebhookConfig,
    pub metrics: Arc<WebhookMetrics>,
}

impl WebhookDispatcher {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            subscriptions: DashMap::new(),
            senders: DashMap::new(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            config,
            metrics: Arc::new(WebhookMetrics::default()),
        }
    }

    /// Register a subscription and spawn its delivery worker.
    pub fn register(self: &Arc<Self>, subscription: WebhookSubscription) {
        let id = subscription.id;
        self.subscriptions.insert(id, subscription);

        let (tx, mut rx) = mpsc::channel::<WebhookJob>(self.config.queue_capacity);
        self.senders.insert(id, tx);

        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                dispatcher.deliver(job).await;
            }
            tracing::debug!(subscription_id = %id, "Webhook worker stopped");
        });
    }

    /// Remove a subscription; its worker drains and exits.
    pub fn remove(&self, id: Uuid) -> Option<WebhookSubscription> {
        self.senders.remove(&id);
        self.subscriptions.remove(&id).map(|(_, sub)| sub)
    }

    pub fn get(&self, id: Uuid) -> Option<WebhookSubscription> {
        self.subscriptions.get(&id).map(|s| s.clone())
    }

    pub fn list(&self) -> Vec<WebhookSubscription> {
        let mut subs: Vec<WebhookSubscription> =
            self.subscriptions.iter().map(|s| s.clone()).collect();
        subs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        subs
    }

    /// Subscribe to the event bus and fan events out to matching
    /// subscriptions.
    pub fn start(self: &Arc<Self>, bus: &EventBus) {
        let mut rx = bus.subscribe();
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => dispatcher.fan_out(&event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "Webhook fan-out lagged behind");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        tracing::info!("Event bus closed, stopping webhook fan-out");
                        break;
                    }
                }
            }
        });
    }

    async fn fan_out(&self, event: &HubEvent) {
        let event_type = event.event_type();
        let data = match serde_json::to_value(event) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize event");
                return;
            }
        };

        // Snapshot matching subscriptions before awaiting; map guards must
        // not be held across suspension points.
        let matching: Vec<WebhookSubscription> = self
            .subscriptions
            .iter()
            .filter(|sub| sub.active && sub.matches(event_type))
            .map(|sub| sub.clone())
            .collect();

        for sub in matching {
            let payload = WebhookPayload {
                delivery_id: Uuid::new_v4(),
                event_type: event_type.to_string(),
                timestamp: Utc::now(),
                data: data.clone(),
            };
            let body = match canonical_body(&payload) {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize webhook payload");
                    continue;
                }
            };
            let job = WebhookJob {
                subscription_id: sub.id,
                url: sub.url.clone(),
                body,
                secret: sub.secret.clone(),
                attempt: 0,
            };
            self.enqueue(sub.id, job).await;
        }
    }

    /// Enqueue onto the subscription's bounded queue: block briefly on a
    /// full queue, then drop with a counter increment.
    async fn enqueue(&self, id: Uuid, job: WebhookJob) {
        let Some(sender) = self.senders.get(&id).map(|s| s.clone()) else {
            return;
        };
        match sender.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                if tokio::time::timeout(ENQUEUE_GRACE, sender.send(job))
                    .await
                    .is_err()
                {
                    self.metrics.dropped_total.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(subscription_id = %id, "Webhook queue full, dropping delivery");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Drive one job to success, permanent failure, or retry exhaustion.
    async fn deliver(&self, mut job: WebhookJob) {
        let mut delay = self.config.backoff_base;

        while job.attempt < self.config.max_attempts {
            job.attempt += 1;
            let signature = sign_payload(&job.body, &job.secret);

            let result = self
                .client
                .post(&job.url)
                .header("Content-Type", "application/json")
                .header("X-Webhook-Signature", &signature)
                .header("X-Webhook-Id", job.subscription_id.to_string())
                .header("User-Agent", USER_AGENT)
                .body(job.body.clone())
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    self.update_stats(job.subscription_id, true);
                    self.metrics.delivered_total.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        subscription_id = %job.subscription_id,
                        attempt = job.attempt,
                        "Webhook delivered"
                    );
                    return;
                }
                Ok(response) => {
                    let status = response.status();
                    // Terminal client errors are not retriable, with the
                    // usual 408/429 exceptions.
                    let retriable = status.is_server_error()
                        || status == StatusCode::REQUEST_TIMEOUT
                        || status == StatusCode::TOO_MANY_REQUESTS;
                    tracing::warn!(
                        subscription_id = %job.subscription_id,
                        status = %status,
                        attempt = job.attempt,
                        retriable,
                        "Webhook delivery failed"
                    );
                    if !retriable {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        subscription_id = %job.subscription_id,
                        error = %e,
                        attempt = job.attempt,
                        "Webhook delivery failed"
                    );
                }
            }

            if job.attempt < self.config.max_attempts {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(self.config.backoff_cap);
            }
        }

        self.update_stats(job.subscription_id, false);
        self.metrics.failed_total.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            subscription_id = %job.subscription_id,
            attempts = job.attempt,
            "Webhook delivery failed permanently"
        );
    }

    fn update_stats(&self, id: Uuid, success: bool) {
        if let Some(mut sub) = self.subscriptions.get_mut(&id) {
            sub.last_delivery_at = Some(Utc::now());
            if success {
                sub.success_count += 1;
            } else {
                sub.failure_count += 1;
            }
        }
    }
}

impl std::fmt::Debug for WebhookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookDispatcher")
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub webhook: WebhookSubscription,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListWebhooksResponse {
    pub webhooks: Vec<WebhookSubscription>,
    pub total: usize,
}

/// POST /api/webhooks - Register a new webhook
pub async fn create_webhook(
    State(dispatcher): State<Arc<WebhookDispatcher>>,
    Json(req): Json<CreateWebhookRequest>,
) -> ApiResult<impl IntoResponse> {
    let url = reqwest::Url::parse(&req.url)
        .map_err(|_| ApiError::validation("Invalid URL format"))?;
    if req.events.is_empty() {
        return Err(ApiError::validation("At least one event type is required"));
    }
    if req.secret.len() < 16 {
        return Err(ApiError::validation("Secret must be at least 16 characters"));
    }

    let subscription = WebhookSubscription {
        id: Uuid::new_v4(),
        url: url.to_string(),
        events: req.events,
        description: req.description,
        active: true,
        secret: req.secret,
        created_at: Utc::now(),
        success_count: 0,
        failure_count: 0,
        last_delivery_at: None,
    };
    dispatcher.register(subscription.clone());

    tracing::info!(webhook_id = %subscription.id, url = %subscription.url, "Webhook registered");

    Ok((
        StatusCode::CREATED,
        Json(WebhookResponse {
            webhook: subscription,
        }),
    ))
}

/// GET /api/webhooks - List all webhooks
pub async fn list_webhooks(
    State(dispatcher): State<Arc<WebhookDispatcher>>,
) -> impl IntoResponse {
    let webhooks = dispatcher.list();
    let total = webhooks.len();
    Json(ListWebhooksResponse { webhooks, total })
}

/// GET /api/webhooks/{id} - Get a specific webhook
pub async fn get_webhook(
    State(dispatcher): State<Arc<WebhookDispatcher>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let webhook = dispatcher
        .get(id)
        .ok_or_else(|| ApiError::not_found("Webhook", id))?;
    Ok(Json(WebhookResponse { webhook }))
}

/// DELETE /api/webhooks/{id} - Remove a webhook
pub async fn delete_webhook(
    State(dispatcher): State<Arc<WebhookDispatcher>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    dispatcher
        .remove(id)
        .ok_or_else(|| ApiError::not_found("Webhook", id))?;
    tracing::info!(webhook_id = %id, "Webhook removed");
    Ok(StatusCode::NO_CONTENT)
}

/// Webhook routes router. The dispatcher is extracted as a substate of the
/// application state.
pub fn router() -> Router<crate::state::AppState> {
    Router::new()
        .route("/", post(create_webhook))
        .route("/", get(list_webhooks))
        .route("/:id", get(get_webhook))
        .route("/:id", delete(delete_webhook))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::SessionKind;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn subscription(url: &str, events: Vec<&str>) -> WebhookSubscription {
        WebhookSubscription {
            id: Uuid::new_v4(),
            url: url.to_string(),
            events: events.into_iter().map(String::from).collect(),
            description: None,
            active: true,
            secret: "supersecretkey123".to_string(),
            created_at: Utc::now(),
            success_count: 0,
            failure_count: 0,
            last_delivery_at: None,
        }
    }

    #[test]
    fn test_sign_payload_is_hex() {
        let signature = sign_payload(b"test payload", "supersecretkey123");
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_sign_payload_deterministic() {
        let a = sign_payload(b"same bytes", "secret");
        let b = sign_payload(b"same bytes", "secret");
        assert_eq!(a, b);
        assert_ne!(a, sign_payload(b"same bytes", "other secret"));
    }

    #[test]
    fn test_canonical_body_sorted_keys() -> Result<(), serde_json::Error> {
        let payload = WebhookPayload {
            delivery_id: Uuid::nil(),
            event_type: "completion_served".to_string(),
            timestamp: Utc::now(),
            data: serde_json::json!({"zebra": 1, "alpha": 2}),
        };
        let body = canonical_body(&payload)?;
        let text = String::from_utf8(body).expect("utf8");
        let alpha = text.find("alpha").expect("alpha");
        let zebra = text.find("zebra").expect("zebra");
        assert!(alpha < zebra);
        Ok(())
    }

    #[test]
    fn test_event_matching() {
        let wildcard = subscription("https://example.com", vec!["*"]);
        assert!(wildcard.matches("completion_served"));
        assert!(wildcard.matches("session_completed"));

        let narrow = subscription("https://example.com", vec!["session_completed"]);
        assert!(!narrow.matches("completion_served"));
        assert!(narrow.matches("session_completed"));
    }

    #[test]
    fn test_secret_not_serialized() -> Result<(), serde_json::Error> {
        let sub = subscription("https://example.com", vec!["*"]);
        let json = serde_json::to_string(&sub)?;
        assert!(!json.contains("supersecretkey123"));
        Ok(())
    }

    /// Minimal HTTP subscriber that scripts its status codes and records
    /// the headers of every request it sees.
    async fn scripted_subscriber(
        statuses: Vec<u16>,
    ) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        tokio::spawn(async move {
            for status in statuses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = vec![0u8; 16384];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                seen_clone.lock().unwrap().push(request);
                let reason = if status == 200 { "OK" } else { "Service Unavailable" };
                let response =
                    format!("HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status, reason);
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        (format!("http://{}", addr), seen)
    }

    fn test_config() -> WebhookConfig {
        WebhookConfig {
            max_attempts: 5,
            backoff_base: Duration::from_millis(10),
            backoff_cap: Duration::from_millis(40),
            queue_capacity: 8,
        }
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let (url, seen) = scripted_subscriber(vec![503, 503, 503, 200]).await;
        let dispatcher = Arc::new(WebhookDispatcher::new(test_config()));
        let sub = subscription(&url, vec!["*"]);
        let sub_id = sub.id;
        dispatcher.register(sub);

        let bus = EventBus::new(16);
        dispatcher.start(&bus);
        tokio::time::sleep(Duration::from_millis(20)).await;

        bus.publish(HubEvent::SessionCompleted {
            session_id: "s-1".to_string(),
            kind: SessionKind::Chat,
        });

        // Wait for delivery to settle: 3 failures with backoff, then 200.
        tokio::time::sleep(Duration::from_millis(500)).await;

        let requests = seen.lock().unwrap().clone();
        assert_eq!(requests.len(), 4);

        // X-Webhook-Id identical across attempts; signature identical since
        // the body bytes are identical.
        let ids: Vec<&str> = requests
            .iter()
            .map(|r| header_value(r, "x-webhook-id"))
            .collect();
        assert!(ids.iter().all(|id| *id == sub_id.to_string()));
        let signatures: Vec<&str> = requests
            .iter()
            .map(|r| header_value(r, "x-webhook-signature"))
            .collect();
        assert!(signatures.iter().all(|s| *s == signatures[0]));

        let sub = dispatcher.get(sub_id).expect("subscription");
        assert_eq!(sub.success_count, 1);
        assert_eq!(sub.failure_count, 0);
        assert_eq!(dispatcher.metrics.delivered(), 1);
    }

    #[tokio::test]
    async fn test_terminal_4xx_not_retried() {
        let (url, seen) = scripted_subscriber(vec![400, 400]).await;
        let dispatcher = Arc::new(WebhookDispatcher::new(test_config()));
        let sub = subscription(&url, vec!["*"]);
        let sub_id = sub.id;
        dispatcher.register(sub);

        let bus = EventBus::new(16);
        dispatcher.start(&bus);
        tokio::time::sleep(Duration::from_millis(20)).await;

        bus.publish(HubEvent::SessionCompleted {
            session_id: "s-1".to_string(),
            kind: SessionKind::Chat,
        });
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(seen.lock().unwrap().len(), 1);
        let sub = dispatcher.get(sub_id).expect("subscription");
        assert_eq!(sub.failure_count, 1);
        assert_eq!(dispatcher.metrics.failed(), 1);
    }

    #[tokio::test]
    async fn test_max_attempts_exhausted() {
        let (url, seen) = scripted_subscriber(vec![503; 6]).await;
        let dispatcher = Arc::new(WebhookDispatcher::new(test_config()));
        let sub = subscription(&url, vec!["*"]);
        dispatcher.register(sub);

        let bus = EventBus::new(16);
        dispatcher.start(&bus);
        tokio::time::sleep(Duration::from_millis(20)).await;

        bus.publish(HubEvent::SessionCompleted {
            session_id: "s-1".to_string(),
            kind: SessionKind::Chat,
        });
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(seen.lock().unwrap().len(), 5);
        assert_eq!(dispatcher.metrics.failed(), 1);
    }

    fn header_value<'a>(request: &'a str, name: &str) -> &'a str {
        request
            .lines()
            .find(|l| l.to_lowercase().starts_with(name))
            .and_then(|l| l.split_once(':'))
            .map(|(_, v)| v.trim())
            .unwrap_or("")
    }
}

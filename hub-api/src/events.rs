//! Gateway event bus.
//!
//! Components publish events onto a broadcast channel; the webhook
//! dispatcher fans them out to subscribers. Publishing never blocks the
//! request path.

use hub_core::SessionKind;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    /// A completion was served (fresh or from cache).
    CompletionServed {
        session_id: String,
        provider: String,
        model: String,
        input_tokens: u32,
        output_tokens: u32,
        cached: bool,
    },
    /// The reaper transitioned a session to completed.
    SessionCompleted {
        session_id: String,
        kind: SessionKind,
    },
}

impl HubEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            HubEvent::CompletionServed { .. } => "completion_served",
            HubEvent::SessionCompleted { .. } => "session_completed",
        }
    }
}

/// Broadcast bus for gateway events.
pub struct EventBus {
    tx: broadcast::Sender<HubEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Lagging or absent subscribers never block.
    pub fn publish(&self, event: HubEvent) {
        let event_type = event.event_type();
        if self.tx.send(event).is_err() {
            tracing::trace!(event_type, "No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.tx.subscribe()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(HubEvent::SessionCompleted {
            session_id: "s-1".to_string(),
            kind: SessionKind::Chat,
        });
        let event = rx.recv().await.expect("event");
        assert_eq!(event.event_type(), "session_completed");
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new(16);
        bus.publish(HubEvent::CompletionServed {
            session_id: "s-1".to_string(),
            provider: "claude".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            input_tokens: 10,
            output_tokens: 5,
            cached: false,
        });
    }

    #[test]
    fn test_event_serialization_tag() -> Result<(), serde_json::Error> {
        let event = HubEvent::CompletionServed {
            session_id: "s-1".to_string(),
            provider: "claude".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            input_tokens: 10,
            output_tokens: 5,
            cached: true,
        };
        let json = serde_json::to_string(&event)?;
        assert!(json.contains("\"type\":\"completion_served\""));
        Ok(())
    }
}

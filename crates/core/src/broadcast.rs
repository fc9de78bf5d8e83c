//! Fire-and-forget notifications for real-time subscribers.
//!
//! Everything downstream of the pipeline publishes onto one well-known
//! channel; consumers (the socket layer, out of scope here) filter by the
//! envelope's `type` field.

use {
    serde::Serialize,
    tokio::sync::broadcast,
    tracing::{debug, warn},
};

// ── Event names ─────────────────────────────────────────────────────────────

pub const EVENT_NEW_MESSAGE: &str = "new message";
pub const EVENT_NEW_CONVERSATION: &str = "new conversation";
pub const EVENT_CONVERSATION_UPDATE: &str = "conversation update";
pub const EVENT_MESSAGE_UPDATE: &str = "message update";
pub const EVENT_AI_TRANSCRIPTION: &str = "ai.transcription";
pub const EVENT_AI_SUGGESTIONS: &str = "ai.suggestions";
pub const EVENT_AI_SENTIMENT: &str = "ai.sentiment";
pub const EVENT_AI_CHATBOT: &str = "ai.chatbot";

/// Envelope published for every broadcast: `{ "type": ..., ...payload }`.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(flatten)]
    pub payload: serde_json::Value,
}

impl BroadcastEvent {
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// Process-scoped publish primitive, injected into each component at startup.
///
/// Publishing never blocks and never fails the caller; with no subscribers
/// the event is dropped, which is the normal state in tests and during boot.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BroadcastEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: BroadcastEvent) {
        if !event.payload.is_object() && !event.payload.is_null() {
            warn!(event_type = %event.event_type, "broadcast payload is not an object");
        }
        match self.tx.send(event) {
            Ok(receivers) => debug!(receivers, "broadcast delivered"),
            Err(_) => debug!("broadcast dropped (no subscribers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

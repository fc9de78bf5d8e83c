//! The provider-agnostic event shape all adapters normalize into.

use serde::{Deserialize, Serialize};

use crate::types::MessageKind;

/// Connection lifecycle reported by a provider for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Open,
    Connecting,
    Closed,
}

/// One normalized inbound message.
///
/// `lookup_key` identifies the channel the event belongs to in the provider's
/// own vocabulary (phone-number-id, bridge instance name, page/IG id); the
/// channel resolver turns it into a tenant-scoped channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub lookup_key: String,
    pub sender_phone: Option<String>,
    pub sender_external_id: Option<String>,
    pub sender_name: Option<String>,
    /// Provider message id, used for dedup and receipt reconciliation.
    pub external_id: String,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub media_url: Option<String>,
    /// Unix seconds as reported by the provider.
    pub timestamp: i64,
}

/// Canonical event produced by a provider adapter.
///
/// A webhook payload flattens to zero or more of these; non-message pings and
/// self-sent echoes flatten to none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CanonicalEvent {
    InboundMessage(InboundMessage),
    /// A delivery/read receipt. `provider_code` stays in the provider's own
    /// vocabulary; the status mapper translates it during reconciliation.
    DeliveryStatus {
        lookup_key: String,
        external_id: String,
        provider_code: String,
    },
    ConnectionState {
        lookup_key: String,
        state: ConnectionState,
    },
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_roundtrip() {
        let event = CanonicalEvent::InboundMessage(InboundMessage {
            lookup_key: "demo".into(),
            sender_phone: Some("5511999999999".into()),
            sender_external_id: None,
            sender_name: Some("Ana".into()),
            external_id: "m1".into(),
            kind: MessageKind::Text,
            content: Some("Hi".into()),
            media_url: None,
            timestamp: 1000,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"inbound_message\""));
        let back: CanonicalEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn test_delivery_status_roundtrip() {
        let event = CanonicalEvent::DeliveryStatus {
            lookup_key: "p1".into(),
            external_id: "wamid.x".into(),
            provider_code: "READ".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: CanonicalEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn test_connection_state_roundtrip() {
        let event = CanonicalEvent::ConnectionState {
            lookup_key: "demo".into(),
            state: ConnectionState::Open,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"state\":\"open\""));
        let back: CanonicalEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}

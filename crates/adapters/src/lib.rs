//! Provider adapters: webhook payload → canonical events, and canonical
//! outbound bodies → provider send APIs.
//!
//! Nothing untyped crosses this boundary. Each provider has a dedicated set
//! of serde payload structs that tolerate unknown and missing fields; a
//! payload that carries no recognizable events flattens to an empty vector,
//! which callers treat as a successful no-op.

pub mod bridge;
pub mod error;
pub mod meta;
pub mod senders;
pub mod status;
pub mod verify;
pub mod whatsapp_cloud;

pub use {
    error::{Error, Result},
    senders::{BridgeSender, GraphSender, ProviderSender, Recipient},
    status::map_provider_status,
    verify::{verify_signature, verify_subscription},
};

use palaver_core::{CanonicalEvent, Provider};

/// Parse a raw webhook payload for the given provider into zero or more
/// canonical events. Echo suppression happens inside the adapters, so
/// self-sent messages never reach the channel resolver.
pub fn parse(provider: Provider, payload: &serde_json::Value) -> Result<Vec<CanonicalEvent>> {
    match provider {
        Provider::WhatsappCloud => whatsapp_cloud::parse(payload),
        Provider::WhatsappBridge => bridge::parse(payload),
        Provider::Instagram => meta::parse("instagram", payload),
        Provider::Messenger => meta::parse("messenger", payload),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {palaver_core::MessageKind, serde_json::json};

    use super::*;

    #[test]
    fn test_dispatch_by_provider() {
        let bridge_payload = json!({
            "event": "messages.upsert",
            "instance": "demo",
            "data": {
                "key": { "remoteJid": "5511999999999@s.whatsapp.net", "fromMe": false, "id": "m1" },
                "message": { "conversation": "Hi" },
                "messageTimestamp": 1000
            }
        });
        let events = parse(Provider::WhatsappBridge, &bridge_payload).unwrap();
        assert_eq!(events.len(), 1);
        let CanonicalEvent::InboundMessage(msg) = &events[0] else {
            panic!("expected inbound message");
        };
        assert_eq!(msg.kind, MessageKind::Text);

        // The same payload through the cloud adapter is a structural no-op,
        // not an error: there is no entry array.
        let events = parse(Provider::WhatsappCloud, &bridge_payload).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_garbage_payload_is_parse_error() {
        let err = parse(Provider::WhatsappCloud, &json!("not an object")).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }
}

//! End-to-end pipeline tests: raw provider payloads in, stored
//! contacts/conversations/messages and broadcasts out.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use serde_json::json;

use {
    palaver_core::{
        Channel, ConversationStatus, Direction, EventBus, MessageKind, MessageStatus, Provider,
        new_id, now_ts,
    },
    palaver_pipeline::{EventProcessor, Ingestor, ProcessOutcome, Resolver, StatusReconciler},
    palaver_store::Store,
};

async fn setup() -> (Store, EventBus, EventProcessor) {
    let store = Store::connect_memory().await.unwrap();
    let bus = EventBus::new(64);
    let resolver = Resolver::new(store.clone());
    let ingestor = Ingestor::new(store.clone(), resolver.clone(), bus.clone());
    let reconciler = StatusReconciler::new(store.clone(), bus.clone());
    let processor = EventProcessor::new(store.clone(), resolver, ingestor, reconciler);
    (store, bus, processor)
}

fn bridge_channel(lookup_key: &str) -> Channel {
    Channel {
        id: new_id(),
        tenant_id: "t1".into(),
        channel_type: Provider::WhatsappBridge.channel_type(),
        provider: Provider::WhatsappBridge,
        lookup_key: lookup_key.into(),
        config: json!({ "instance_name": lookup_key }),
        is_active: true,
        connected_at: Some(now_ts()),
        created_at: now_ts(),
        updated_at: now_ts(),
    }
}

fn bridge_text_payload(from_me: bool) -> serde_json::Value {
    json!({
        "event": "messages.upsert",
        "instance": "demo",
        "data": {
            "key": {
                "remoteJid": "5511999999999@s.whatsapp.net",
                "fromMe": from_me,
                "id": "m1"
            },
            "message": { "conversation": "Hi" },
            "messageTimestamp": 1000
        }
    })
}

#[tokio::test]
async fn bridge_upsert_creates_contact_conversation_message() {
    let (store, bus, processor) = setup().await;
    let channel = bridge_channel("demo");
    store.insert_channel(&channel).await.unwrap();
    let mut events = bus.subscribe();

    let outcome = processor
        .process(Provider::WhatsappBridge, None, &bridge_text_payload(false))
        .await
        .unwrap();
    assert_eq!(outcome.messages, 1);

    let contact = store
        .find_contact("t1", Some("5511999999999"), None)
        .await
        .unwrap()
        .expect("contact created");
    assert_eq!(contact.name, "5511999999999");

    let conversation = store
        .find_conversation("t1", &channel.id, &contact.id)
        .await
        .unwrap()
        .expect("conversation created");
    assert_eq!(conversation.status, ConversationStatus::Open);

    let message = store
        .message_by_external_id("t1", "m1")
        .await
        .unwrap()
        .expect("message stored");
    assert_eq!(message.kind, MessageKind::Text);
    assert_eq!(message.content.as_deref(), Some("Hi"));
    assert_eq!(message.direction, Direction::Inbound);

    let first = events.recv().await.unwrap();
    assert_eq!(first.event_type, "new message");
    let second = events.recv().await.unwrap();
    assert_eq!(second.event_type, "new conversation");
}

#[tokio::test]
async fn from_me_echo_creates_nothing() {
    let (store, _bus, processor) = setup().await;
    store.insert_channel(&bridge_channel("demo")).await.unwrap();

    let outcome = processor
        .process(Provider::WhatsappBridge, None, &bridge_text_payload(true))
        .await
        .unwrap();
    assert_eq!(outcome, ProcessOutcome::default());

    assert!(store
        .find_contact("t1", Some("5511999999999"), None)
        .await
        .unwrap()
        .is_none());
    assert!(store.message_by_external_id("t1", "m1").await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_webhook_yields_one_message() {
    let (store, _bus, processor) = setup().await;
    store.insert_channel(&bridge_channel("demo")).await.unwrap();

    let payload = bridge_text_payload(false);
    processor
        .process(Provider::WhatsappBridge, None, &payload)
        .await
        .unwrap();
    processor
        .process(Provider::WhatsappBridge, None, &payload)
        .await
        .unwrap();

    // One contact, one conversation, one message — exactly.
    assert!(store
        .find_contact("t1", Some("5511999999999"), None)
        .await
        .unwrap()
        .is_some());
    let message = store.message_by_external_id("t1", "m1").await.unwrap().unwrap();
    let recent = store.recent_messages(&message.conversation_id, 10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].external_id.as_deref(), Some("m1"));
}

#[tokio::test]
async fn inbound_reopens_resolved_conversation() {
    let (store, _bus, processor) = setup().await;
    let channel = bridge_channel("demo");
    store.insert_channel(&channel).await.unwrap();

    processor
        .process(Provider::WhatsappBridge, None, &bridge_text_payload(false))
        .await
        .unwrap();
    let contact = store
        .find_contact("t1", Some("5511999999999"), None)
        .await
        .unwrap()
        .unwrap();
    let conversation = store
        .find_conversation("t1", &channel.id, &contact.id)
        .await
        .unwrap()
        .unwrap();
    store
        .set_conversation_status(&conversation.id, ConversationStatus::Resolved)
        .await
        .unwrap();

    let second = json!({
        "event": "messages.upsert",
        "instance": "demo",
        "data": {
            "key": { "remoteJid": "5511999999999@s.whatsapp.net", "fromMe": false, "id": "m2" },
            "message": { "conversation": "anyone there?" },
            "messageTimestamp": 2000
        }
    });
    processor
        .process(Provider::WhatsappBridge, None, &second)
        .await
        .unwrap();

    let got = store.conversation(&conversation.id).await.unwrap();
    assert_eq!(got.status, ConversationStatus::Open);
    assert_eq!(got.last_message_at, Some(2000));
}

#[tokio::test]
async fn connection_update_activates_channel() {
    let (store, _bus, processor) = setup().await;
    let mut channel = bridge_channel("demo");
    channel.is_active = false;
    channel.connected_at = None;
    store.insert_channel(&channel).await.unwrap();

    let payload = json!({
        "event": "connection.update",
        "instance": "demo",
        "data": { "state": "open" }
    });
    let outcome = processor
        .process(Provider::WhatsappBridge, None, &payload)
        .await
        .unwrap();
    assert_eq!(outcome.connections, 1);

    let got = store.channel(&channel.id).await.unwrap();
    assert!(got.is_active);
    assert!(got.connected_at.is_some());

    // Logout flips it back off.
    let payload = json!({ "event": "instance.logout", "instance": "demo", "data": {} });
    processor
        .process(Provider::WhatsappBridge, None, &payload)
        .await
        .unwrap();
    assert!(!store.channel(&channel.id).await.unwrap().is_active);
}

#[tokio::test]
async fn unknown_channel_is_acknowledged_no_op() {
    let (_store, _bus, processor) = setup().await;
    // No channel registered for "demo" at all.
    let outcome = processor
        .process(Provider::WhatsappBridge, None, &bridge_text_payload(false))
        .await
        .unwrap();
    assert_eq!(outcome.dropped, 1);
}

#[tokio::test]
async fn malformed_payload_is_acknowledged_no_op() {
    let (_store, _bus, processor) = setup().await;
    let outcome = processor
        .process(Provider::WhatsappCloud, None, &json!(42))
        .await
        .unwrap();
    assert_eq!(outcome.dropped, 1);
}

#[tokio::test]
async fn read_before_delivered_lands_on_read() {
    let (store, _bus, processor) = setup().await;
    store.insert_channel(&bridge_channel("demo")).await.unwrap();
    processor
        .process(Provider::WhatsappBridge, None, &bridge_text_payload(false))
        .await
        .unwrap();

    let receipt = |code: serde_json::Value| {
        json!({
            "event": "messages.update",
            "instance": "demo",
            "data": [{ "key": { "id": "m1" }, "update": { "status": code } }]
        })
    };

    processor
        .process(Provider::WhatsappBridge, None, &receipt(json!(4)))
        .await
        .unwrap();
    processor
        .process(Provider::WhatsappBridge, None, &receipt(json!(3)))
        .await
        .unwrap();

    let message = store.message_by_external_id("t1", "m1").await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Read);
}

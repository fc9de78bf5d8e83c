//! Message ingest: persist, bump recency, broadcast.

use {serde_json::json, tracing::info};

use {
    palaver_core::{
        BroadcastEvent, Channel, Conversation, Direction, EventBus, InboundMessage, Message,
        MessageStatus, SenderKind,
        broadcast::{EVENT_CONVERSATION_UPDATE, EVENT_NEW_CONVERSATION, EVENT_NEW_MESSAGE},
        jobs::OutboundMessage,
        new_id, now_ts,
    },
    palaver_store::Store,
};

use crate::{error::Result, resolver::Resolver};

/// Persists canonical messages and publishes the matching broadcast events.
#[derive(Clone)]
pub struct Ingestor {
    store: Store,
    resolver: Resolver,
    bus: EventBus,
}

impl Ingestor {
    #[must_use]
    pub fn new(store: Store, resolver: Resolver, bus: EventBus) -> Self {
        Self {
            store,
            resolver,
            bus,
        }
    }

    /// Full inbound path for one canonical message: resolve contact and
    /// conversation, persist idempotently, bump recency, broadcast.
    ///
    /// Duplicate delivery (same provider message id) returns the existing
    /// message and publishes nothing.
    pub async fn ingest_inbound(
        &self,
        channel: &Channel,
        inbound: &InboundMessage,
    ) -> Result<Message> {
        let contact = self.resolver.resolve_contact(&channel.tenant_id, inbound).await?;
        let (conversation, conversation_created) = self
            .resolver
            .resolve_conversation(&channel.tenant_id, &channel.id, &contact.id, None)
            .await?;

        let now = now_ts();
        let message = Message {
            id: new_id(),
            tenant_id: channel.tenant_id.clone(),
            conversation_id: conversation.id.clone(),
            sender: SenderKind::Contact,
            direction: Direction::Inbound,
            kind: inbound.kind,
            content: inbound.content.clone(),
            media_url: inbound.media_url.clone(),
            media_type: None,
            status: MessageStatus::Sent,
            external_id: Some(inbound.external_id.clone()),
            error: None,
            metadata: json!({}),
            created_at: if inbound.timestamp > 0 { inbound.timestamp } else { now },
            updated_at: now,
        };

        let (message, created) = self.store.insert_message(&message).await?;
        if !created {
            // At-least-once delivery replayed the webhook; nothing new to say.
            return Ok(message);
        }

        self.store
            .touch_last_message(&conversation.id, message.created_at)
            .await?;

        info!(
            conversation_id = %conversation.id,
            message_id = %message.id,
            kind = message.kind.as_str(),
            new_conversation = conversation_created,
            "inbound message ingested"
        );

        self.publish_message_events(&conversation, &message, conversation_created);
        Ok(message)
    }

    /// Record an outbound message (agent reply, campaign send, bot reply)
    /// before dispatch. Status starts `pending`; the dispatcher advances it.
    pub async fn record_outbound(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        sender: SenderKind,
        body: &OutboundMessage,
        metadata: serde_json::Value,
    ) -> Result<Message> {
        let now = now_ts();
        let message = Message {
            id: new_id(),
            tenant_id: tenant_id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender,
            direction: Direction::Outbound,
            kind: body.kind,
            content: body.content.clone(),
            media_url: body.media_url.clone(),
            media_type: None,
            status: MessageStatus::Pending,
            external_id: None,
            error: None,
            metadata,
            created_at: now,
            updated_at: now,
        };
        let (message, _) = self.store.insert_message(&message).await?;
        self.store.touch_last_message(conversation_id, now).await?;

        let conversation = self.store.conversation(conversation_id).await?;
        self.publish_message_events(&conversation, &message, false);
        Ok(message)
    }

    fn publish_message_events(
        &self,
        conversation: &Conversation,
        message: &Message,
        conversation_created: bool,
    ) {
        self.bus.publish(BroadcastEvent::new(EVENT_NEW_MESSAGE, json!({
            "conversationId": conversation.id,
            "messageId": message.id,
            "direction": message.direction,
            "messageType": message.kind,
            "content": message.content,
        })));
        let event = if conversation_created {
            EVENT_NEW_CONVERSATION
        } else {
            EVENT_CONVERSATION_UPDATE
        };
        self.bus.publish(BroadcastEvent::new(event, json!({
            "conversationId": conversation.id,
            "contactId": conversation.contact_id,
            "status": conversation.status,
            "lastMessageAt": message.created_at,
        })));
    }
}

//! Delivery-receipt reconciliation.

use {serde_json::json, tracing::debug};

use {
    palaver_adapters::map_provider_status,
    palaver_core::{
        BroadcastEvent, EventBus, MessageStatus, Provider,
        broadcast::EVENT_MESSAGE_UPDATE,
    },
    palaver_store::{Store, campaigns::StatField},
};

use crate::error::Result;

/// Applies provider receipts to stored messages, propagating campaign
/// recipient state. Receipts are accepted in any order; a receipt that does
/// not advance the status is a no-op.
#[derive(Clone)]
pub struct StatusReconciler {
    store: Store,
    bus: EventBus,
}

impl StatusReconciler {
    #[must_use]
    pub fn new(store: Store, bus: EventBus) -> Self {
        Self { store, bus }
    }

    pub async fn apply(
        &self,
        provider: Provider,
        tenant_id: &str,
        external_id: &str,
        provider_code: &str,
    ) -> Result<()> {
        let status = map_provider_status(provider, provider_code);
        let Some((message, changed)) = self
            .store
            .update_message_status_forward(tenant_id, external_id, status)
            .await?
        else {
            // Receipts can outlive their message (pruned, or sent before we
            // tracked it); nothing to reconcile.
            debug!(external_id, "receipt for unknown message, dropping");
            return Ok(());
        };

        if !changed {
            debug!(external_id, status = status.as_str(), "receipt did not advance status");
            return Ok(());
        }

        self.propagate_campaign(&message.conversation_id, &message.metadata, status)
            .await?;

        self.bus.publish(BroadcastEvent::new(EVENT_MESSAGE_UPDATE, json!({
            "conversationId": message.conversation_id,
            "messageId": message.id,
            "status": status,
        })));
        Ok(())
    }

    /// When the message belongs to a campaign, mirror the receipt on the
    /// recipient row and the campaign counters. The forward-only recipient
    /// update makes the counter bump exactly-once under duplicate receipts.
    async fn propagate_campaign(
        &self,
        conversation_id: &str,
        metadata: &serde_json::Value,
        status: MessageStatus,
    ) -> Result<()> {
        let Some(campaign_id) = metadata.get("campaign_id").and_then(|v| v.as_str()) else {
            return Ok(());
        };
        let field = match status {
            MessageStatus::Delivered => StatField::Delivered,
            MessageStatus::Read => StatField::Read,
            MessageStatus::Failed => StatField::Failed,
            // `sent` is counted by the campaign send job itself.
            MessageStatus::Pending | MessageStatus::Sent => return Ok(()),
        };

        let conversation = self.store.conversation(conversation_id).await?;
        let advanced = self
            .store
            .update_recipient_status(campaign_id, &conversation.contact_id, status, None)
            .await?;
        if advanced {
            self.store.increment_campaign_stat(campaign_id, field).await?;
        }
        Ok(())
    }
}

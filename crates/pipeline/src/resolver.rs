//! Channel and contact/conversation resolution.

use tracing::{debug, warn};

use {
    palaver_core::{Channel, Contact, Conversation, InboundMessage, Provider},
    palaver_store::Store,
};

use crate::error::Result;

/// Maps provider identifiers to tenant-scoped records, creating contacts and
/// conversations on first contact. All find-or-create paths tolerate
/// concurrent duplicate webhooks.
#[derive(Clone)]
pub struct Resolver {
    store: Store,
}

impl Resolver {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Resolve the channel a webhook event belongs to. `None` is an expected
    /// steady-state outcome (stale subscriptions keep delivering after a
    /// channel is disconnected) and must be acknowledged upstream.
    pub async fn resolve_channel(
        &self,
        provider: Provider,
        lookup_key: &str,
    ) -> Result<Option<Channel>> {
        let channel = self.store.channel_by_lookup_key(provider, lookup_key).await?;
        if channel.is_none() {
            warn!(
                provider = provider.as_str(),
                lookup_key, "no channel for webhook event, dropping"
            );
        }
        Ok(channel)
    }

    pub async fn resolve_contact(
        &self,
        tenant_id: &str,
        inbound: &InboundMessage,
    ) -> Result<Contact> {
        let contact = self
            .store
            .find_or_create_contact(
                tenant_id,
                inbound.sender_phone.as_deref(),
                inbound.sender_external_id.as_deref(),
                inbound.sender_name.as_deref(),
            )
            .await?;
        Ok(contact)
    }

    /// Find or create the (tenant, channel, contact) thread. A `resolved`
    /// conversation is reopened by new inbound activity. Returns the
    /// conversation plus whether it was just created.
    pub async fn resolve_conversation(
        &self,
        tenant_id: &str,
        channel_id: &str,
        contact_id: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<(Conversation, bool)> {
        let (conversation, created) = self
            .store
            .find_or_create_conversation(tenant_id, channel_id, contact_id, metadata)
            .await?;
        if !created && self.store.reopen_if_resolved(&conversation.id).await? {
            debug!(conversation_id = %conversation.id, "reopened resolved conversation");
            // Re-read so callers see the reopened status.
            let conversation = self.store.conversation(&conversation.id).await?;
            return Ok((conversation, false));
        }
        Ok((conversation, created))
    }
}

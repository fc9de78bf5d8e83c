//! Outbound delivery: branch by channel to the right provider send API.

use std::sync::Arc;

use {
    async_trait::async_trait,
    tracing::{info, warn},
};

use {
    palaver_adapters::{ProviderSender, Recipient},
    palaver_core::{
        Provider,
        jobs::{JOB_SEND_MESSAGE, PRIORITY_SEND, QUEUE_MESSAGES, SendMessageJob},
    },
    palaver_queue::{Job, JobHandler, RetryPolicy},
    palaver_store::Store,
};

use crate::error::Result;

/// Provider send failures retry with exponential backoff over 3 attempts.
pub fn send_retry_policy() -> RetryPolicy {
    RetryPolicy::exponential(3, 2000)
}

/// Build the queue job for one outbound send.
pub fn send_job(payload: &SendMessageJob) -> palaver_queue::Result<Job> {
    Ok(Job::new(QUEUE_MESSAGES, JOB_SEND_MESSAGE, payload)?
        .priority(PRIORITY_SEND)
        .policy(send_retry_policy()))
}

/// Routes outbound messages to the correct provider client based on the
/// channel's provider variant.
pub struct OutboundDispatcher {
    store: Store,
    graph: Arc<dyn ProviderSender>,
    bridge: Arc<dyn ProviderSender>,
}

impl OutboundDispatcher {
    #[must_use]
    pub fn new(store: Store, graph: Arc<dyn ProviderSender>, bridge: Arc<dyn ProviderSender>) -> Self {
        Self {
            store,
            graph,
            bridge,
        }
    }

    fn sender_for(&self, provider: Provider) -> &dyn ProviderSender {
        match provider {
            Provider::WhatsappBridge => self.bridge.as_ref(),
            Provider::WhatsappCloud | Provider::Instagram | Provider::Messenger => {
                self.graph.as_ref()
            },
        }
    }

    /// Perform one send attempt and reconcile the local message on success.
    /// Errors bubble to the queue for retry.
    pub async fn dispatch(&self, payload: &SendMessageJob) -> Result<()> {
        let channel = self.store.channel(&payload.channel_id).await?;
        let recipient = Recipient {
            phone: payload.recipient_phone.clone(),
            external_id: payload.recipient_external_id.clone(),
        };

        let provider_id = self
            .sender_for(channel.provider)
            .send(&channel, &recipient, &payload.message)
            .await?;

        self.store
            .mark_message_sent(&payload.message_id, &provider_id)
            .await?;
        info!(
            message_id = %payload.message_id,
            provider_id = %provider_id,
            channel_id = %channel.id,
            "outbound message sent"
        );
        Ok(())
    }
}

/// Queue handler for `send-message` jobs. On the final failed attempt the
/// message is marked `failed` with the stored error so it is never left
/// pending indefinitely.
pub struct SendMessageHandler {
    dispatcher: Arc<OutboundDispatcher>,
    store: Store,
}

impl SendMessageHandler {
    #[must_use]
    pub fn new(dispatcher: Arc<OutboundDispatcher>, store: Store) -> Self {
        Self { dispatcher, store }
    }
}

#[async_trait]
impl JobHandler for SendMessageHandler {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        let payload: SendMessageJob = job.payload_as()?;
        match self.dispatcher.dispatch(&payload).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if job.attempt + 1 >= job.policy.max_attempts {
                    warn!(
                        message_id = %payload.message_id,
                        error = %err,
                        "send retries exhausted, marking message failed"
                    );
                    self.store
                        .mark_message_failed(&payload.message_id, &err.to_string())
                        .await?;
                    self.propagate_campaign_failure(&payload, &err.to_string()).await?;
                }
                Err(err.into())
            },
        }
    }
}

impl SendMessageHandler {
    /// A failed campaign message also fails its recipient row, so campaign
    /// stats reflect the rejection. The recipient was marked `sent` at
    /// fan-out time, so completion accounting is unaffected.
    async fn propagate_campaign_failure(
        &self,
        payload: &SendMessageJob,
        error: &str,
    ) -> anyhow::Result<()> {
        let message = self.store.message(&payload.message_id).await?;
        let Some(campaign_id) = message.metadata.get("campaign_id").and_then(|v| v.as_str()) else {
            return Ok(());
        };
        let conversation = self.store.conversation(&message.conversation_id).await?;
        let advanced = self
            .store
            .update_recipient_status(
                campaign_id,
                &conversation.contact_id,
                palaver_core::MessageStatus::Failed,
                Some(error),
            )
            .await?;
        if advanced {
            self.store
                .increment_campaign_stat(campaign_id, palaver_store::campaigns::StatField::Failed)
                .await?;
        }
        Ok(())
    }
}

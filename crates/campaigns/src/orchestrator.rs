//! Campaign state machine and per-recipient fan-out.
//!
//! `draft → scheduled → running → {completed, cancelled}` with
//! `running ↔ paused` while recipients remain pending. A campaign completes
//! exactly when no recipient remains `pending`; per-recipient failures never
//! block the rest of the fan-out.

use {
    serde_json::json,
    tracing::{debug, info, warn},
};

use {
    palaver_core::{
        Campaign, CampaignStatus, ChannelType, MessageStatus, SenderKind,
        jobs::{
            CampaignSendJob, CampaignStartJob, JOB_CAMPAIGN_SEND, JOB_CAMPAIGN_START,
            OutboundMessage, PRIORITY_CAMPAIGN, QUEUE_CAMPAIGNS, SendMessageJob,
        },
        now_ts,
    },
    palaver_pipeline::{Ingestor, Resolver, send_job},
    palaver_queue::{Job, JobProducer, RetryPolicy},
    palaver_store::{Store, campaigns::StatField},
};

use crate::error::{Error, Result};

/// Campaign jobs retry with exponential backoff over 3 attempts.
pub fn campaign_retry_policy() -> RetryPolicy {
    RetryPolicy::exponential(3, 2000)
}

pub struct CampaignOrchestrator {
    store: Store,
    producer: JobProducer,
    resolver: Resolver,
    ingestor: Ingestor,
}

impl CampaignOrchestrator {
    #[must_use]
    pub fn new(store: Store, producer: JobProducer, resolver: Resolver, ingestor: Ingestor) -> Self {
        Self {
            store,
            producer,
            resolver,
            ingestor,
        }
    }

    /// Move a draft to `scheduled` and enqueue its start job with the
    /// computed delay (`max(0, scheduled_at - now)`).
    pub async fn schedule(&self, campaign_id: &str) -> Result<()> {
        let campaign = self.store.campaign(campaign_id).await?;
        if campaign.status != CampaignStatus::Draft {
            return Err(Error::wrong_status(campaign_id, campaign.status.as_str(), "draft"));
        }
        self.store
            .transition_campaign(campaign_id, CampaignStatus::Draft, CampaignStatus::Scheduled)
            .await?;

        let delay_ms = campaign
            .scheduled_at
            .map(|at| (at - now_ts()).max(0) as u64 * 1000)
            .unwrap_or(0);
        let payload = CampaignStartJob {
            campaign_id: campaign_id.to_string(),
            tenant_id: campaign.tenant_id.clone(),
        };
        let job = Job::new(QUEUE_CAMPAIGNS, JOB_CAMPAIGN_START, &payload)?
            .priority(PRIORITY_CAMPAIGN)
            .policy(campaign_retry_policy())
            .delay_ms(delay_ms);
        self.producer.enqueue(job).await?;
        info!(campaign_id, delay_ms, "campaign scheduled");
        Ok(())
    }

    /// Transition to `running` and fan out one send job per pending
    /// recipient. A campaign with no recipients completes immediately with
    /// `stats.total == 0`.
    pub async fn start(&self, campaign_id: &str) -> Result<Campaign> {
        let campaign = self.store.campaign(campaign_id).await?;
        let from = match campaign.status {
            CampaignStatus::Draft | CampaignStatus::Scheduled => campaign.status,
            CampaignStatus::Running => {
                debug!(campaign_id, "campaign already running");
                return Ok(campaign);
            },
            other => {
                return Err(Error::wrong_status(campaign_id, other.as_str(), "draft or scheduled"));
            },
        };

        let recipients = self.store.campaign_recipients(campaign_id).await?;
        let campaign = self
            .store
            .transition_campaign(campaign_id, from, CampaignStatus::Running)
            .await?;
        self.store
            .set_campaign_total(campaign_id, recipients.len() as i64)
            .await?;

        if recipients.is_empty() {
            let campaign = self
                .store
                .transition_campaign(campaign_id, CampaignStatus::Running, CampaignStatus::Completed)
                .await?;
            info!(campaign_id, "campaign had no recipients, completed immediately");
            return Ok(campaign);
        }

        let channel_type = self.store.channel(&campaign.channel_id).await?.channel_type;
        let pending: Vec<_> = recipients
            .iter()
            .filter(|r| r.status == MessageStatus::Pending)
            .collect();
        info!(
            campaign_id,
            total = recipients.len(),
            pending = pending.len(),
            "campaign running, fanning out"
        );
        for recipient in pending {
            self.enqueue_send(&campaign, channel_type, &recipient.contact_id)
                .await?;
        }
        Ok(campaign)
    }

    /// Stop enqueuing new recipient jobs. Jobs already in the queue still
    /// complete; their recipients are marked `sent` as usual.
    pub async fn pause(&self, campaign_id: &str) -> Result<Campaign> {
        Ok(self
            .store
            .transition_campaign(campaign_id, CampaignStatus::Running, CampaignStatus::Paused)
            .await?)
    }

    /// Re-enter `running` and re-enqueue the recipients still pending.
    pub async fn resume(&self, campaign_id: &str) -> Result<Campaign> {
        let campaign = self
            .store
            .transition_campaign(campaign_id, CampaignStatus::Paused, CampaignStatus::Running)
            .await?;
        let channel_type = self.store.channel(&campaign.channel_id).await?.channel_type;
        let pending = self.store.pending_recipients(campaign_id).await?;
        info!(campaign_id, pending = pending.len(), "campaign resumed");
        for recipient in &pending {
            self.enqueue_send(&campaign, channel_type, &recipient.contact_id)
                .await?;
        }
        if pending.is_empty() {
            return self.complete_if_drained(campaign_id).await;
        }
        Ok(campaign)
    }

    /// Cancel from any in-flight state. In-flight recipient jobs see the
    /// status change and skip themselves.
    pub async fn cancel(&self, campaign_id: &str) -> Result<Campaign> {
        let campaign = self.store.campaign(campaign_id).await?;
        Ok(self
            .store
            .transition_campaign(campaign_id, campaign.status, CampaignStatus::Cancelled)
            .await?)
    }

    /// Deliver one campaign message to one recipient. Any permanent
    /// per-recipient problem is recorded on the recipient row and the
    /// fan-out continues; only infrastructure errors propagate for retry.
    pub async fn handle_send(&self, payload: &CampaignSendJob) -> Result<()> {
        let campaign = self.store.campaign(&payload.campaign_id).await?;
        if campaign.status != CampaignStatus::Running {
            // Paused or cancelled mid-flight; leave the recipient pending.
            debug!(
                campaign_id = %payload.campaign_id,
                status = campaign.status.as_str(),
                "campaign not running, skipping recipient"
            );
            return Ok(());
        }

        let recipient = self
            .store
            .campaign_recipient(&payload.campaign_id, &payload.contact_id)
            .await?;
        if !recipient.is_some_and(|r| r.status == MessageStatus::Pending) {
            // Duplicate job delivery after the recipient already advanced.
            debug!(
                campaign_id = %payload.campaign_id,
                contact_id = %payload.contact_id,
                "recipient already processed, skipping"
            );
            return Ok(());
        }

        let contact = self.store.contact(&payload.contact_id).await?;
        let (recipient_phone, recipient_external_id) = (contact.phone, contact.external_id);
        if recipient_phone.is_none() && recipient_external_id.is_none() {
            // No deliverable address; record and move on.
            return self
                .fail_recipient(&payload.campaign_id, &payload.contact_id, "contact has no address")
                .await;
        }

        let metadata = json!({ "source": "campaign", "campaign_id": payload.campaign_id });
        let (conversation, _) = self
            .resolver
            .resolve_conversation(
                &payload.tenant_id,
                &payload.channel_id,
                &payload.contact_id,
                Some(&metadata),
            )
            .await?;

        let message = self
            .ingestor
            .record_outbound(
                &payload.tenant_id,
                &conversation.id,
                SenderKind::Agent,
                &payload.message,
                json!({ "campaign_id": payload.campaign_id }),
            )
            .await?;

        let send = SendMessageJob {
            message_id: message.id.clone(),
            conversation_id: conversation.id,
            channel_id: payload.channel_id.clone(),
            channel_type: payload.channel_type,
            message: payload.message.clone(),
            recipient_phone,
            recipient_external_id,
        };
        self.producer.enqueue(send_job(&send)?).await?;

        let advanced = self
            .store
            .update_recipient_status(&payload.campaign_id, &payload.contact_id, MessageStatus::Sent, None)
            .await?;
        if advanced {
            self.store
                .increment_campaign_stat(&payload.campaign_id, StatField::Sent)
                .await?;
        }

        self.complete_if_drained(&payload.campaign_id).await?;
        Ok(())
    }

    async fn enqueue_send(
        &self,
        campaign: &Campaign,
        channel_type: ChannelType,
        contact_id: &str,
    ) -> Result<()> {
        let payload = CampaignSendJob {
            campaign_id: campaign.id.clone(),
            tenant_id: campaign.tenant_id.clone(),
            channel_id: campaign.channel_id.clone(),
            channel_type,
            contact_id: contact_id.to_string(),
            message: outbound_body(campaign),
        };
        let job = Job::new(QUEUE_CAMPAIGNS, JOB_CAMPAIGN_SEND, &payload)?
            .priority(PRIORITY_CAMPAIGN)
            .policy(campaign_retry_policy());
        self.producer.enqueue(job).await?;
        Ok(())
    }

    async fn fail_recipient(&self, campaign_id: &str, contact_id: &str, reason: &str) -> Result<()> {
        warn!(campaign_id, contact_id, reason, "campaign recipient failed");
        let advanced = self
            .store
            .update_recipient_status(campaign_id, contact_id, MessageStatus::Failed, Some(reason))
            .await?;
        if advanced {
            self.store
                .increment_campaign_stat(campaign_id, StatField::Failed)
                .await?;
        }
        self.complete_if_drained(campaign_id).await?;
        Ok(())
    }

    /// Transition to `completed` exactly when no recipient remains pending.
    /// Two recipients finishing concurrently may both observe zero; the
    /// guarded transition makes the completion apply once.
    async fn complete_if_drained(&self, campaign_id: &str) -> Result<Campaign> {
        let campaign = self.store.campaign(campaign_id).await?;
        if campaign.status != CampaignStatus::Running {
            return Ok(campaign);
        }
        if self.store.pending_recipient_count(campaign_id).await? > 0 {
            return Ok(campaign);
        }
        match self
            .store
            .transition_campaign(campaign_id, CampaignStatus::Running, CampaignStatus::Completed)
            .await
        {
            Ok(campaign) => {
                info!(campaign_id, "campaign completed");
                Ok(campaign)
            },
            // Lost the race to another worker's completion.
            Err(palaver_store::Error::InvalidTransition { .. }) => {
                Ok(self.store.campaign(campaign_id).await?)
            },
            Err(err) => Err(err.into()),
        }
    }
}

/// The outbound body every recipient receives: the campaign template when
/// one is referenced, else its plain content.
fn outbound_body(campaign: &Campaign) -> OutboundMessage {
    match &campaign.template_id {
        Some(template_id) => OutboundMessage {
            kind: palaver_core::MessageKind::Template,
            content: campaign.content.clone(),
            media_url: None,
            template_id: Some(template_id.clone()),
            template_params: campaign.template_params.clone(),
        },
        None => OutboundMessage::text(campaign.content.clone().unwrap_or_default()),
    }
}

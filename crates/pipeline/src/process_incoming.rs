//! The `process-incoming` path: run adapter → resolve → ingest inside the
//! queue worker instead of the webhook request handler.

use std::sync::Arc;

use {
    async_trait::async_trait,
    tracing::{debug, warn},
};

use {
    palaver_adapters::{self as adapters},
    palaver_core::{
        CanonicalEvent, ConnectionState, Provider,
        jobs::{JOB_PROCESS_INCOMING, PRIORITY_PROCESS_INCOMING, ProcessIncomingJob, QUEUE_WEBHOOKS},
    },
    palaver_queue::{Job, JobHandler, RetryPolicy},
    palaver_store::Store,
};

use crate::{error::Result, ingest::Ingestor, resolver::Resolver, status::StatusReconciler};

/// Provider payloads are highly variable and transient errors common:
/// exponential backoff over 5 attempts.
pub fn webhook_retry_policy() -> RetryPolicy {
    RetryPolicy::exponential(5, 1000)
}

/// Build the queue job the webhook surface enqueues for deferred processing.
pub fn incoming_job(payload: &ProcessIncomingJob) -> palaver_queue::Result<Job> {
    Ok(Job::new(QUEUE_WEBHOOKS, JOB_PROCESS_INCOMING, payload)?
        .priority(PRIORITY_PROCESS_INCOMING)
        .policy(webhook_retry_policy()))
}

/// What one webhook payload amounted to, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub messages: usize,
    pub statuses: usize,
    pub connections: usize,
    pub dropped: usize,
}

/// Drives a raw provider payload through parse, channel resolution, ingest,
/// and receipt reconciliation.
#[derive(Clone)]
pub struct EventProcessor {
    store: Store,
    resolver: Resolver,
    ingestor: Ingestor,
    reconciler: StatusReconciler,
}

impl EventProcessor {
    #[must_use]
    pub fn new(
        store: Store,
        resolver: Resolver,
        ingestor: Ingestor,
        reconciler: StatusReconciler,
    ) -> Self {
        Self {
            store,
            resolver,
            ingestor,
            reconciler,
        }
    }

    /// Process one raw webhook payload.
    ///
    /// A malformed payload or an unknown channel is a successful no-op —
    /// failing would only trigger provider redelivery storms for events we
    /// will never be able to use. Only infrastructure errors propagate.
    pub async fn process(
        &self,
        provider: Provider,
        channel_hint: Option<&str>,
        payload: &serde_json::Value,
    ) -> Result<ProcessOutcome> {
        let events = match adapters::parse(provider, payload) {
            Ok(events) => events,
            Err(err) => {
                warn!(provider = provider.as_str(), error = %err, "unparseable webhook payload, dropping");
                return Ok(ProcessOutcome {
                    dropped: 1,
                    ..Default::default()
                });
            },
        };

        let mut outcome = ProcessOutcome::default();
        for event in events {
            match event {
                CanonicalEvent::InboundMessage(inbound) => {
                    let Some(channel) = self
                        .resolver
                        .resolve_channel(provider, &inbound.lookup_key)
                        .await?
                    else {
                        outcome.dropped += 1;
                        continue;
                    };
                    // A job pinned to a channel must not ingest for another
                    // one; stale routing keys happen when channels are
                    // re-provisioned.
                    if channel_hint.is_some_and(|hint| hint != channel.id) {
                        warn!(
                            expected = channel_hint.unwrap_or_default(),
                            resolved = %channel.id,
                            "channel mismatch for inbound event, dropping"
                        );
                        outcome.dropped += 1;
                        continue;
                    }
                    self.ingestor.ingest_inbound(&channel, &inbound).await?;
                    outcome.messages += 1;
                },
                CanonicalEvent::DeliveryStatus {
                    lookup_key,
                    external_id,
                    provider_code,
                } => {
                    let Some(channel) =
                        self.resolver.resolve_channel(provider, &lookup_key).await?
                    else {
                        outcome.dropped += 1;
                        continue;
                    };
                    self.reconciler
                        .apply(provider, &channel.tenant_id, &external_id, &provider_code)
                        .await?;
                    outcome.statuses += 1;
                },
                CanonicalEvent::ConnectionState { lookup_key, state } => {
                    let Some(channel) =
                        self.resolver.resolve_channel(provider, &lookup_key).await?
                    else {
                        outcome.dropped += 1;
                        continue;
                    };
                    self.store
                        .set_channel_active(&channel.id, state == ConnectionState::Open)
                        .await?;
                    outcome.connections += 1;
                },
            }
        }
        debug!(provider = provider.as_str(), ?outcome, "webhook payload processed");
        Ok(outcome)
    }
}

/// Queue handler for `process-incoming` jobs.
pub struct ProcessIncomingHandler {
    processor: Arc<EventProcessor>,
}

impl ProcessIncomingHandler {
    #[must_use]
    pub fn new(processor: Arc<EventProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl JobHandler for ProcessIncomingHandler {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        let payload: ProcessIncomingJob = job.payload_as()?;
        self.processor
            .process(
                payload.provider,
                payload.channel_id.as_deref(),
                &payload.raw_payload,
            )
            .await?;
        Ok(())
    }
}

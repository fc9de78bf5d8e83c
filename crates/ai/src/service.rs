//! The four enrichment jobs. Every one of them degrades to a deterministic
//! fallback on provider failure and still reports success — enrichment is
//! best-effort and must never block the underlying conversation.

use std::sync::Arc;

use {
    async_trait::async_trait,
    serde_json::json,
    tracing::{info, warn},
};

use {
    palaver_core::{
        BroadcastEvent, EventBus, SenderKind,
        broadcast::{
            EVENT_AI_CHATBOT, EVENT_AI_SENTIMENT, EVENT_AI_SUGGESTIONS, EVENT_AI_TRANSCRIPTION,
        },
        jobs::{
            ChatbotJob, JOB_AI_CHATBOT, JOB_AI_SENTIMENT, JOB_AI_SUGGEST, JOB_AI_TRANSCRIBE,
            OutboundMessage, PRIORITY_CHATBOT, PRIORITY_SENTIMENT, PRIORITY_SUGGEST,
            PRIORITY_TRANSCRIBE, QUEUE_AI, SendMessageJob, SentimentJob, SuggestJob, TranscribeJob,
        },
    },
    palaver_pipeline::{Ingestor, send_job},
    palaver_queue::{Job, JobHandler, JobProducer, RetryPolicy},
    palaver_store::Store,
};

use crate::{
    client::ModelClient,
    error::Result,
    sentiment::{Sentiment, keyword_sentiment, parse_model_sentiment},
    suggest::{FALLBACK_SUGGESTIONS, conversation_context, parse_suggestions},
};

/// Further retries are not worth the latency or cost: fixed backoff, twice.
pub fn ai_retry_policy() -> RetryPolicy {
    RetryPolicy::fixed(2, 5000)
}

/// Used when transcription fails outright; the audio stays available to a
/// human listener either way.
const FALLBACK_TRANSCRIPTION: &str = "[transcription unavailable]";

/// Used when the chatbot model is down; a reply must still go out.
const FALLBACK_BOT_REPLY: &str =
    "Thanks for your message! A member of our team will get back to you shortly.";

fn ai_job(job_type: &str, payload: &impl serde::Serialize, priority: u8) -> palaver_queue::Result<Job> {
    Ok(Job::new(QUEUE_AI, job_type, payload)?
        .priority(priority)
        .policy(ai_retry_policy()))
}

pub fn transcribe_job(payload: &TranscribeJob) -> palaver_queue::Result<Job> {
    ai_job(JOB_AI_TRANSCRIBE, payload, PRIORITY_TRANSCRIBE)
}

pub fn suggest_job(payload: &SuggestJob) -> palaver_queue::Result<Job> {
    ai_job(JOB_AI_SUGGEST, payload, PRIORITY_SUGGEST)
}

pub fn sentiment_job(payload: &SentimentJob) -> palaver_queue::Result<Job> {
    ai_job(JOB_AI_SENTIMENT, payload, PRIORITY_SENTIMENT)
}

pub fn chatbot_job(payload: &ChatbotJob) -> palaver_queue::Result<Job> {
    ai_job(JOB_AI_CHATBOT, payload, PRIORITY_CHATBOT)
}

pub struct EnrichmentService {
    store: Store,
    bus: EventBus,
    client: Arc<dyn ModelClient>,
    ingestor: Ingestor,
    producer: JobProducer,
}

impl EnrichmentService {
    #[must_use]
    pub fn new(
        store: Store,
        bus: EventBus,
        client: Arc<dyn ModelClient>,
        ingestor: Ingestor,
        producer: JobProducer,
    ) -> Self {
        Self {
            store,
            bus,
            client,
            ingestor,
            producer,
        }
    }

    /// Transcribe an audio message and merge the text into its metadata.
    pub async fn transcribe(&self, payload: &TranscribeJob) -> Result<String> {
        let text = match self
            .client
            .transcribe(&payload.audio_url, payload.language.as_deref())
            .await
        {
            Ok(text) => text,
            Err(err) => {
                warn!(message_id = %payload.message_id, error = %err, "transcription fell back");
                FALLBACK_TRANSCRIPTION.to_string()
            },
        };

        let message = self
            .store
            .merge_message_metadata(&payload.message_id, &json!({ "transcription": text }))
            .await?;
        self.bus.publish(BroadcastEvent::new(EVENT_AI_TRANSCRIPTION, json!({
            "conversationId": message.conversation_id,
            "messageId": payload.message_id,
            "transcription": text,
        })));
        Ok(text)
    }

    /// Produce exactly three short reply suggestions for the conversation
    /// and merge them into its metadata.
    pub async fn suggest(&self, payload: &SuggestJob) -> Result<Vec<String>> {
        let recent = self.store.recent_messages(&payload.conversation_id, 10).await?;
        let context = conversation_context(&recent);

        let suggestions = match self
            .client
            .complete(
                "You draft short reply suggestions for a customer support agent. \
                 Reply with exactly three suggestions, one per line, no preamble.",
                &context,
            )
            .await
        {
            Ok(output) => parse_suggestions(&output),
            Err(err) => {
                warn!(conversation_id = %payload.conversation_id, error = %err, "suggestions fell back");
                FALLBACK_SUGGESTIONS.map(str::to_string).to_vec()
            },
        };

        self.store
            .merge_conversation_metadata(
                &payload.conversation_id,
                &json!({ "suggestions": suggestions }),
            )
            .await?;
        self.bus.publish(BroadcastEvent::new(EVENT_AI_SUGGESTIONS, json!({
            "conversationId": payload.conversation_id,
            "suggestions": suggestions,
        })));
        Ok(suggestions)
    }

    /// Classify one message's sentiment and merge it into the message
    /// metadata. Always yields a valid label and an in-range score.
    pub async fn sentiment(&self, payload: &SentimentJob) -> Result<Sentiment> {
        let sentiment = match self
            .client
            .complete(
                "Classify the sentiment of the customer message. Respond with JSON: \
                 {\"label\": \"positive\"|\"neutral\"|\"negative\", \"score\": 0..1}.",
                &payload.content,
            )
            .await
        {
            Ok(output) => match parse_model_sentiment(&output) {
                Some(sentiment) => sentiment,
                None => {
                    warn!(message_id = %payload.message_id, "unusable sentiment output, using keywords");
                    keyword_sentiment(&payload.content)
                },
            },
            Err(err) => {
                warn!(message_id = %payload.message_id, error = %err, "sentiment fell back to keywords");
                keyword_sentiment(&payload.content)
            },
        };

        let message = self
            .store
            .merge_message_metadata(
                &payload.message_id,
                &json!({ "sentiment": { "label": sentiment.label, "score": sentiment.score } }),
            )
            .await?;
        self.bus.publish(BroadcastEvent::new(EVENT_AI_SENTIMENT, json!({
            "conversationId": message.conversation_id,
            "messageId": payload.message_id,
            "label": sentiment.label,
            "score": sentiment.score,
        })));
        Ok(sentiment)
    }

    /// Generate a bot reply, persist it as an outbound bot message, enqueue
    /// the provider send, and broadcast. This job has the side effects of
    /// the ingest pipeline on top of producing text.
    pub async fn chatbot(&self, payload: &ChatbotJob) -> Result<String> {
        let conversation = self.store.conversation(&payload.conversation_id).await?;
        let channel = self.store.channel(&conversation.channel_id).await?;
        let contact = self.store.contact(&conversation.contact_id).await?;

        let recent = self.store.recent_messages(&payload.conversation_id, 10).await?;
        let context = conversation_context(&recent);
        let prompt = format!("{context}\ncustomer: {}", payload.message);

        let reply = match self
            .client
            .complete(
                "You are a helpful customer-support assistant. Answer briefly and concretely.",
                &prompt,
            )
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                warn!(chatbot_id = %payload.chatbot_id, error = %err, "chatbot fell back to canned reply");
                FALLBACK_BOT_REPLY.to_string()
            },
        };

        let body = OutboundMessage::text(reply.clone());
        let message = self
            .ingestor
            .record_outbound(
                &payload.tenant_id,
                &payload.conversation_id,
                SenderKind::Bot,
                &body,
                json!({ "chatbot_id": payload.chatbot_id }),
            )
            .await?;

        let send = SendMessageJob {
            message_id: message.id.clone(),
            conversation_id: payload.conversation_id.clone(),
            channel_id: channel.id.clone(),
            channel_type: channel.channel_type,
            message: body,
            recipient_phone: contact.phone,
            recipient_external_id: contact.external_id,
        };
        self.producer.enqueue(send_job(&send)?).await?;

        info!(
            conversation_id = %payload.conversation_id,
            chatbot_id = %payload.chatbot_id,
            "chatbot reply dispatched"
        );
        self.bus.publish(BroadcastEvent::new(EVENT_AI_CHATBOT, json!({
            "conversationId": payload.conversation_id,
            "messageId": message.id,
            "reply": reply,
        })));
        Ok(reply)
    }
}

// ── Queue handlers ──────────────────────────────────────────────────────────

pub struct TranscribeHandler(pub Arc<EnrichmentService>);

#[async_trait]
impl JobHandler for TranscribeHandler {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        let payload: TranscribeJob = job.payload_as()?;
        self.0.transcribe(&payload).await?;
        Ok(())
    }
}

pub struct SuggestHandler(pub Arc<EnrichmentService>);

#[async_trait]
impl JobHandler for SuggestHandler {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        let payload: SuggestJob = job.payload_as()?;
        self.0.suggest(&payload).await?;
        Ok(())
    }
}

pub struct SentimentHandler(pub Arc<EnrichmentService>);

#[async_trait]
impl JobHandler for SentimentHandler {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        let payload: SentimentJob = job.payload_as()?;
        self.0.sentiment(&payload).await?;
        Ok(())
    }
}

pub struct ChatbotHandler(pub Arc<EnrichmentService>);

#[async_trait]
impl JobHandler for ChatbotHandler {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        let payload: ChatbotJob = job.payload_as()?;
        self.0.chatbot(&payload).await?;
        Ok(())
    }
}

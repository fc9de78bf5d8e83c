//! Job payload contracts.
//!
//! Jobs are the transport between pipeline components; these shapes are
//! stable wire contracts and must stay deserializable across versions.

use serde::{Deserialize, Serialize};

use crate::types::{ChannelType, MessageKind, Provider};

// ── Queue names ─────────────────────────────────────────────────────────────

pub const QUEUE_WEBHOOKS: &str = "webhooks";
pub const QUEUE_MESSAGES: &str = "messages";
pub const QUEUE_CAMPAIGNS: &str = "campaigns";
pub const QUEUE_AI: &str = "ai";

// ── Job type names ──────────────────────────────────────────────────────────

pub const JOB_PROCESS_INCOMING: &str = "process-incoming";
pub const JOB_SEND_MESSAGE: &str = "send-message";
pub const JOB_CAMPAIGN_START: &str = "campaign-start";
pub const JOB_CAMPAIGN_SEND: &str = "campaign-send";
pub const JOB_AI_TRANSCRIBE: &str = "ai-transcribe";
pub const JOB_AI_SUGGEST: &str = "ai-suggest";
pub const JOB_AI_SENTIMENT: &str = "ai-sentiment";
pub const JOB_AI_CHATBOT: &str = "ai-chatbot";

// ── Priorities ──────────────────────────────────────────────────────────────
// User-visible message delivery outranks enrichment work: inbound processing
// beats the chatbot, which beats suggestions, which beat sentiment.

pub const PRIORITY_PROCESS_INCOMING: u8 = 9;
pub const PRIORITY_SEND: u8 = 8;
pub const PRIORITY_CHATBOT: u8 = 7;
pub const PRIORITY_CAMPAIGN: u8 = 5;
pub const PRIORITY_SUGGEST: u8 = 4;
pub const PRIORITY_TRANSCRIBE: u8 = 3;
pub const PRIORITY_SENTIMENT: u8 = 2;

// ── Payloads ────────────────────────────────────────────────────────────────

/// Canonical outbound message body carried by send jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_params: Option<serde_json::Value>,
}

impl OutboundMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            content: Some(content.into()),
            media_url: None,
            template_id: None,
            template_params: None,
        }
    }
}

/// Dispatch one outbound message through the channel's provider API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageJob {
    pub message_id: String,
    pub conversation_id: String,
    pub channel_id: String,
    pub channel_type: ChannelType,
    pub message: OutboundMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_external_id: Option<String>,
}

/// Run the adapter → resolve → ingest path inside the queue worker, for
/// providers too slow or complex to process inline in the webhook request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessIncomingJob {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    pub provider: Provider,
    pub raw_payload: serde_json::Value,
}

/// Kick off a campaign: load recipients and fan out one send per contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStartJob {
    pub campaign_id: String,
    pub tenant_id: String,
}

/// Deliver one campaign message to one recipient contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSendJob {
    pub campaign_id: String,
    pub tenant_id: String,
    pub channel_id: String,
    pub channel_type: ChannelType,
    pub contact_id: String,
    pub message: OutboundMessage,
}

// ── AI enrichment payloads ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeJob {
    pub tenant_id: String,
    pub message_id: String,
    pub audio_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestJob {
    pub tenant_id: String,
    pub conversation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentJob {
    pub tenant_id: String,
    pub message_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatbotJob {
    pub tenant_id: String,
    pub chatbot_id: String,
    pub conversation_id: String,
    pub message: String,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::types::ChannelType};

    #[test]
    fn test_send_job_roundtrip() {
        let job = SendMessageJob {
            message_id: "m1".into(),
            conversation_id: "cv1".into(),
            channel_id: "ch1".into(),
            channel_type: ChannelType::Whatsapp,
            message: OutboundMessage::text("hello"),
            recipient_phone: Some("5511999999999".into()),
            recipient_external_id: None,
        };
        let json = serde_json::to_string(&job).unwrap();
        // Wire contract: camelCase keys, absent optionals omitted.
        assert!(json.contains("\"conversationId\""));
        assert!(!json.contains("recipientExternalId"));
        let back: SendMessageJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message, job.message);
    }

    #[test]
    fn test_process_incoming_roundtrip() {
        let job = ProcessIncomingJob {
            channel_id: None,
            provider: Provider::WhatsappBridge,
            raw_payload: serde_json::json!({"event": "messages.upsert"}),
        };
        let json = serde_json::to_string(&job).unwrap();
        let back: ProcessIncomingJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.provider, Provider::WhatsappBridge);
    }

    #[test]
    fn test_campaign_send_roundtrip() {
        let job = CampaignSendJob {
            campaign_id: "cp1".into(),
            tenant_id: "t1".into(),
            channel_id: "ch1".into(),
            channel_type: ChannelType::Whatsapp,
            contact_id: "ct1".into(),
            message: OutboundMessage::text("promo"),
        };
        let json = serde_json::to_string(&job).unwrap();
        let back: CampaignSendJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.contact_id, "ct1");
    }
}

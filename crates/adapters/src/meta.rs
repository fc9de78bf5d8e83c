//! Instagram / Messenger (Meta Graph) webhook parsing.
//!
//! Shared shape: `{ entry: [{ id, messaging: [{ sender: { id },
//! message?, delivery?, read? }] }] }`. The page/IG id on the entry is the
//! channel lookup key; the sender id is the contact's external id.

use {
    serde::Deserialize,
    tracing::debug,
};

use palaver_core::{CanonicalEvent, InboundMessage, MessageKind};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct GraphPayload {
    #[serde(default)]
    entry: Vec<GraphEntry>,
}

#[derive(Debug, Deserialize)]
struct GraphEntry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    messaging: Vec<Messaging>,
}

#[derive(Debug, Deserialize)]
struct Messaging {
    sender: Option<Party>,
    #[serde(default)]
    timestamp: i64,
    message: Option<GraphMessage>,
    delivery: Option<Delivery>,
    read: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Party {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct GraphMessage {
    #[serde(default)]
    mid: String,
    text: Option<String>,
    #[serde(default)]
    attachments: Vec<Attachment>,
    #[serde(default)]
    is_echo: bool,
}

#[derive(Debug, Deserialize)]
struct Attachment {
    #[serde(default, rename = "type")]
    kind: String,
    payload: Option<AttachmentPayload>,
}

#[derive(Debug, Deserialize)]
struct AttachmentPayload {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delivery {
    #[serde(default)]
    mids: Vec<String>,
}

pub fn parse(provider: &'static str, payload: &serde_json::Value) -> Result<Vec<CanonicalEvent>> {
    let payload: GraphPayload =
        serde_json::from_value(payload.clone()).map_err(|e| Error::parse(provider, e))?;

    let mut events = Vec::new();
    for entry in payload.entry {
        if entry.id.is_empty() {
            continue;
        }
        for item in entry.messaging {
            if let Some(message) = item.message {
                if message.is_echo {
                    debug!(external_id = %message.mid, "suppressing graph echo");
                    continue;
                }
                let sender_id = item.sender.as_ref().map(|p| p.id.clone()).unwrap_or_default();
                if sender_id.is_empty() || message.mid.is_empty() {
                    continue;
                }
                let (kind, content, media_url) = classify(&message);
                events.push(CanonicalEvent::InboundMessage(InboundMessage {
                    lookup_key: entry.id.clone(),
                    sender_phone: None,
                    sender_external_id: Some(sender_id),
                    sender_name: None,
                    external_id: message.mid,
                    kind,
                    content,
                    media_url,
                    timestamp: timestamp_secs(item.timestamp),
                }));
            } else if let Some(delivery) = item.delivery {
                for mid in delivery.mids {
                    events.push(CanonicalEvent::DeliveryStatus {
                        lookup_key: entry.id.clone(),
                        external_id: mid,
                        provider_code: "delivered".into(),
                    });
                }
            } else if item.read.is_some() {
                // Read events carry only a watermark, no message ids; there
                // is nothing safe to reconcile them against.
                debug!("graph read watermark ignored");
            }
        }
    }
    Ok(events)
}

fn classify(message: &GraphMessage) -> (MessageKind, Option<String>, Option<String>) {
    if let Some(attachment) = message.attachments.first() {
        let url = attachment.payload.as_ref().and_then(|p| p.url.clone());
        let kind = match attachment.kind.as_str() {
            "image" => MessageKind::Image,
            "video" => MessageKind::Video,
            "audio" => MessageKind::Audio,
            "file" => MessageKind::Document,
            "location" => MessageKind::Location,
            // Unknown attachment vocabulary degrades to text, keeping
            // whatever caption text came along.
            _ => MessageKind::Text,
        };
        return (kind, message.text.clone(), url);
    }
    (MessageKind::Text, message.text.clone(), None)
}

/// Graph timestamps are epoch millis; tolerate seconds from older payloads.
fn timestamp_secs(raw: i64) -> i64 {
    if raw > 1_000_000_000_000 { raw / 1000 } else { raw }
}

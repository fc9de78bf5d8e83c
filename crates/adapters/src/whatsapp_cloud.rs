//! WhatsApp Cloud API webhook parsing.
//!
//! Payload shape: `{ entry: [{ changes: [{ field, value: { metadata,
//! messages?, statuses?, contacts? } }] }] }`. A payload with no message
//! entries (billing pings, template updates) flattens to zero events.

use std::collections::HashMap;

use {
    serde::Deserialize,
    tracing::debug,
};

use palaver_core::{CanonicalEvent, InboundMessage, MessageKind};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct CloudPayload {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    #[serde(default)]
    field: String,
    value: Option<ChangeValue>,
}

#[derive(Debug, Deserialize)]
struct ChangeValue {
    metadata: Option<Metadata>,
    #[serde(default)]
    messages: Vec<CloudMessage>,
    #[serde(default)]
    statuses: Vec<CloudStatus>,
    #[serde(default)]
    contacts: Vec<CloudContact>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(default)]
    phone_number_id: String,
}

#[derive(Debug, Deserialize)]
struct CloudContact {
    #[serde(default)]
    wa_id: String,
    profile: Option<Profile>,
}

#[derive(Debug, Deserialize)]
struct Profile {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct CloudMessage {
    #[serde(default)]
    from: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default, rename = "type")]
    message_type: String,
    text: Option<TextBody>,
    image: Option<MediaBody>,
    video: Option<MediaBody>,
    audio: Option<MediaBody>,
    document: Option<MediaBody>,
    sticker: Option<MediaBody>,
    location: Option<LocationBody>,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    #[serde(default)]
    body: String,
}

#[derive(Debug, Deserialize)]
struct MediaBody {
    link: Option<String>,
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocationBody {
    #[serde(default)]
    latitude: f64,
    #[serde(default)]
    longitude: f64,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CloudStatus {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: String,
}

pub fn parse(payload: &serde_json::Value) -> Result<Vec<CanonicalEvent>> {
    let payload: CloudPayload =
        serde_json::from_value(payload.clone()).map_err(|e| Error::parse("whatsapp_cloud", e))?;

    let mut events = Vec::new();
    for entry in payload.entry {
        for change in entry.changes {
            if change.field != "messages" {
                debug!(field = %change.field, "ignoring non-message cloud webhook");
                continue;
            }
            let Some(value) = change.value else { continue };
            let lookup_key = value
                .metadata
                .as_ref()
                .map(|m| m.phone_number_id.clone())
                .unwrap_or_default();
            if lookup_key.is_empty() {
                debug!("cloud webhook without phone_number_id, skipping");
                continue;
            }

            // wa_id → display name, supplied alongside the messages batch.
            let names: HashMap<String, String> = value
                .contacts
                .iter()
                .filter_map(|c| {
                    c.profile
                        .as_ref()
                        .map(|p| (c.wa_id.clone(), p.name.clone()))
                })
                .collect();

            for msg in value.messages {
                let (kind, content, media_url) = classify(&msg);
                events.push(CanonicalEvent::InboundMessage(InboundMessage {
                    lookup_key: lookup_key.clone(),
                    sender_name: names.get(&msg.from).cloned(),
                    sender_phone: Some(msg.from),
                    sender_external_id: None,
                    external_id: msg.id,
                    kind,
                    content,
                    media_url,
                    timestamp: msg.timestamp.parse().unwrap_or_default(),
                }));
            }

            for status in value.statuses {
                if status.id.is_empty() {
                    continue;
                }
                events.push(CanonicalEvent::DeliveryStatus {
                    lookup_key: lookup_key.clone(),
                    external_id: status.id,
                    provider_code: status.status,
                });
            }
        }
    }
    Ok(events)
}

fn classify(msg: &CloudMessage) -> (MessageKind, Option<String>, Option<String>) {
    let media = |kind: MessageKind, body: &Option<MediaBody>| {
        let body = body.as_ref();
        (
            kind,
            body.and_then(|b| b.caption.clone()),
            body.and_then(|b| b.link.clone()),
        )
    };
    match msg.message_type.as_str() {
        "image" => media(MessageKind::Image, &msg.image),
        "video" => media(MessageKind::Video, &msg.video),
        "audio" => media(MessageKind::Audio, &msg.audio),
        "document" => media(MessageKind::Document, &msg.document),
        "sticker" => media(MessageKind::Sticker, &msg.sticker),
        "location" => {
            let content = msg.location.as_ref().map(|l| match &l.name {
                Some(name) => format!("{name} ({}, {})", l.latitude, l.longitude),
                None => format!("{}, {}", l.latitude, l.longitude),
            });
            (MessageKind::Location, content, None)
        },
        "contacts" => (MessageKind::Contact, None, None),
        // "text" and anything we do not recognize: the documented fallback is
        // text, never dropped content.
        _ => (
            MessageKind::Text,
            msg.text.as_ref().map(|t| t.body.clone()),
            None,
        ),
    }
}

//! Unofficial WhatsApp bridge webhook parsing.
//!
//! Envelope: `{ event, instance, data }` where `data` is an object or an
//! array depending on the event. The instance name is the channel lookup key.
//! Self-sent echoes (`fromMe`) are filtered here, before the channel
//! resolver ever sees them.

use {
    serde::Deserialize,
    tracing::debug,
};

use palaver_core::{CanonicalEvent, ConnectionState, InboundMessage, MessageKind};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct BridgePayload {
    #[serde(default)]
    event: String,
    #[serde(default)]
    instance: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Events arrive with `data` as a single object or a batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpsertEntry {
    key: Option<BridgeKey>,
    message: Option<BridgeMessage>,
    #[serde(default, rename = "messageTimestamp")]
    message_timestamp: i64,
    #[serde(rename = "pushName")]
    push_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BridgeKey {
    #[serde(default, rename = "remoteJid")]
    remote_jid: String,
    #[serde(default, rename = "fromMe")]
    from_me: bool,
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct BridgeMessage {
    conversation: Option<String>,
    #[serde(rename = "extendedTextMessage")]
    extended_text: Option<ExtendedText>,
    #[serde(rename = "imageMessage")]
    image: Option<BridgeMedia>,
    #[serde(rename = "videoMessage")]
    video: Option<BridgeMedia>,
    #[serde(rename = "audioMessage")]
    audio: Option<BridgeMedia>,
    #[serde(rename = "documentMessage")]
    document: Option<BridgeMedia>,
    #[serde(rename = "stickerMessage")]
    sticker: Option<BridgeMedia>,
    #[serde(rename = "locationMessage")]
    location: Option<BridgeLocation>,
}

#[derive(Debug, Deserialize)]
struct ExtendedText {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct BridgeMedia {
    url: Option<String>,
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BridgeLocation {
    #[serde(default, rename = "degreesLatitude")]
    latitude: f64,
    #[serde(default, rename = "degreesLongitude")]
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct UpdateEntry {
    key: Option<BridgeKey>,
    #[serde(rename = "keyId")]
    key_id: Option<String>,
    status: Option<serde_json::Value>,
    update: Option<UpdateBody>,
}

#[derive(Debug, Deserialize)]
struct UpdateBody {
    status: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ConnectionUpdate {
    #[serde(default)]
    state: String,
}

pub fn parse(payload: &serde_json::Value) -> Result<Vec<CanonicalEvent>> {
    let payload: BridgePayload =
        serde_json::from_value(payload.clone()).map_err(|e| Error::parse("whatsapp_bridge", e))?;

    if payload.instance.is_empty() {
        debug!(event = %payload.event, "bridge webhook without instance, skipping");
        return Ok(vec![]);
    }

    match payload.event.as_str() {
        "messages.upsert" => parse_upsert(&payload.instance, payload.data),
        "messages.update" => parse_update(&payload.instance, payload.data),
        "connection.update" => {
            if payload.data.is_null() {
                return Ok(vec![]);
            }
            let update: ConnectionUpdate =
                serde_json::from_value(payload.data).map_err(|e| Error::parse("whatsapp_bridge", e))?;
            let state = match update.state.as_str() {
                "open" => ConnectionState::Open,
                "connecting" => ConnectionState::Connecting,
                "close" | "closed" => ConnectionState::Closed,
                other => {
                    debug!(state = %other, "unknown bridge connection state, skipping");
                    return Ok(vec![]);
                },
            };
            Ok(vec![CanonicalEvent::ConnectionState {
                lookup_key: payload.instance,
                state,
            }])
        },
        // A fresh QR code means the session dropped and is re-pairing.
        "qrcode.updated" => Ok(vec![CanonicalEvent::ConnectionState {
            lookup_key: payload.instance,
            state: ConnectionState::Connecting,
        }]),
        "instance.delete" | "instance.logout" => Ok(vec![CanonicalEvent::ConnectionState {
            lookup_key: payload.instance,
            state: ConnectionState::Closed,
        }]),
        other => {
            debug!(event = %other, "unhandled bridge event");
            Ok(vec![])
        },
    }
}

fn parse_upsert(instance: &str, data: serde_json::Value) -> Result<Vec<CanonicalEvent>> {
    if data.is_null() {
        return Ok(vec![]);
    }
    let entries: OneOrMany<UpsertEntry> =
        serde_json::from_value(data).map_err(|e| Error::parse("whatsapp_bridge", e))?;

    let mut events = Vec::new();
    for entry in entries.into_vec() {
        let Some(key) = entry.key else { continue };
        if key.from_me {
            // Outbound echo; already persisted on the sending path.
            debug!(external_id = %key.id, "suppressing fromMe echo");
            continue;
        }
        let Some(phone) = phone_from_jid(&key.remote_jid) else {
            debug!(jid = %key.remote_jid, "skipping non-DM jid");
            continue;
        };

        let (kind, content, media_url) = match entry.message {
            Some(message) => classify(&message),
            None => (MessageKind::Text, None, None),
        };

        events.push(CanonicalEvent::InboundMessage(InboundMessage {
            lookup_key: instance.to_string(),
            sender_phone: Some(phone),
            sender_external_id: None,
            sender_name: entry.push_name,
            external_id: key.id,
            kind,
            content,
            media_url,
            timestamp: entry.message_timestamp,
        }));
    }
    Ok(events)
}

fn parse_update(instance: &str, data: serde_json::Value) -> Result<Vec<CanonicalEvent>> {
    if data.is_null() {
        return Ok(vec![]);
    }
    let entries: OneOrMany<UpdateEntry> =
        serde_json::from_value(data).map_err(|e| Error::parse("whatsapp_bridge", e))?;

    let mut events = Vec::new();
    for entry in entries.into_vec() {
        let external_id = entry
            .key
            .as_ref()
            .map(|k| k.id.clone())
            .filter(|id| !id.is_empty())
            .or(entry.key_id);
        let Some(external_id) = external_id else { continue };

        let status = entry
            .status
            .or_else(|| entry.update.and_then(|u| u.status));
        let Some(status) = status else { continue };

        // Numeric Baileys codes and string names both occur in the wild.
        let provider_code = match status {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        events.push(CanonicalEvent::DeliveryStatus {
            lookup_key: instance.to_string(),
            external_id,
            provider_code,
        });
    }
    Ok(events)
}

fn classify(message: &BridgeMessage) -> (MessageKind, Option<String>, Option<String>) {
    if let Some(text) = &message.conversation {
        return (MessageKind::Text, Some(text.clone()), None);
    }
    if let Some(extended) = &message.extended_text {
        return (MessageKind::Text, Some(extended.text.clone()), None);
    }
    let media =
        |kind: MessageKind, body: &BridgeMedia| (kind, body.caption.clone(), body.url.clone());
    if let Some(body) = &message.image {
        return media(MessageKind::Image, body);
    }
    if let Some(body) = &message.video {
        return media(MessageKind::Video, body);
    }
    if let Some(body) = &message.audio {
        return media(MessageKind::Audio, body);
    }
    if let Some(body) = &message.document {
        return media(MessageKind::Document, body);
    }
    if let Some(body) = &message.sticker {
        return media(MessageKind::Sticker, body);
    }
    if let Some(location) = &message.location {
        let content = format!("{}, {}", location.latitude, location.longitude);
        return (MessageKind::Location, Some(content), None);
    }
    // Unrecognized message shapes degrade to text, never dropped.
    (MessageKind::Text, None, None)
}

/// A DM jid looks like `<phone>@s.whatsapp.net`; groups (`@g.us`) and
/// broadcast lists are not conversations with a single contact.
fn phone_from_jid(jid: &str) -> Option<String> {
    let (user, host) = jid.split_once('@')?;
    if host != "s.whatsapp.net" || user.is_empty() {
        return None;
    }
    Some(user.to_string())
}

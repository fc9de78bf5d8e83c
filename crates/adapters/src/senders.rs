//! Outbound send clients, one per provider API family.
//!
//! The dispatcher picks a [`ProviderSender`] by channel type/provider and
//! hands it the canonical outbound body; each client owns the translation
//! into its provider's request shape and the extraction of the provider
//! message id from the response.

use {
    async_trait::async_trait,
    serde_json::json,
    tracing::debug,
};

use palaver_core::{Channel, MessageKind, Provider, jobs::OutboundMessage};

use crate::error::{Error, Result};

/// Where an outbound message goes, in provider vocabulary.
#[derive(Debug, Clone, Default)]
pub struct Recipient {
    pub phone: Option<String>,
    pub external_id: Option<String>,
}

impl Recipient {
    pub fn phone(phone: impl Into<String>) -> Self {
        Self {
            phone: Some(phone.into()),
            external_id: None,
        }
    }

    pub fn external(id: impl Into<String>) -> Self {
        Self {
            phone: None,
            external_id: Some(id.into()),
        }
    }
}

/// A provider send API. Returns the provider's message id for receipt
/// reconciliation.
#[async_trait]
pub trait ProviderSender: Send + Sync {
    async fn send(
        &self,
        channel: &Channel,
        recipient: &Recipient,
        message: &OutboundMessage,
    ) -> Result<String>;
}

// ── Meta Graph (WhatsApp Cloud, Instagram, Messenger) ───────────────────────

pub struct GraphSender {
    http: reqwest::Client,
    base: String,
}

impl GraphSender {
    #[must_use]
    pub fn new(http: reqwest::Client, base: impl Into<String>) -> Self {
        Self {
            http,
            base: base.into(),
        }
    }

    async fn send_whatsapp(
        &self,
        channel: &Channel,
        recipient: &Recipient,
        message: &OutboundMessage,
    ) -> Result<String> {
        let token = channel
            .config_str("access_token")
            .ok_or_else(|| Error::missing_config("access_token"))?;
        let to = recipient
            .phone
            .as_deref()
            .ok_or_else(|| Error::unsupported("whatsapp_cloud", "recipient has no phone"))?;

        let mut body = json!({
            "messaging_product": "whatsapp",
            "to": to,
        });
        match message.kind {
            MessageKind::Text => {
                body["type"] = json!("text");
                body["text"] = json!({ "body": message.content.clone().unwrap_or_default() });
            },
            MessageKind::Template => {
                let name = message
                    .template_id
                    .as_deref()
                    .ok_or_else(|| Error::unsupported("whatsapp_cloud", "template without id"))?;
                let mut template = json!({ "name": name, "language": { "code": "en" } });
                if let Some(params) = &message.template_params {
                    template["components"] = json!([{
                        "type": "body",
                        "parameters": params,
                    }]);
                }
                body["type"] = json!("template");
                body["template"] = template;
            },
            kind => {
                let field = media_field(kind).ok_or_else(|| {
                    Error::unsupported("whatsapp_cloud", format!("cannot send {} messages", kind.as_str()))
                })?;
                let url = message
                    .media_url
                    .as_deref()
                    .ok_or_else(|| Error::unsupported("whatsapp_cloud", "media message without url"))?;
                let mut media = json!({ "link": url });
                if let Some(caption) = &message.content {
                    media["caption"] = json!(caption);
                }
                body["type"] = json!(field);
                body[field] = media;
            },
        }

        let url = format!("{}/{}/messages", self.base, channel.lookup_key);
        let response = self.http.post(&url).bearer_auth(token).json(&body).send().await?;
        let value = check(response).await?;
        value
            .pointer("/messages/0/id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or(Error::SendRejected {
                status: 200,
                body: "response missing message id".into(),
            })
    }

    async fn send_graph_dm(
        &self,
        provider: &'static str,
        channel: &Channel,
        recipient: &Recipient,
        message: &OutboundMessage,
    ) -> Result<String> {
        let token = channel
            .config_str("access_token")
            .ok_or_else(|| Error::missing_config("access_token"))?;
        let to = recipient
            .external_id
            .as_deref()
            .ok_or_else(|| Error::unsupported(provider, "recipient has no provider id"))?;

        let message_body = match message.kind {
            MessageKind::Text => json!({ "text": message.content.clone().unwrap_or_default() }),
            kind => {
                let url = message
                    .media_url
                    .as_deref()
                    .ok_or_else(|| Error::unsupported(provider, "media message without url"))?;
                let attachment_type = match kind {
                    MessageKind::Image | MessageKind::Sticker => "image",
                    MessageKind::Video => "video",
                    MessageKind::Audio => "audio",
                    MessageKind::Document => "file",
                    _ => {
                        return Err(Error::unsupported(
                            provider,
                            format!("cannot send {} messages", kind.as_str()),
                        ));
                    },
                };
                json!({ "attachment": { "type": attachment_type, "payload": { "url": url } } })
            },
        };

        let url = format!("{}/me/messages", self.base);
        let response = self
            .http
            .post(&url)
            .query(&[("access_token", token)])
            .json(&json!({ "recipient": { "id": to }, "message": message_body }))
            .send()
            .await?;
        let value = check(response).await?;
        value
            .get("message_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or(Error::SendRejected {
                status: 200,
                body: "response missing message_id".into(),
            })
    }
}

#[async_trait]
impl ProviderSender for GraphSender {
    async fn send(
        &self,
        channel: &Channel,
        recipient: &Recipient,
        message: &OutboundMessage,
    ) -> Result<String> {
        debug!(channel_id = %channel.id, provider = channel.provider.as_str(), "graph send");
        match channel.provider {
            Provider::WhatsappCloud => self.send_whatsapp(channel, recipient, message).await,
            Provider::Instagram => self.send_graph_dm("instagram", channel, recipient, message).await,
            Provider::Messenger => self.send_graph_dm("messenger", channel, recipient, message).await,
            Provider::WhatsappBridge => Err(Error::unsupported(
                "whatsapp_bridge",
                "bridge channels send through BridgeSender",
            )),
        }
    }
}

fn media_field(kind: MessageKind) -> Option<&'static str> {
    match kind {
        MessageKind::Image => Some("image"),
        MessageKind::Video => Some("video"),
        MessageKind::Audio => Some("audio"),
        MessageKind::Document => Some("document"),
        MessageKind::Sticker => Some("sticker"),
        _ => None,
    }
}

// ── Unofficial bridge ───────────────────────────────────────────────────────

pub struct BridgeSender {
    http: reqwest::Client,
    base: String,
    api_key: String,
}

impl BridgeSender {
    #[must_use]
    pub fn new(http: reqwest::Client, base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base: base.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ProviderSender for BridgeSender {
    async fn send(
        &self,
        channel: &Channel,
        recipient: &Recipient,
        message: &OutboundMessage,
    ) -> Result<String> {
        let number = recipient
            .phone
            .as_deref()
            .ok_or_else(|| Error::unsupported("whatsapp_bridge", "recipient has no phone"))?;
        let instance = &channel.lookup_key;

        let (path, body) = match message.kind {
            MessageKind::Text => (
                format!("{}/message/sendText/{instance}", self.base),
                json!({
                    "number": number,
                    "text": message.content.clone().unwrap_or_default(),
                }),
            ),
            kind => {
                let url = message.media_url.as_deref().ok_or_else(|| {
                    Error::unsupported("whatsapp_bridge", "media message without url")
                })?;
                (
                    format!("{}/message/sendMedia/{instance}", self.base),
                    json!({
                        "number": number,
                        "mediatype": kind.as_str(),
                        "media": url,
                        "caption": message.content,
                    }),
                )
            },
        };

        debug!(channel_id = %channel.id, instance = %instance, "bridge send");
        let response = self
            .http
            .post(&path)
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let value = check(response).await?;
        value
            .pointer("/key/id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or(Error::SendRejected {
                status: 200,
                body: "response missing key.id".into(),
            })
    }
}

async fn check(response: reqwest::Response) -> Result<serde_json::Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::SendRejected {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await?)
}

//! Tenant-scoped entities and their status vocabularies.

use serde::{Deserialize, Serialize};

// ── Providers and channels ──────────────────────────────────────────────────

/// External messaging provider an adapter translates for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    WhatsappCloud,
    WhatsappBridge,
    Instagram,
    Messenger,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WhatsappCloud => "whatsapp_cloud",
            Self::WhatsappBridge => "whatsapp_bridge",
            Self::Instagram => "instagram",
            Self::Messenger => "messenger",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "whatsapp_cloud" => Some(Self::WhatsappCloud),
            "whatsapp_bridge" => Some(Self::WhatsappBridge),
            "instagram" => Some(Self::Instagram),
            "messenger" => Some(Self::Messenger),
            _ => None,
        }
    }

    /// The channel category this provider feeds.
    pub fn channel_type(&self) -> ChannelType {
        match self {
            Self::WhatsappCloud | Self::WhatsappBridge => ChannelType::Whatsapp,
            Self::Instagram => ChannelType::Instagram,
            Self::Messenger => ChannelType::Messenger,
        }
    }
}

/// Category of a tenant's connected messaging endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Whatsapp,
    Instagram,
    Messenger,
    Email,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::Instagram => "instagram",
            Self::Messenger => "messenger",
            Self::Email => "email",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "whatsapp" => Some(Self::Whatsapp),
            "instagram" => Some(Self::Instagram),
            "messenger" => Some(Self::Messenger),
            "email" => Some(Self::Email),
            _ => None,
        }
    }
}

/// A tenant's connected external messaging endpoint.
///
/// `lookup_key` is the provider-specific identifier webhooks carry
/// (phone-number-id, bridge instance name, page/IG id). It is populated from
/// the config blob at write time so webhook routing is an indexed lookup
/// rather than a scan over config blobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub tenant_id: String,
    pub channel_type: ChannelType,
    pub provider: Provider,
    pub lookup_key: String,
    /// Provider-variant-specific config: `phone_number_id`, `instance_name`,
    /// `page_id`, `ig_user_id`, `access_token`, `verify_token`, `app_secret`.
    pub config: serde_json::Value,
    pub is_active: bool,
    pub connected_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Channel {
    /// Read a string field out of the provider config blob.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }
}

// ── Contacts and conversations ──────────────────────────────────────────────

/// A tenant-scoped person. At most one per (tenant, phone) and per
/// (tenant, external_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub phone: Option<String>,
    pub external_id: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// How long of an external id we keep when it has to stand in for a name.
const FALLBACK_NAME_LEN: usize = 12;

/// Default display name when the provider supplied none: the phone number,
/// else a truncated external id.
pub fn default_contact_name(phone: Option<&str>, external_id: Option<&str>) -> String {
    if let Some(phone) = phone {
        return phone.to_string();
    }
    match external_id {
        Some(id) => id.chars().take(FALLBACK_NAME_LEN).collect(),
        None => "unknown".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Pending,
    Resolved,
    Snoozed,
    Spam,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Snoozed => "snoozed",
            Self::Spam => "spam",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "pending" => Some(Self::Pending),
            "resolved" => Some(Self::Resolved),
            "snoozed" => Some(Self::Snoozed),
            "spam" => Some(Self::Spam),
            _ => None,
        }
    }
}

/// The thread between one contact and one channel. Unique per
/// (tenant, channel, contact).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub tenant_id: String,
    pub channel_id: String,
    pub contact_id: String,
    pub status: ConversationStatus,
    pub assignee_id: Option<String>,
    pub team_id: Option<String>,
    pub last_message_at: Option<i64>,
    /// Free-form: AI suggestions, sentiment, campaign source.
    pub metadata: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

// ── Messages ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Location,
    Contact,
    Sticker,
    Template,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Location => "location",
            Self::Contact => "contact",
            Self::Sticker => "sticker",
            Self::Template => "template",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "document" => Some(Self::Document),
            "location" => Some(Self::Location),
            "contact" => Some(Self::Contact),
            "sticker" => Some(Self::Sticker),
            "template" => Some(Self::Template),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    Agent,
    Contact,
    Bot,
}

impl SenderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Contact => "contact",
            Self::Bot => "bot",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agent" => Some(Self::Agent),
            "contact" => Some(Self::Contact),
            "bot" => Some(Self::Bot),
            _ => None,
        }
    }
}

/// Delivery lifecycle of a message (and of a campaign recipient).
///
/// Transitions only move forward. Receipts arrive in whatever order the
/// provider emits them, so "forward" is decided by [`MessageStatus::rank`],
/// not by arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Ordering used for forward-only transitions. `Failed` is terminal and
    /// outranks everything so a failure is never downgraded by a late receipt.
    pub fn rank(&self) -> i64 {
        match self {
            Self::Pending => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
            Self::Failed => 4,
        }
    }
}

/// A single unit of communication within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub tenant_id: String,
    pub conversation_id: String,
    pub sender: SenderKind,
    pub direction: Direction,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub status: MessageStatus,
    /// Provider message id; unique per tenant when present. Used for dedup
    /// and delivery-receipt reconciliation.
    pub external_id: Option<String>,
    pub error: Option<String>,
    /// Free-form: transcription, sentiment, campaign linkage.
    pub metadata: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

// ── Campaigns ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "scheduled" => Some(Self::Scheduled),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Legal forward transitions of the campaign state machine.
    pub fn can_transition_to(&self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, next),
            (Draft, Scheduled)
                | (Draft, Running)
                | (Scheduled, Running)
                | (Scheduled, Cancelled)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Cancelled)
        )
    }
}

/// Aggregate per-campaign delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStats {
    pub total: i64,
    pub sent: i64,
    pub delivered: i64,
    pub read: i64,
    pub failed: i64,
}

/// A bulk outbound send targeting many contacts through one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub tenant_id: String,
    pub channel_id: String,
    pub title: String,
    pub status: CampaignStatus,
    pub content: Option<String>,
    pub template_id: Option<String>,
    pub template_params: Option<serde_json::Value>,
    pub stats: CampaignStats,
    pub scheduled_at: Option<i64>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Join of a campaign to one target contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRecipient {
    pub campaign_id: String,
    pub contact_id: String,
    pub status: MessageStatus,
    pub error: Option<String>,
    pub sent_at: Option<i64>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_roundtrip() {
        for p in [
            Provider::WhatsappCloud,
            Provider::WhatsappBridge,
            Provider::Instagram,
            Provider::Messenger,
        ] {
            assert_eq!(Provider::parse(p.as_str()), Some(p));
        }
        assert_eq!(Provider::parse("telegram"), None);
    }

    #[test]
    fn test_provider_channel_type() {
        assert_eq!(Provider::WhatsappCloud.channel_type(), ChannelType::Whatsapp);
        assert_eq!(Provider::WhatsappBridge.channel_type(), ChannelType::Whatsapp);
        assert_eq!(Provider::Instagram.channel_type(), ChannelType::Instagram);
        assert_eq!(Provider::Messenger.channel_type(), ChannelType::Messenger);
    }

    #[test]
    fn test_status_rank_orders_forward() {
        assert!(MessageStatus::Sent.rank() < MessageStatus::Delivered.rank());
        assert!(MessageStatus::Delivered.rank() < MessageStatus::Read.rank());
        assert!(MessageStatus::Read.rank() < MessageStatus::Failed.rank());
    }

    #[test]
    fn test_campaign_transitions() {
        use CampaignStatus::*;
        assert!(Draft.can_transition_to(Running));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Running));
        assert!(!Draft.can_transition_to(Completed));
    }

    #[test]
    fn test_default_contact_name() {
        assert_eq!(default_contact_name(Some("5511999999999"), None), "5511999999999");
        assert_eq!(
            default_contact_name(None, Some("1234567890123456789")),
            "123456789012"
        );
        assert_eq!(default_contact_name(None, Some("short")), "short");
        assert_eq!(default_contact_name(None, None), "unknown");
    }

    #[test]
    fn test_channel_config_str() {
        let channel = Channel {
            id: "c1".into(),
            tenant_id: "t1".into(),
            channel_type: ChannelType::Whatsapp,
            provider: Provider::WhatsappBridge,
            lookup_key: "demo".into(),
            config: serde_json::json!({"instance_name": "demo"}),
            is_active: true,
            connected_at: None,
            created_at: 0,
            updated_at: 0,
        };
        assert_eq!(channel.config_str("instance_name"), Some("demo"));
        assert_eq!(channel.config_str("missing"), None);
    }

    #[test]
    fn test_enum_serde_snake_case() {
        let json = serde_json::to_string(&MessageKind::Document).expect("serialize");
        assert_eq!(json, "\"document\"");
        let back: MessageStatus = serde_json::from_str("\"delivered\"").expect("deserialize");
        assert_eq!(back, MessageStatus::Delivered);
    }
}

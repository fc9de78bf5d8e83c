//! Provider status-code vocabulary → canonical message status.

use palaver_core::{MessageStatus, Provider};

/// Map a provider-specific delivery code to the canonical status.
///
/// The bridge reports Baileys-style codes, numeric or named; the Meta-family
/// providers report lowercase strings. Unknown codes default to `sent` rather
/// than failing — a receipt we cannot classify still proves the provider
/// accepted the message.
pub fn map_provider_status(provider: Provider, code: &str) -> MessageStatus {
    let normalized = code.trim().to_ascii_uppercase();
    match provider {
        Provider::WhatsappBridge => match normalized.as_str() {
            "0" | "ERROR" => MessageStatus::Failed,
            "1" | "PENDING" => MessageStatus::Pending,
            "2" | "SERVER_ACK" => MessageStatus::Sent,
            "3" | "DELIVERY_ACK" => MessageStatus::Delivered,
            "4" | "READ" | "5" | "PLAYED" => MessageStatus::Read,
            _ => MessageStatus::Sent,
        },
        Provider::WhatsappCloud | Provider::Instagram | Provider::Messenger => {
            match normalized.as_str() {
                "SENT" => MessageStatus::Sent,
                "DELIVERED" => MessageStatus::Delivered,
                "READ" => MessageStatus::Read,
                "FAILED" => MessageStatus::Failed,
                _ => MessageStatus::Sent,
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use {rstest::rstest, super::*};

    #[rstest]
    #[case("3", MessageStatus::Delivered)]
    #[case("DELIVERY_ACK", MessageStatus::Delivered)]
    #[case("4", MessageStatus::Read)]
    #[case("READ", MessageStatus::Read)]
    #[case("PLAYED", MessageStatus::Read)]
    #[case("0", MessageStatus::Failed)]
    #[case("2", MessageStatus::Sent)]
    #[case("whatever", MessageStatus::Sent)]
    fn test_bridge_codes(#[case] code: &str, #[case] expected: MessageStatus) {
        assert_eq!(map_provider_status(Provider::WhatsappBridge, code), expected);
    }

    #[rstest]
    #[case("sent", MessageStatus::Sent)]
    #[case("delivered", MessageStatus::Delivered)]
    #[case("read", MessageStatus::Read)]
    #[case("failed", MessageStatus::Failed)]
    #[case("unknown_code", MessageStatus::Sent)]
    fn test_cloud_codes(#[case] code: &str, #[case] expected: MessageStatus) {
        assert_eq!(map_provider_status(Provider::WhatsappCloud, code), expected);
        assert_eq!(map_provider_status(Provider::Messenger, code), expected);
    }
}

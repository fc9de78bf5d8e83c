//! Webhook verification for Meta-family providers.

use {
    hmac::{Hmac, Mac},
    sha2::Sha256,
    tracing::warn,
};

type HmacSha256 = Hmac<Sha256>;

/// Verify the `X-Hub-Signature-256` header (`sha256=<hex>`) over the raw body.
pub fn verify_signature(body: &[u8], signature_header: &str, app_secret: &str) -> bool {
    let expected = match signature_header.strip_prefix("sha256=") {
        Some(hex) => hex,
        None => {
            warn!("invalid signature header format (missing sha256= prefix)");
            return false;
        },
    };

    let mut mac = match HmacSha256::new_from_slice(app_secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            warn!("failed to create HMAC");
            return false;
        },
    };

    mac.update(body);
    let computed = hex::encode(mac.finalize().into_bytes());

    // Constant-time comparison to prevent timing attacks.
    constant_time_eq(&computed, expected)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Handle the subscription handshake (GET with `hub.mode`, `hub.verify_token`,
/// `hub.challenge`). Returns the challenge to echo back with HTTP 200 on a
/// token match; `None` means reject with HTTP 403.
pub fn verify_subscription(
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
    expected_token: &str,
) -> Option<String> {
    let mode = mode?;
    let token = token?;
    let challenge = challenge?;

    if mode == "subscribe" && token == expected_token {
        Some(challenge.to_string())
    } else {
        None
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_signature_valid() {
        let body = b"test body";
        let secret = "test_secret";

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let expected = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        assert!(verify_signature(body, &expected, secret));
    }

    #[test]
    fn test_verify_signature_invalid() {
        let wrong = "sha256=0000000000000000000000000000000000000000000000000000000000000000";
        assert!(!verify_signature(b"test body", wrong, "test_secret"));
    }

    #[test]
    fn test_verify_signature_missing_prefix() {
        assert!(!verify_signature(b"test body", "invalid_format", "test_secret"));
    }

    #[test]
    fn test_verify_subscription_valid() {
        let result =
            verify_subscription(Some("subscribe"), Some("my_token"), Some("ch_123"), "my_token");
        assert_eq!(result, Some("ch_123".to_string()));
    }

    #[test]
    fn test_verify_subscription_wrong_token() {
        let result =
            verify_subscription(Some("subscribe"), Some("wrong"), Some("ch_123"), "my_token");
        assert_eq!(result, None);
    }

    #[test]
    fn test_verify_subscription_wrong_mode() {
        let result =
            verify_subscription(Some("unsubscribe"), Some("my_token"), Some("ch_123"), "my_token");
        assert_eq!(result, None);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(!constant_time_eq("", "a"));
    }
}

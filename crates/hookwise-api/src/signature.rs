//! Provider signature verification and event metadata extraction.
//!
//! Each provider signs the raw request body with HMAC-SHA-256 but differs
//! in encoding and header shape. Verification always uses constant-time
//! comparison. A failed verification never rejects the request: the event
//! is stored with a durable `signature_valid = false` flag, because
//! diagnosing signature misconfiguration requires the payload.

use std::collections::HashMap;

use base64::Engine as _;
use hmac::{Hmac, Mac};
use hookwise_core::Provider;
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted age of a Stripe-style signature timestamp.
pub const STRIPE_TOLERANCE_SECS: i64 = 300;

/// Result of signature verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureOutcome {
    /// Whether the signature verified against the integration secret.
    pub valid: bool,
    /// Why verification failed, for the stored diagnostics.
    pub error: Option<String>,
}

impl SignatureOutcome {
    fn valid() -> Self {
        Self { valid: true, error: None }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self { valid: false, error: Some(message.into()) }
    }
}

/// Event type and provider id extracted per provider conventions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMetadata {
    /// Provider event type, `unknown` when absent.
    pub event_type: String,
    /// Provider-supplied event identifier, when the provider sends one.
    pub provider_event_id: Option<String>,
}

/// Verifies the request signature for a provider.
///
/// `headers` must carry lower-cased keys; `now_unix` is the verifier's
/// current time for the Stripe tolerance check.
pub fn verify_signature(
    provider: Provider,
    secret: &str,
    headers: &HashMap<String, String>,
    body: &[u8],
    now_unix: i64,
) -> SignatureOutcome {
    match provider {
        Provider::Stripe => verify_stripe(secret, headers, body, now_unix),
        Provider::Shopify => verify_shopify(secret, headers, body),
        Provider::Github => verify_github(secret, headers, body),
    }
}

/// Stripe-style: `Stripe-Signature: t=<unix>,v1=<hex>[,v1=<hex>…]`,
/// signed message `<t>.<raw-body>`, 5 minute timestamp tolerance.
fn verify_stripe(
    secret: &str,
    headers: &HashMap<String, String>,
    body: &[u8],
    now_unix: i64,
) -> SignatureOutcome {
    let Some(header) = headers.get("stripe-signature") else {
        return SignatureOutcome::invalid("stripe-signature header missing");
    };

    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {},
        }
    }

    let Some(timestamp) = timestamp else {
        return SignatureOutcome::invalid("signature timestamp missing or malformed");
    };
    if (now_unix - timestamp).abs() > STRIPE_TOLERANCE_SECS {
        return SignatureOutcome::invalid("signature timestamp outside tolerance");
    }
    if candidates.is_empty() {
        return SignatureOutcome::invalid("no v1 signature present");
    }

    let mut message = timestamp.to_string().into_bytes();
    message.push(b'.');
    message.extend_from_slice(body);
    let expected = hex::encode(hmac_digest(secret, &message));

    if candidates.iter().any(|candidate| timing_safe_eq(candidate, &expected)) {
        SignatureOutcome::valid()
    } else {
        SignatureOutcome::invalid("no v1 signature matched")
    }
}

/// Shopify-style: base64 HMAC of the raw body in `X-Shopify-Hmac-Sha256`.
fn verify_shopify(
    secret: &str,
    headers: &HashMap<String, String>,
    body: &[u8],
) -> SignatureOutcome {
    let Some(header) = headers.get("x-shopify-hmac-sha256") else {
        return SignatureOutcome::invalid("x-shopify-hmac-sha256 header missing");
    };

    let expected = base64::engine::general_purpose::STANDARD.encode(hmac_digest(secret, body));
    if timing_safe_eq(header, &expected) {
        SignatureOutcome::valid()
    } else {
        SignatureOutcome::invalid("hmac digest mismatch")
    }
}

/// GitHub-style: `X-Hub-Signature-256: sha256=<hex>` of the raw body.
fn verify_github(
    secret: &str,
    headers: &HashMap<String, String>,
    body: &[u8],
) -> SignatureOutcome {
    let Some(header) = headers.get("x-hub-signature-256") else {
        return SignatureOutcome::invalid("x-hub-signature-256 header missing");
    };
    let Some(candidate) = header.strip_prefix("sha256=") else {
        return SignatureOutcome::invalid("expected sha256=<hex> signature format");
    };

    let expected = hex::encode(hmac_digest(secret, body));
    if timing_safe_eq(candidate, &expected) {
        SignatureOutcome::valid()
    } else {
        SignatureOutcome::invalid("signature digest mismatch")
    }
}

/// Extracts the event type and provider event id.
///
/// Stripe carries both inside the payload; Shopify and GitHub use request
/// headers.
pub fn event_metadata(
    provider: Provider,
    headers: &HashMap<String, String>,
    payload: &Value,
) -> EventMetadata {
    match provider {
        Provider::Stripe => EventMetadata {
            event_type: payload
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            provider_event_id: payload
                .get("id")
                .and_then(Value::as_str)
                .map(ToString::to_string),
        },
        Provider::Shopify => EventMetadata {
            event_type: headers
                .get("x-shopify-topic")
                .cloned()
                .unwrap_or_else(|| "unknown".to_string()),
            provider_event_id: headers.get("x-shopify-webhook-id").cloned(),
        },
        Provider::Github => EventMetadata {
            event_type: headers
                .get("x-github-event")
                .cloned()
                .unwrap_or_else(|| "unknown".to_string()),
            provider_event_id: headers.get("x-github-delivery").cloned(),
        },
    }
}

fn hmac_digest(secret: &str, message: &[u8]) -> Vec<u8> {
    // Infallible: HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Constant-time string comparison to prevent timing attacks.
fn timing_safe_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (a_byte, b_byte) in a.bytes().zip(b.bytes()) {
        result |= a_byte ^ b_byte;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use hookwise_testing::fixtures::{
        github_signature_header, shopify_hmac_header, stripe_signature_header,
    };
    use serde_json::json;

    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_700_000_000;

    fn headers(pairs: &[(&str, String)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn stripe_round_trip_verifies() {
        let body = br#"{"id":"evt_1","type":"charge.succeeded"}"#;
        let headers =
            headers(&[("stripe-signature", stripe_signature_header(SECRET, NOW, body))]);

        let outcome = verify_signature(Provider::Stripe, SECRET, &headers, body, NOW);
        assert!(outcome.valid, "{:?}", outcome.error);
    }

    #[test]
    fn stripe_rejects_flipped_payload_byte() {
        let body = br#"{"id":"evt_1","type":"charge.succeeded"}"#;
        let headers =
            headers(&[("stripe-signature", stripe_signature_header(SECRET, NOW, body))]);

        let mut tampered = body.to_vec();
        tampered[10] ^= 0x01;
        let outcome = verify_signature(Provider::Stripe, SECRET, &headers, &tampered, NOW);
        assert!(!outcome.valid);
    }

    #[test]
    fn stripe_rejects_stale_timestamp() {
        let body = b"{}";
        let stale = NOW - STRIPE_TOLERANCE_SECS - 1;
        let headers =
            headers(&[("stripe-signature", stripe_signature_header(SECRET, stale, body))]);

        let outcome = verify_signature(Provider::Stripe, SECRET, &headers, body, NOW);
        assert!(!outcome.valid);
        assert!(outcome.error.unwrap().contains("tolerance"));
    }

    #[test]
    fn stripe_accepts_any_matching_v1_candidate() {
        let body = b"{}";
        let good = stripe_signature_header(SECRET, NOW, body);
        let digest = good.split("v1=").nth(1).unwrap();
        let stacked = format!("t={NOW},v1={},v1={digest}", "0".repeat(64));
        let headers = headers(&[("stripe-signature", stacked)]);

        let outcome = verify_signature(Provider::Stripe, SECRET, &headers, body, NOW);
        assert!(outcome.valid);
    }

    #[test]
    fn shopify_round_trip_verifies() {
        let body = br#"{"id":450789469}"#;
        let headers = headers(&[("x-shopify-hmac-sha256", shopify_hmac_header(SECRET, body))]);

        let outcome = verify_signature(Provider::Shopify, SECRET, &headers, body, NOW);
        assert!(outcome.valid);
    }

    #[test]
    fn shopify_rejects_wrong_secret() {
        let body = br#"{"id":450789469}"#;
        let headers = headers(&[("x-shopify-hmac-sha256", shopify_hmac_header("other", body))]);

        let outcome = verify_signature(Provider::Shopify, SECRET, &headers, body, NOW);
        assert!(!outcome.valid);
    }

    #[test]
    fn github_round_trip_verifies() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        let headers = headers(&[("x-hub-signature-256", github_signature_header(SECRET, body))]);

        let outcome = verify_signature(Provider::Github, SECRET, &headers, body, NOW);
        assert!(outcome.valid);
    }

    #[test]
    fn github_rejects_unprefixed_signature() {
        let body = b"{}";
        let raw = github_signature_header(SECRET, body).replace("sha256=", "");
        let headers = headers(&[("x-hub-signature-256", raw)]);

        let outcome = verify_signature(Provider::Github, SECRET, &headers, body, NOW);
        assert!(!outcome.valid);
    }

    #[test]
    fn missing_headers_fail_with_diagnostics() {
        let empty = HashMap::new();
        for provider in [Provider::Stripe, Provider::Shopify, Provider::Github] {
            let outcome = verify_signature(provider, SECRET, &empty, b"{}", NOW);
            assert!(!outcome.valid);
            assert!(outcome.error.unwrap().contains("missing"));
        }
    }

    #[test]
    fn stripe_metadata_comes_from_payload() {
        let payload = json!({"id": "evt_42", "type": "invoice.paid"});
        let meta = event_metadata(Provider::Stripe, &HashMap::new(), &payload);
        assert_eq!(meta.event_type, "invoice.paid");
        assert_eq!(meta.provider_event_id.as_deref(), Some("evt_42"));
    }

    #[test]
    fn shopify_metadata_comes_from_headers() {
        let headers = headers(&[
            ("x-shopify-topic", "orders/create".to_string()),
            ("x-shopify-webhook-id", "b54557e4".to_string()),
        ]);
        let meta = event_metadata(Provider::Shopify, &headers, &json!({}));
        assert_eq!(meta.event_type, "orders/create");
        assert_eq!(meta.provider_event_id.as_deref(), Some("b54557e4"));
    }

    #[test]
    fn github_metadata_comes_from_headers() {
        let headers = headers(&[
            ("x-github-event", "push".to_string()),
            ("x-github-delivery", "72d3162e-cc78".to_string()),
        ]);
        let meta = event_metadata(Provider::Github, &headers, &json!({}));
        assert_eq!(meta.event_type, "push");
        assert_eq!(meta.provider_event_id.as_deref(), Some("72d3162e-cc78"));
    }

    #[test]
    fn metadata_defaults_to_unknown_type() {
        let meta = event_metadata(Provider::Github, &HashMap::new(), &json!({}));
        assert_eq!(meta.event_type, "unknown");
        assert_eq!(meta.provider_event_id, None);
    }

    #[test]
    fn timing_safe_eq_semantics() {
        assert!(timing_safe_eq("abc", "abc"));
        assert!(!timing_safe_eq("abc", "abd"));
        assert!(!timing_safe_eq("abc", "abcd"));
    }
}

//! Payload fixtures and provider signature helpers.
//!
//! The signing helpers produce exactly the header shapes the verifier
//! expects, so tests can exercise the accept and reject paths with real
//! HMACs instead of canned strings.

use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A Stripe-style charge event payload.
pub fn stripe_payload(event_id: &str, customer: &str) -> Value {
    json!({
        "id": event_id,
        "type": "charge.succeeded",
        "created": 1_700_000_000,
        "data": {
            "object": {
                "id": "ch_3OaQ2x",
                "object": "charge",
                "amount": 2000,
                "customer": customer
            }
        }
    })
}

/// A Shopify-style order payload.
pub fn shopify_order_payload(order_id: u64) -> Value {
    json!({
        "id": order_id,
        "order_number": 1001,
        "total_price": "199.00",
        "currency": "EUR",
        "line_items": [{"title": "Widget", "quantity": 1}]
    })
}

/// A GitHub-style push payload.
pub fn github_push_payload(repo: &str) -> Value {
    json!({
        "ref": "refs/heads/main",
        "before": "6113728f27ae82c7b1a177c8d03f9e96e0adf246",
        "repository": { "full_name": repo, "default_branch": "main" },
        "commits": []
    })
}

fn hmac_bytes(secret: &str, message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Builds a `Stripe-Signature` header value for a body and timestamp.
pub fn stripe_signature_header(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut message = timestamp.to_string().into_bytes();
    message.push(b'.');
    message.extend_from_slice(body);
    format!("t={timestamp},v1={}", hex::encode(hmac_bytes(secret, &message)))
}

/// Builds an `X-Shopify-Hmac-Sha256` header value for a body.
pub fn shopify_hmac_header(secret: &str, body: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(hmac_bytes(secret, body))
}

/// Builds an `X-Hub-Signature-256` header value for a body.
pub fn github_signature_header(secret: &str, body: &[u8]) -> String {
    format!("sha256={}", hex::encode(hmac_bytes(secret, body)))
}

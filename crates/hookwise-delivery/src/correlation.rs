//! Correlation key extraction for ordered replay grouping.
//!
//! A correlation key groups events that belong to one business object (a
//! customer, an order, a repository) so replay keeps their relative order.
//! Keys are hints, never identity: dedup uses the provider event id.

use hookwise_core::Provider;
use serde_json::Value;

/// Derives the correlation key for an event payload, if one applies.
pub fn correlation_key(provider: Provider, payload: &Value) -> Option<String> {
    match provider {
        Provider::Stripe => stripe_key(payload),
        Provider::Shopify => shopify_key(payload),
        Provider::Github => github_key(payload),
    }
}

/// `data.object.customer` wins over `data.object.id`: events for one
/// customer stay ordered even across different object types.
fn stripe_key(payload: &Value) -> Option<String> {
    let object = payload.get("data")?.get("object")?;

    if let Some(customer) = scalar_id(object.get("customer")) {
        return Some(format!("stripe:customer:{customer}"));
    }
    scalar_id(object.get("id")).map(|id| format!("stripe:object:{id}"))
}

fn shopify_key(payload: &Value) -> Option<String> {
    if let Some(order_id) = scalar_id(payload.get("order_id")) {
        return Some(format!("shopify:order:{order_id}"));
    }
    scalar_id(payload.get("id")).map(|id| format!("shopify:resource:{id}"))
}

fn github_key(payload: &Value) -> Option<String> {
    payload
        .get("repository")
        .and_then(|repo| repo.get("full_name"))
        .and_then(Value::as_str)
        .map(|name| format!("github:repo:{name}"))
}

/// Accepts string and integer identifiers; Shopify ids are numeric.
fn scalar_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

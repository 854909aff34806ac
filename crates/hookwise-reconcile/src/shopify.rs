//! Shopify-style order listing.
//!
//! Pages the Admin REST orders endpoint by following the
//! `Link: <next>; rel="next"` header. Orders synthesize the event id
//! `shopify:order:<id>` and the type `orders/create`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::{
    error::{ReconcileError, Result},
    ProviderEvent,
};

const API_VERSION: &str = "2024-01";

#[derive(Debug, Deserialize)]
struct OrdersPage {
    orders: Vec<Value>,
}

/// Lists all orders created since the window start.
///
/// # Errors
///
/// Returns an error on transport failure or an unexpected response shape.
pub async fn fetch_orders(
    client: &reqwest::Client,
    base_url: &str,
    credential: &str,
    since: DateTime<Utc>,
) -> Result<Vec<ProviderEvent>> {
    let mut events = Vec::new();
    let mut next_url = Some(format!(
        "{base_url}/admin/api/{API_VERSION}/orders.json?status=any&created_at_min={}",
        since.to_rfc3339()
    ));

    while let Some(url) = next_url.take() {
        let response = client
            .get(&url)
            .header("X-Shopify-Access-Token", credential)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ReconcileError::Provider(format!(
                "orders listing returned {}",
                response.status()
            )));
        }

        next_url = response
            .headers()
            .get("link")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_next_link);

        let page: OrdersPage = response
            .json()
            .await
            .map_err(|e| ReconcileError::Provider(format!("malformed orders page: {e}")))?;

        debug!(count = page.orders.len(), has_next = next_url.is_some(), "orders page fetched");

        for order in page.orders {
            let Some(order_id) = order.get("id").and_then(order_id_string) else {
                return Err(ReconcileError::Provider("order without an id".to_string()));
            };
            events.push(ProviderEvent {
                id: format!("shopify:order:{order_id}"),
                event_type: "orders/create".to_string(),
                payload: order,
            });
        }
    }

    Ok(events)
}

/// Extracts the `rel="next"` URL from a `Link` header.
fn parse_next_link(header: &str) -> Option<String> {
    for segment in header.split(',') {
        let segment = segment.trim();
        if !segment.contains(r#"rel="next""#) {
            continue;
        }
        let start = segment.find('<')?;
        let end = segment.find('>')?;
        if start < end {
            return Some(segment[start + 1..end].to_string());
        }
    }
    None
}

fn order_id_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_link_is_extracted() {
        let header = r#"<https://shop.example.com/admin/api/2024-01/orders.json?page_info=abc>; rel="next""#;
        assert_eq!(
            parse_next_link(header),
            Some(
                "https://shop.example.com/admin/api/2024-01/orders.json?page_info=abc".to_string()
            )
        );
    }

    #[test]
    fn previous_only_link_yields_none() {
        let header = r#"<https://shop.example.com/orders.json?page_info=xyz>; rel="previous""#;
        assert_eq!(parse_next_link(header), None);
    }

    #[test]
    fn next_is_found_among_multiple_relations() {
        let header = concat!(
            r#"<https://shop.example.com/orders.json?page_info=prev>; rel="previous", "#,
            r#"<https://shop.example.com/orders.json?page_info=next>; rel="next""#
        );
        assert_eq!(
            parse_next_link(header),
            Some("https://shop.example.com/orders.json?page_info=next".to_string())
        );
    }
}

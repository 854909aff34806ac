//! Stripe-style event listing.
//!
//! Pages `GET /v1/events` with `created[gte]`/`created[lte]` bounds and
//! the `starting_after` cursor, 100 events per page.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::{
    error::{ReconcileError, Result},
    ProviderEvent,
};

const PAGE_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
struct EventsPage {
    data: Vec<StripeEvent>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    #[serde(default)]
    data: Value,
}

/// Lists all provider events created inside the window.
///
/// # Errors
///
/// Returns an error on transport failure or an unexpected response shape.
pub async fn fetch_events(
    client: &reqwest::Client,
    base_url: &str,
    credential: &str,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<ProviderEvent>> {
    let mut events = Vec::new();
    let mut starting_after: Option<String> = None;

    loop {
        let mut request = client
            .get(format!("{base_url}/v1/events"))
            .bearer_auth(credential)
            .query(&[
                ("created[gte]", since.timestamp().to_string()),
                ("created[lte]", until.timestamp().to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ]);
        if let Some(cursor) = &starting_after {
            request = request.query(&[("starting_after", cursor.as_str())]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ReconcileError::Provider(format!(
                "events listing returned {}",
                response.status()
            )));
        }

        let page: EventsPage = response
            .json()
            .await
            .map_err(|e| ReconcileError::Provider(format!("malformed events page: {e}")))?;

        debug!(count = page.data.len(), has_more = page.has_more, "events page fetched");

        starting_after = page.data.last().map(|event| event.id.clone());
        let has_more = page.has_more && starting_after.is_some();

        events.extend(page.data.into_iter().map(|event| {
            let payload = serde_json::json!({
                "id": event.id.clone(),
                "type": event.event_type.clone(),
                "created": event.created,
                "data": event.data,
            });
            ProviderEvent { id: event.id, event_type: event.event_type, payload }
        }));

        if !has_more {
            break;
        }
    }

    Ok(events)
}

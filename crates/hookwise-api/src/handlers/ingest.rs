//! Webhook ingestion handler: the 50 ms fast path.
//!
//! Accepts a provider notification, verifies its signature, persists the
//! event, and hands off delivery. The only awaited persistence is the
//! single event insert; the task enqueue is a local channel hand-off and
//! its failure never fails the request (the orphan sweeper redrives).

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use hookwise_core::{
    Clock, EventId, IntegrationId, IntegrationStatus, Task, WebhookEvent,
};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    signature::{event_metadata, verify_signature},
    AppState,
};

/// Maximum accepted payload size (10 MB).
const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Error response with code and message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Stable machine-readable code.
    pub code: &'static str,
    /// Human-readable description.
    pub message: String,
}

fn error_response(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: ErrorDetail { code, message: message.into() } }))
        .into_response()
}

/// Ingests a webhook for reliable delivery.
///
/// The producer always observes success once the event is durable,
/// including on signature verification failure: the validity flag is
/// stored and downstream policy decides whether to forward.
#[instrument(
    name = "ingest_webhook",
    skip(state, headers, body),
    fields(integration_id = %integration_id, payload_size = body.len())
)]
pub async fn ingest_webhook(
    Path(integration_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if body.len() > MAX_PAYLOAD_SIZE {
        warn!(payload_size = body.len(), "payload exceeds size limit");
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            format!("payload of {} bytes exceeds the 10MB limit", body.len()),
        );
    }

    let integration_id = IntegrationId::from(integration_id);
    let integration = match state.storage.integrations.find_by_id(integration_id).await {
        Ok(Some(integration)) => integration,
        Ok(None) => {
            return error_response(
                StatusCode::NOT_FOUND,
                "integration_not_found",
                format!("integration {integration_id} not found"),
            );
        },
        Err(e) => {
            error!(error = %e, "integration lookup failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_failure",
                "failed to look up integration",
            );
        },
    };

    if integration.status != IntegrationStatus::Active {
        return error_response(
            StatusCode::CONFLICT,
            "integration_inactive",
            format!("integration is {}", integration.status),
        );
    }

    let header_map = lowercase_headers(&headers);
    let now = state.clock.now_utc();

    let signature = verify_signature(
        integration.provider,
        &integration.signing_secret,
        &header_map,
        &body,
        now.timestamp(),
    );
    if !signature.valid {
        // Stored anyway; the durable flag is what downstream policy reads.
        debug!(error = ?signature.error, "signature verification failed");
    }

    let payload = match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(value) => value,
        Err(_) => serde_json::json!({ "raw": String::from_utf8_lossy(&body) }),
    };
    let metadata = event_metadata(integration.provider, &header_map, &payload);

    let event = WebhookEvent::new(
        EventId::new(),
        integration.id,
        metadata.event_type,
        payload,
        header_map,
        now,
        signature.valid,
        metadata.provider_event_id,
    );

    if let Err(e) = state.storage.events.create(&event).await {
        error!(error = %e, "failed to persist event");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_failure",
            "failed to persist event",
        );
    }

    // Best-effort hand-off: the event is durable, the sweeper covers a
    // lost enqueue.
    let task = Task::WebhookReceived {
        event_id: event.id,
        integration_id: integration.id,
        destination_url: integration.destination_url.clone(),
    };
    if let Err(e) = state.queue.enqueue(task).await {
        error!(event_id = %event.id, error = %e, "delivery hand-off failed, sweeper will redrive");
    }

    info!(
        event_id = %event.id,
        event_type = %event.event_type,
        signature_valid = event.signature_valid,
        "webhook accepted"
    );

    (StatusCode::OK, Json(serde_json::json!({ "received": true }))).into_response()
}

/// Captures request headers with lower-cased keys.
fn lowercase_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (name, value) in headers {
        if let Ok(value_str) = value.to_str() {
            map.insert(name.as_str().to_lowercase(), value_str.to_string());
        }
    }
    map
}

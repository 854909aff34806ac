//! HTTP transport for webhook delivery and health probing.
//!
//! Handles request construction, HookWise header stamping, response
//! capture, and body truncation. Transport failures surface as outcome
//! data for the classifier rather than errors: the worker always gets a
//! `DeliveryResponse` back.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hookwise_core::{EventId, IntegrationId};
use tracing::{debug, info_span, warn, Instrument};

use crate::error::{DeliveryError, Result};

/// Maximum response body bytes retained on the delivery record.
pub const MAX_CAPTURED_BODY: usize = 1024;

/// Configuration for the delivery client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// User agent string for outbound requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { user_agent: "HookWise-Delivery/1.0".to_string(), max_redirects: 3 }
    }
}

/// One outbound delivery to perform.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Event being delivered.
    pub event_id: EventId,
    /// Integration the event belongs to.
    pub integration_id: IntegrationId,
    /// Destination URL.
    pub url: String,
    /// Exact payload bytes; the serialization of the stored payload.
    pub body: Vec<u8>,
    /// Sequential attempt number, 1-based.
    pub attempt_number: i32,
    /// Request deadline for this attempt.
    pub timeout: Duration,
    /// Whether this send happens on the replay path.
    pub replay: bool,
    /// Timestamp stamped into `X-HookWise-Timestamp`.
    pub sent_at: DateTime<Utc>,
}

/// Captured outcome of a delivery attempt.
///
/// Exactly one of `status_code` / `transport_error` is set.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status, when the destination answered.
    pub status_code: Option<u16>,
    /// Response body, truncated to [`MAX_CAPTURED_BODY`] bytes.
    pub body: String,
    /// Raw `Retry-After` header value, if present.
    pub retry_after: Option<String>,
    /// Round trip duration.
    pub elapsed: Duration,
    /// Client-level error text, when no response arrived.
    pub transport_error: Option<String>,
}

impl DeliveryResponse {
    /// Whether the destination acknowledged with a 2xx.
    pub fn is_success(&self) -> bool {
        self.status_code.is_some_and(|code| (200..300).contains(&code))
    }

    /// Elapsed milliseconds, clamped into an i32 for the record.
    pub fn elapsed_ms(&self) -> i32 {
        i32::try_from(self.elapsed.as_millis()).unwrap_or(i32::MAX)
    }
}

/// HTTP client optimized for webhook delivery.
///
/// Connection pooling is shared across destinations; per-attempt deadlines
/// are set on each request rather than the client so timeout retries can
/// double them.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
}

impl DeliveryClient {
    /// Creates a new delivery client.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built with the provided settings.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .build()
            .map_err(|e| DeliveryError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Creates a client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the client cannot be built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(&ClientConfig::default())
    }

    /// Delivers a webhook payload to its destination.
    ///
    /// Never fails: transport errors come back inside the response so the
    /// classifier can bucket them.
    pub async fn deliver(&self, request: DeliveryRequest) -> DeliveryResponse {
        let span = info_span!(
            "webhook_delivery",
            event_id = %request.event_id,
            url = %request.url,
            attempt = request.attempt_number,
            replay = request.replay,
        );

        async move {
            let start = std::time::Instant::now();

            let mut http_request = self
                .client
                .post(&request.url)
                .timeout(request.timeout)
                .header("Content-Type", "application/json")
                .header("X-HookWise-Event-ID", request.event_id.to_string())
                .header("X-HookWise-Timestamp", request.sent_at.to_rfc3339())
                .header("X-HookWise-Integration-ID", request.integration_id.to_string())
                .body(request.body.clone());

            if request.attempt_number > 1 {
                http_request = http_request
                    .header("X-HookWise-Retry-Count", (request.attempt_number - 1).to_string());
            }
            if request.replay {
                http_request = http_request.header("X-HookWise-Replay", "true");
            }

            match http_request.send().await {
                Ok(response) => {
                    let elapsed = start.elapsed();
                    let status = response.status().as_u16();
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .map(ToString::to_string);
                    let body = capture_body(response).await;

                    debug!(status, elapsed_ms = elapsed.as_millis() as u64, "response received");

                    DeliveryResponse {
                        status_code: Some(status),
                        body,
                        retry_after,
                        elapsed,
                        transport_error: None,
                    }
                },
                Err(error) => {
                    let elapsed = start.elapsed();
                    let message = transport_error_message(&error);
                    warn!(elapsed_ms = elapsed.as_millis() as u64, error = %message, "request failed");

                    DeliveryResponse {
                        status_code: None,
                        body: String::new(),
                        retry_after: None,
                        elapsed,
                        transport_error: Some(message),
                    }
                },
            }
        }
        .instrument(span)
        .await
    }

    /// Probes a destination for liveness: HEAD first, GET on non-2xx.
    ///
    /// Any 2xx counts as healthy.
    pub async fn probe(&self, url: &str, timeout: Duration) -> bool {
        let head_ok = match self.client.head(url).timeout(timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        };
        if head_ok {
            return true;
        }

        match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Reads and truncates the response body for the audit record.
async fn capture_body(response: reqwest::Response) -> String {
    match response.bytes().await {
        Ok(bytes) => {
            let end = bytes.len().min(MAX_CAPTURED_BODY);
            String::from_utf8_lossy(&bytes[..end]).into_owned()
        },
        Err(e) => {
            warn!("failed to read response body: {e}");
            String::new()
        },
    }
}

/// Normalizes reqwest errors into classifier-matchable text.
///
/// The classifier matches on substrings like "timeout", "certificate",
/// and "connection refused"; reqwest's own messages carry these, we only
/// make the timeout case explicit.
fn transport_error_message(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        return format!("request timeout: {error}");
    }

    // Surface the full source chain; the useful fragment ("connection
    // refused", "certificate verify failed") usually sits at the bottom.
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

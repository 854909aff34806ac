//! Transport failure classification.
//!
//! Maps a delivery outcome onto the error taxonomy that drives retry
//! scheduling and circuit breaker decisions. Rules apply in order, first
//! match wins; transport-level errors outrank HTTP status codes because a
//! status never arrives when the transport failed.

use std::time::Duration;

use hookwise_core::DeliveryErrorType;

/// Retry delay on an unparseable or missing `Retry-After` header.
const RATE_LIMIT_FALLBACK: Duration = Duration::from_secs(60);

/// Retry delay after a 503, giving the destination room to recover.
const SERVICE_UNAVAILABLE_BACKOFF: Duration = Duration::from_secs(30);

/// Classified delivery failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Taxonomy bucket for the failure.
    pub error_type: DeliveryErrorType,
    /// Whether the worker schedules a retry.
    pub should_retry: bool,
    /// Mandatory wait before the retry, when the bucket prescribes one.
    /// None means retry without delay (the timeout bucket instead doubles
    /// the request deadline).
    pub retry_delay: Option<Duration>,
    /// Whether the failure trips the circuit immediately so the health
    /// prober owns recovery.
    pub should_open_circuit: bool,
}

/// Classifies a failed delivery attempt.
///
/// `transport_error` is the client-level error text when no response
/// arrived; `status_code` is set when the destination answered;
/// `retry_after` is the raw `Retry-After` header value if present.
pub fn classify_failure(
    status_code: Option<u16>,
    transport_error: Option<&str>,
    retry_after: Option<&str>,
) -> Classification {
    if let Some(message) = transport_error {
        let message = message.to_lowercase();

        if message.contains("abort") || message.contains("timeout") {
            return Classification {
                error_type: DeliveryErrorType::Timeout,
                should_retry: true,
                retry_delay: None,
                should_open_circuit: false,
            };
        }

        if message.contains("ssl") || message.contains("tls") || message.contains("certificate") {
            return Classification {
                error_type: DeliveryErrorType::Ssl,
                should_retry: false,
                retry_delay: None,
                should_open_circuit: true,
            };
        }

        if message.contains("econnrefused")
            || message.contains("enotfound")
            || message.contains("connection refused")
        {
            return Classification {
                error_type: DeliveryErrorType::ConnectionRefused,
                should_retry: false,
                retry_delay: None,
                should_open_circuit: true,
            };
        }
    }

    match status_code {
        Some(429) => Classification {
            error_type: DeliveryErrorType::RateLimit,
            should_retry: true,
            retry_delay: Some(
                retry_after
                    .and_then(parse_retry_after_seconds)
                    .map_or(RATE_LIMIT_FALLBACK, Duration::from_secs),
            ),
            should_open_circuit: false,
        },
        Some(503) => Classification {
            error_type: DeliveryErrorType::ServerError,
            should_retry: true,
            retry_delay: Some(SERVICE_UNAVAILABLE_BACKOFF),
            should_open_circuit: false,
        },
        Some(code) if code >= 500 => Classification {
            error_type: DeliveryErrorType::ServerError,
            should_retry: true,
            retry_delay: None,
            should_open_circuit: false,
        },
        _ => Classification {
            error_type: DeliveryErrorType::Unknown,
            should_retry: true,
            retry_delay: None,
            should_open_circuit: false,
        },
    }
}

/// Parses the leading integer of a `Retry-After` value.
///
/// Lenient like `parseInt`: `"7"` and `"7 seconds"` both yield 7. HTTP-date
/// values yield None and fall back to the default delay.
fn parse_retry_after_seconds(value: &str) -> Option<u64> {
    let digits: String = value.trim().chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

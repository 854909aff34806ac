//! Error types for delivery engine operations.
//!
//! Transport failures are not represented here: they are data (a
//! classified outcome) that drives the retry decision tree. This type
//! covers the infrastructure and semantic failures that abort a handler.

use hookwise_core::CoreError;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Infrastructure and semantic errors inside the delivery engine.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Database operation failed. Surfaces to the task layer for retry.
    #[error("database error: {message}")]
    Database {
        /// Database error message.
        message: String,
    },

    /// Invalid configuration, e.g. an unbuildable HTTP client.
    #[error("configuration error: {message}")]
    Configuration {
        /// Configuration error message.
        message: String,
    },

    /// Task queue hand-off failed.
    #[error("task queue error: {message}")]
    Queue {
        /// Queue error message.
        message: String,
    },

    /// An entity disappeared between enqueue and handling (e.g. deleted
    /// mid-flight). The task is terminated, not retried.
    #[error("missing entity: {what}")]
    MissingEntity {
        /// Description of what was not found.
        what: String,
    },
}

impl DeliveryError {
    /// Creates a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates a queue error.
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue { message: message.into() }
    }

    /// Creates a missing entity error.
    pub fn missing(what: impl Into<String>) -> Self {
        Self::MissingEntity { what: what.into() }
    }
}

impl From<CoreError> for DeliveryError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(what) => Self::MissingEntity { what },
            CoreError::QueueUnavailable(message) => Self::Queue { message },
            other => Self::Database { message: other.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_not_found_becomes_missing_entity() {
        let err: DeliveryError = CoreError::NotFound("endpoint".to_string()).into();
        assert!(matches!(err, DeliveryError::MissingEntity { .. }));
    }

    #[test]
    fn core_queue_error_maps_to_queue() {
        let err: DeliveryError = CoreError::QueueUnavailable("closed".to_string()).into();
        assert!(matches!(err, DeliveryError::Queue { .. }));
    }
}

//! Error types for reconciliation operations.

use hookwise_core::CoreError;
use thiserror::Error;

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Errors raised while pulling provider APIs and filling gaps.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Provider API request failed.
    #[error("provider API error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider response did not match the expected shape.
    #[error("unexpected provider response: {0}")]
    Provider(String),

    /// Storage operation failed.
    #[error(transparent)]
    Core(#[from] CoreError),
}

//! HTTP ingestion surface for HookWise.
//!
//! Provides the producer-facing ingestion endpoint, health probes,
//! provider signature verification, and service configuration. Producers
//! always observe success once the event is durable; delivery happens
//! asynchronously behind the task queue.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use hookwise_core::{storage::Storage, Clock, TaskQueue};

pub mod config;
pub mod handlers;
pub mod server;
pub mod signature;

pub use config::Config;
pub use server::{create_router, create_test_router, start_server};

/// Shared state for request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Storage facade for all repositories.
    pub storage: Arc<Storage>,
    /// Task queue for delivery hand-off.
    pub queue: Arc<dyn TaskQueue>,
    /// Clock for timestamps and the signature tolerance check.
    pub clock: Arc<dyn Clock>,
}

//! Core domain models, task topics, and storage for HookWise.
//!
//! Provides strongly-typed domain primitives, the task-queue abstraction
//! connecting pipeline stages, and the repository-pattern persistence
//! layer. All other crates depend on these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod tasks;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    CircuitState, Delivery, DeliveryErrorType, DeliveryStatus, Endpoint, EndpointId, EventId,
    EventSource, Integration, IntegrationId, IntegrationStatus, Provider, ReconciliationRun,
    ReplayQueueItem, ReplayStatus, WebhookEvent,
};
pub use tasks::{InProcessQueue, NoOpQueue, Task, TaskQueue};
pub use time::{Clock, RealClock};

//! Task topics and queue abstraction for decoupled pipeline stages.
//!
//! Components never call each other directly: ingestion, the delivery
//! worker, the prober, and reconciliation all communicate by enqueuing
//! tasks. The queue is a black box providing hand-off; durability comes
//! from the event store plus the orphan sweeper, which re-emits
//! `webhook/received` for any accepted event that never produced a
//! delivery.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    error::{CoreError, Result},
    models::{EndpointId, EventId, IntegrationId},
};

/// A unit of work flowing between pipeline stages.
///
/// Variants correspond one-to-one with the canonical topic names returned
/// by [`Task::topic`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Task {
    /// An accepted event is ready for its first delivery attempt. Emitted
    /// by ingestion, reconciliation, and the orphan sweeper.
    WebhookReceived {
        /// Event to deliver.
        event_id: EventId,
        /// Integration the event belongs to.
        integration_id: IntegrationId,
        /// Destination URL snapshot taken at emission time.
        destination_url: String,
    },

    /// A scheduled re-attempt of a failed delivery. One retry maximum per
    /// error bucket; the retry handler never fans out again.
    WebhookRetry {
        /// Event to deliver.
        event_id: EventId,
        /// Integration the event belongs to.
        integration_id: IntegrationId,
        /// Destination URL snapshot taken at emission time.
        destination_url: String,
        /// Attempt number for the retry, 1-based.
        attempt_number: i32,
        /// Request deadline for this attempt in milliseconds.
        timeout_ms: u64,
    },

    /// The circuit breaker transitioned to OPEN. Notification to
    /// observers; carries no delivery obligation.
    CircuitOpened {
        /// Endpoint whose circuit opened.
        endpoint_id: EndpointId,
        /// Integration the endpoint belongs to.
        integration_id: IntegrationId,
    },

    /// The circuit breaker transitioned OPEN to HALF_OPEN; the replay
    /// engine drains the endpoint's queue. Emitted exactly once per
    /// transition.
    ReplayStarted {
        /// Endpoint whose queue should drain.
        endpoint_id: EndpointId,
        /// Integration the endpoint belongs to.
        integration_id: IntegrationId,
    },

    /// A delivery completed; downstream flow tracking may advance.
    /// Best-effort.
    FlowStepCompleted {
        /// Event that was delivered.
        event_id: EventId,
        /// Integration the event belongs to.
        integration_id: IntegrationId,
    },
}

impl Task {
    /// Canonical topic name for this task.
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::WebhookReceived { .. } => "webhook/received",
            Self::WebhookRetry { .. } => "webhook/retry",
            Self::CircuitOpened { .. } => "endpoint/circuit-opened",
            Self::ReplayStarted { .. } => "endpoint/replay-started",
            Self::FlowStepCompleted { .. } => "flow/step-completed",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

/// Producer side of the task queue.
///
/// `enqueue` must return quickly: the ingestion latency budget only allows
/// a local hand-off, never a blocking round-trip.
#[async_trait::async_trait]
pub trait TaskQueue: Send + Sync + fmt::Debug {
    /// Enqueues a task for asynchronous processing.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::QueueUnavailable` if the queue can no longer
    /// accept tasks. Callers on the ingestion fast path log and continue;
    /// the sweeper redrives the event.
    async fn enqueue(&self, task: Task) -> Result<()>;
}

/// In-process queue backed by an unbounded tokio channel.
///
/// The receiving half is drained by the task dispatcher. Unbounded is
/// deliberate: producers must never block, and the dispatcher bounds
/// actual concurrency with its worker pool.
#[derive(Debug, Clone)]
pub struct InProcessQueue {
    sender: mpsc::UnboundedSender<Task>,
}

impl InProcessQueue {
    /// Creates the queue and its receiver half.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait::async_trait]
impl TaskQueue for InProcessQueue {
    async fn enqueue(&self, task: Task) -> Result<()> {
        self.sender
            .send(task)
            .map_err(|e| CoreError::QueueUnavailable(format!("dispatcher stopped: {e}")))
    }
}

/// Queue that discards every task.
///
/// Used where emissions are irrelevant, e.g. replay-engine unit tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpQueue;

#[async_trait::async_trait]
impl TaskQueue for NoOpQueue {
    async fn enqueue(&self, _task: Task) -> Result<()> {
        Ok(())
    }
}

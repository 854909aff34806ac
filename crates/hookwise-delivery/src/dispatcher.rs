//! Task dispatcher: routes queued tasks onto a bounded worker pool.
//!
//! Drains the in-process queue and runs each task on its own tokio task,
//! capped by a semaphore so a burst of ingestion cannot overwhelm the
//! process. Cooperative shutdown waits for in-flight handlers before
//! aborting stragglers.

use std::{sync::Arc, time::Duration};

use hookwise_core::Task;
use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{replay::ReplayEngine, worker::DeliveryWorker};

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum concurrently running task handlers.
    pub max_concurrency: usize,
    /// How long shutdown waits for in-flight handlers.
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { max_concurrency: 8, shutdown_timeout: Duration::from_secs(30) }
    }
}

/// Routes tasks from the queue to their handlers.
pub struct TaskDispatcher {
    receiver: mpsc::UnboundedReceiver<Task>,
    worker: Arc<DeliveryWorker>,
    replay: Arc<ReplayEngine>,
    cancellation_token: CancellationToken,
    config: DispatcherConfig,
}

impl TaskDispatcher {
    /// Creates a dispatcher over the queue's receiving half.
    pub fn new(
        receiver: mpsc::UnboundedReceiver<Task>,
        worker: Arc<DeliveryWorker>,
        replay: Arc<ReplayEngine>,
        cancellation_token: CancellationToken,
        config: DispatcherConfig,
    ) -> Self {
        Self { receiver, worker, replay, cancellation_token, config }
    }

    /// Runs until cancelled or the queue closes, then drains in-flight
    /// handlers.
    pub async fn run(mut self) {
        info!(max_concurrency = self.config.max_concurrency, "task dispatcher starting");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut join_set: JoinSet<()> = JoinSet::new();

        loop {
            // Reap completed handlers so the set does not grow unbounded.
            while join_set.try_join_next().is_some() {}

            let task = tokio::select! {
                () = self.cancellation_token.cancelled() => break,
                maybe = self.receiver.recv() => match maybe {
                    Some(task) => task,
                    None => break,
                },
            };

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };

            let worker = self.worker.clone();
            let replay = self.replay.clone();
            join_set.spawn(async move {
                let _permit = permit;
                handle_task(&worker, &replay, task).await;
            });
        }

        info!(in_flight = join_set.len(), "task dispatcher draining");

        let drain = async {
            while join_set.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.config.shutdown_timeout, drain).await.is_err() {
            warn!("dispatcher drain timed out, aborting remaining handlers");
        }

        info!("task dispatcher stopped");
    }
}

/// Dispatches one task to its handler.
async fn handle_task(worker: &DeliveryWorker, replay: &ReplayEngine, task: Task) {
    let topic = task.topic();

    match task {
        Task::WebhookReceived { event_id, integration_id, destination_url } => {
            match worker.handle_received(event_id, integration_id, &destination_url).await {
                Ok(outcome) => debug!(topic, event_id = %event_id, ?outcome, "task handled"),
                Err(e) => error!(topic, event_id = %event_id, error = %e, "task failed"),
            }
        },
        Task::WebhookRetry {
            event_id,
            integration_id,
            destination_url,
            attempt_number,
            timeout_ms,
        } => {
            match worker
                .handle_retry(event_id, integration_id, &destination_url, attempt_number, timeout_ms)
                .await
            {
                Ok(outcome) => debug!(topic, event_id = %event_id, ?outcome, "task handled"),
                Err(e) => error!(topic, event_id = %event_id, error = %e, "task failed"),
            }
        },
        Task::ReplayStarted { endpoint_id, .. } => match replay.drain(endpoint_id).await {
            Ok(summary) => debug!(topic, endpoint_id = %endpoint_id, ?summary, "replay finished"),
            Err(e) => error!(topic, endpoint_id = %endpoint_id, error = %e, "replay failed"),
        },
        Task::CircuitOpened { endpoint_id, integration_id } => {
            // Observer notification; alerting consumers subscribe here.
            warn!(topic, endpoint_id = %endpoint_id, integration_id = %integration_id,
                "destination circuit opened");
        },
        Task::FlowStepCompleted { event_id, integration_id } => {
            debug!(topic, event_id = %event_id, integration_id = %integration_id,
                "flow step completed");
        },
    }
}

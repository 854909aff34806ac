//! Delivery worker: handles `webhook/received` and `webhook/retry`.
//!
//! The worker is the pipeline's decision point. It gates on the circuit
//! breaker, performs the HTTP send, records the attempt, feeds the breaker,
//! and schedules at most one retry per error bucket. Retry handling repeats
//! the send with the provided attempt number but never fans out again.

use std::{sync::Arc, time::Duration};

use hookwise_core::{
    storage::Storage, CircuitState, Clock, Delivery, DeliveryStatus, Endpoint, EventId,
    Integration, IntegrationId, Task, TaskQueue, WebhookEvent,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    circuit::CircuitBreaker,
    classify::{classify_failure, Classification},
    client::{DeliveryClient, DeliveryRequest},
    correlation::correlation_key,
    error::Result,
};

/// Timing knobs for the delivery worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Request deadline for first attempts and non-timeout retries.
    pub request_timeout: Duration,
    /// Doubled deadline used when retrying a timeout.
    pub retry_timeout: Duration,
    /// Per-endpoint throttle applied before sends in HALF_OPEN.
    pub half_open_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            retry_timeout: Duration::from_secs(10),
            half_open_delay: Duration::from_secs(1),
        }
    }
}

/// What happened to a handled delivery task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Destination acknowledged with a 2xx.
    Delivered,
    /// Circuit was OPEN; the event went to the replay queue.
    Queued {
        /// Position the event received in the endpoint's queue.
        position: i64,
    },
    /// A retry was scheduled at the given attempt number.
    RetryScheduled {
        /// Attempt number the retry will carry.
        attempt: i32,
    },
    /// The attempt failed with no further automatic action.
    Failed,
    /// The task ended without a send or retry: entity missing, forwarding
    /// disabled, or a terminal error class.
    Terminated,
}

/// Delivery worker shared across dispatcher tasks.
pub struct DeliveryWorker {
    storage: Storage,
    client: Arc<DeliveryClient>,
    breaker: Arc<CircuitBreaker>,
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
}

impl DeliveryWorker {
    /// Creates a new delivery worker.
    pub fn new(
        storage: Storage,
        client: Arc<DeliveryClient>,
        breaker: Arc<CircuitBreaker>,
        queue: Arc<dyn TaskQueue>,
        clock: Arc<dyn Clock>,
        config: WorkerConfig,
    ) -> Self {
        Self { storage, client, breaker, queue, clock, config }
    }

    /// Handles `webhook/received`: first delivery of an accepted event.
    ///
    /// # Errors
    ///
    /// Returns an error on database or queue failure; semantic holes
    /// (deleted entities) terminate the task instead.
    pub async fn handle_received(
        &self,
        event_id: EventId,
        integration_id: IntegrationId,
        destination_url: &str,
    ) -> Result<DeliveryOutcome> {
        let Some((event, integration)) = self.load_context(event_id, integration_id).await? else {
            return Ok(DeliveryOutcome::Terminated);
        };

        if !event.signature_valid && !integration.forward_invalid_signature {
            warn!(
                event_id = %event_id,
                integration_id = %integration_id,
                "invalid-signature event withheld from delivery"
            );
            return Ok(DeliveryOutcome::Terminated);
        }

        let endpoint = self.storage.endpoints.find_by_integration(integration_id).await?;

        if let Some(endpoint) = &endpoint {
            match endpoint.circuit_state {
                CircuitState::Open => {
                    let key = correlation_key(integration.provider, &event.payload.0);
                    let position = self
                        .breaker
                        .enqueue_for_replay(endpoint.id, event.id, key.as_deref())
                        .await?;
                    info!(
                        event_id = %event_id,
                        endpoint_id = %endpoint.id,
                        position,
                        "circuit open, event queued for replay"
                    );
                    return Ok(DeliveryOutcome::Queued { position });
                },
                CircuitState::HalfOpen => {
                    self.clock.sleep(self.config.half_open_delay).await;
                },
                CircuitState::Closed => {},
            }
        }

        self.attempt(
            &event,
            &integration,
            endpoint.as_ref(),
            destination_url,
            1,
            self.config.request_timeout,
            true,
        )
        .await
    }

    /// Handles `webhook/retry`: the single scheduled re-attempt.
    ///
    /// Repeats the send and recording steps with the provided attempt
    /// number and deadline, skipping the retry fan-out.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn handle_retry(
        &self,
        event_id: EventId,
        integration_id: IntegrationId,
        destination_url: &str,
        attempt_number: i32,
        timeout_ms: u64,
    ) -> Result<DeliveryOutcome> {
        let Some((event, integration)) = self.load_context(event_id, integration_id).await? else {
            return Ok(DeliveryOutcome::Terminated);
        };

        let endpoint = self.storage.endpoints.find_by_integration(integration_id).await?;

        self.attempt(
            &event,
            &integration,
            endpoint.as_ref(),
            destination_url,
            attempt_number,
            Duration::from_millis(timeout_ms),
            false,
        )
        .await
    }

    /// One send-record-classify cycle.
    ///
    /// `fan_out` is true only on the first attempt: the retry decision tree
    /// runs once per event.
    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        event: &WebhookEvent,
        integration: &Integration,
        endpoint: Option<&Endpoint>,
        destination_url: &str,
        attempt_number: i32,
        timeout: Duration,
        fan_out: bool,
    ) -> Result<DeliveryOutcome> {
        let now = self.clock.now_utc();
        let response = self
            .client
            .deliver(DeliveryRequest {
                event_id: event.id,
                integration_id: integration.id,
                url: destination_url.to_string(),
                body: event.payload_bytes(),
                attempt_number,
                timeout,
                replay: false,
                sent_at: now,
            })
            .await;

        let success = response.is_success();
        let classification = if success {
            None
        } else {
            Some(classify_failure(
                response.status_code,
                response.transport_error.as_deref(),
                response.retry_after.as_deref(),
            ))
        };

        let will_retry =
            fan_out && classification.as_ref().is_some_and(|c| c.should_retry);
        let next_retry_at = will_retry.then(|| {
            let delay = classification
                .as_ref()
                .and_then(|c| c.retry_delay)
                .unwrap_or_default();
            now + chrono::Duration::from_std(delay).unwrap_or_default()
        });

        self.storage
            .deliveries
            .create(&Delivery {
                id: Uuid::new_v4(),
                event_id: event.id,
                endpoint_id: endpoint.map(|e| e.id),
                status: if success { DeliveryStatus::Delivered } else { DeliveryStatus::Failed },
                status_code: response.status_code.map(i32::from),
                response_time_ms: response.status_code.map(|_| response.elapsed_ms()),
                response_body: response.status_code.map(|_| response.body.clone()),
                error_type: classification.as_ref().map(|c| c.error_type),
                attempt_number,
                attempted_at: now,
                next_retry_at,
            })
            .await?;

        if let Some(endpoint) = endpoint {
            let mut transition = self.breaker.record_delivery(endpoint.id, success).await?;

            // TLS and connection failures trip the circuit outright; the
            // health prober owns recovery from here.
            let force_open = classification.as_ref().is_some_and(|c| c.should_open_circuit);
            if force_open && transition.current != CircuitState::Open {
                let tripped = self.breaker.trip(endpoint.id).await?;
                transition = crate::circuit::CircuitTransition {
                    previous: transition.previous,
                    current: tripped.current,
                };
            }

            if transition.opened() {
                self.emit(Task::CircuitOpened {
                    endpoint_id: endpoint.id,
                    integration_id: integration.id,
                })
                .await;
            }
        }

        if success {
            debug!(
                event_id = %event.id,
                attempt = attempt_number,
                status = ?response.status_code,
                "webhook delivered"
            );
            self.emit(Task::FlowStepCompleted {
                event_id: event.id,
                integration_id: integration.id,
            })
            .await;
            return Ok(DeliveryOutcome::Delivered);
        }

        let classification = classification.unwrap_or_else(|| {
            // classify_failure is total; this arm is unreachable.
            classify_failure(None, None, None)
        });

        if !classification.should_retry {
            warn!(
                event_id = %event.id,
                error_type = %classification.error_type,
                "terminal delivery failure, no retry"
            );
            return Ok(DeliveryOutcome::Terminated);
        }

        if !fan_out {
            warn!(
                event_id = %event.id,
                attempt = attempt_number,
                error_type = %classification.error_type,
                "retry attempt failed, giving up"
            );
            return Ok(DeliveryOutcome::Failed);
        }

        self.schedule_retry(event, integration, destination_url, &classification).await
    }

    /// Applies the per-error-type retry policy from the first attempt.
    async fn schedule_retry(
        &self,
        event: &WebhookEvent,
        integration: &Integration,
        destination_url: &str,
        classification: &Classification,
    ) -> Result<DeliveryOutcome> {
        use hookwise_core::DeliveryErrorType as E;

        if let Some(delay) = classification.retry_delay {
            // 429 honours Retry-After; 503 waits out the outage window.
            self.clock.sleep(delay).await;
        }

        let timeout = match classification.error_type {
            E::Timeout => self.config.retry_timeout,
            _ => self.config.request_timeout,
        };

        let retry = Task::WebhookRetry {
            event_id: event.id,
            integration_id: integration.id,
            destination_url: destination_url.to_string(),
            attempt_number: 2,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        };
        self.queue.enqueue(retry).await?;

        info!(
            event_id = %event.id,
            error_type = %classification.error_type,
            "retry scheduled at attempt 2"
        );
        Ok(DeliveryOutcome::RetryScheduled { attempt: 2 })
    }

    /// Loads the event and integration, terminating on semantic holes.
    async fn load_context(
        &self,
        event_id: EventId,
        integration_id: IntegrationId,
    ) -> Result<Option<(WebhookEvent, Integration)>> {
        let Some(event) = self.storage.events.find_by_id(event_id).await? else {
            warn!(event_id = %event_id, "event vanished before delivery, terminating task");
            return Ok(None);
        };
        let Some(integration) = self.storage.integrations.find_by_id(integration_id).await? else {
            warn!(
                integration_id = %integration_id,
                "integration vanished before delivery, terminating task"
            );
            return Ok(None);
        };

        Ok(Some((event, integration)))
    }

    /// Best-effort task emission: failures are logged, never propagated.
    async fn emit(&self, task: Task) {
        let topic = task.topic();
        if let Err(error) = self.queue.enqueue(task).await {
            warn!(topic, error = %error, "task emission failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_delivery_contract() {
        let config = WorkerConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.retry_timeout, Duration::from_secs(10));
        assert_eq!(config.half_open_delay, Duration::from_secs(1));
    }
}

//! Ordered replay engine: drains a recovered endpoint's queue.
//!
//! Triggered by `endpoint/replay-started` after the breaker moves to
//! HALF_OPEN. Items drain in strict position order with an adaptive rate
//! ladder, deduplication against already-delivered provider events, and a
//! fixed skip budget so one poisoned item never blocks later positions.

use std::{sync::Arc, time::Duration};

use hookwise_core::{
    storage::Storage, CircuitState, Clock, Delivery, DeliveryStatus, EndpointId, ReplayQueueItem,
    WebhookEvent,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    circuit::CircuitBreaker,
    classify::classify_failure,
    client::{DeliveryClient, DeliveryRequest},
    error::Result,
};

/// Events-per-second ladder; any failure drops back to the first rung.
const RATE_TIERS: [u64; 4] = [1, 2, 5, 10];

/// Consecutive successes required to climb one rung.
const TIER_ADVANCE_AFTER: u32 = 5;

/// Inter-send pauses shorter than this are skipped.
const MIN_PAUSE: Duration = Duration::from_millis(100);

/// Per-item attempt budget before the item is skipped.
const REPLAY_MAX_ATTEMPTS: i32 = 3;

/// Configuration for the replay engine.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Pending items fetched per iteration.
    pub batch_size: i64,
    /// Request deadline for replay sends.
    pub request_timeout: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { batch_size: 10, request_timeout: Duration::from_secs(5) }
    }
}

/// Accounting for one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Items delivered over HTTP.
    pub delivered: u64,
    /// Items marked delivered without a send (provider id dedup).
    pub deduplicated: u64,
    /// Items skipped after exhausting the attempt budget.
    pub skipped: u64,
    /// Failed sends (items returned to pending).
    pub failed: u64,
    /// Whether the pass stopped because the circuit reopened.
    pub aborted: bool,
}

/// Replay engine shared across dispatcher tasks.
pub struct ReplayEngine {
    storage: Storage,
    client: Arc<DeliveryClient>,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    config: ReplayConfig,
}

impl ReplayEngine {
    /// Creates a new replay engine.
    pub fn new(
        storage: Storage,
        client: Arc<DeliveryClient>,
        breaker: Arc<CircuitBreaker>,
        clock: Arc<dyn Clock>,
        config: ReplayConfig,
    ) -> Self {
        Self { storage, client, breaker, clock, config }
    }

    /// Drains the endpoint's queue until empty or the circuit reopens.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure. Send failures are not errors;
    /// they return items to pending and reset the rate ladder.
    pub async fn drain(&self, endpoint_id: EndpointId) -> Result<ReplaySummary> {
        let mut summary = ReplaySummary::default();

        let Some(endpoint) = self.storage.endpoints.find_by_id(endpoint_id).await? else {
            warn!(endpoint_id = %endpoint_id, "endpoint vanished before replay");
            return Ok(summary);
        };
        let Some(integration) =
            self.storage.integrations.find_by_id(endpoint.integration_id).await?
        else {
            warn!(endpoint_id = %endpoint_id, "integration vanished before replay");
            return Ok(summary);
        };

        let mut tier_idx = 0usize;
        let mut streak = 0u32;

        info!(endpoint_id = %endpoint_id, "replay drain starting");

        'drain: loop {
            let batch =
                self.storage.replay_queue.pending_batch(endpoint_id, self.config.batch_size).await?;
            if batch.is_empty() {
                break;
            }

            for item in batch {
                // Hot state read each item: stop as soon as the breaker
                // reopens.
                let Some(current) = self.breaker.current_state(endpoint_id).await? else {
                    break 'drain;
                };
                if current.circuit_state == CircuitState::Open {
                    summary.aborted = true;
                    break 'drain;
                }

                let Some(event) = self.storage.events.find_by_id(item.event_id).await? else {
                    warn!(event_id = %item.event_id, "queued event vanished, marking failed");
                    self.storage.replay_queue.mark_failed(item.id).await?;
                    continue;
                };

                if self.deduplicate(&integration.id, &event, &item).await? {
                    summary.deduplicated += 1;
                    continue;
                }

                if item.attempts >= REPLAY_MAX_ATTEMPTS {
                    debug!(
                        event_id = %event.id,
                        position = item.position,
                        attempts = item.attempts,
                        "skip budget exhausted"
                    );
                    self.storage.replay_queue.mark_skipped(item.id).await?;
                    summary.skipped += 1;
                    continue;
                }

                let attempts = self.storage.replay_queue.mark_delivering(item.id).await?;

                let pause = Duration::from_millis(1000u64.div_ceil(RATE_TIERS[tier_idx]));
                if pause >= MIN_PAUSE {
                    self.clock.sleep(pause).await;
                }

                let now = self.clock.now_utc();
                let response = self
                    .client
                    .deliver(DeliveryRequest {
                        event_id: event.id,
                        integration_id: integration.id,
                        url: integration.destination_url.clone(),
                        body: event.payload_bytes(),
                        attempt_number: attempts,
                        timeout: self.config.request_timeout,
                        replay: true,
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

                self.storage
                    .deliveries
                    .create(&Delivery {
                        id: Uuid::new_v4(),
                        event_id: event.id,
                        endpoint_id: Some(endpoint_id),
                        status: if success {
                            DeliveryStatus::Delivered
                        } else {
                            DeliveryStatus::Failed
                        },
                        status_code: response.status_code.map(i32::from),
                        response_time_ms: response.status_code.map(|_| response.elapsed_ms()),
                        response_body: response.status_code.map(|_| response.body.clone()),
                        error_type: classification.as_ref().map(|c| c.error_type),
                        attempt_number: attempts,
                        attempted_at: now,
                        next_retry_at: None,
                    })
                    .await?;

                let mut transition = self.breaker.record_delivery(endpoint_id, success).await?;
                let force_open =
                    classification.as_ref().is_some_and(|c| c.should_open_circuit);
                if force_open && transition.current != CircuitState::Open {
                    let tripped = self.breaker.trip(endpoint_id).await?;
                    transition = crate::circuit::CircuitTransition {
                        previous: transition.previous,
                        current: tripped.current,
                    };
                }

                if success {
                    self.storage.replay_queue.mark_delivered(item.id, self.clock.now_utc()).await?;
                    summary.delivered += 1;
                    streak += 1;
                    if streak >= TIER_ADVANCE_AFTER && tier_idx + 1 < RATE_TIERS.len() {
                        tier_idx += 1;
                        streak = 0;
                        debug!(rate = RATE_TIERS[tier_idx], "replay rate tier advanced");
                    }
                } else {
                    self.storage.replay_queue.return_to_pending(item.id).await?;
                    summary.failed += 1;
                    tier_idx = 0;
                    streak = 0;
                    if transition.current == CircuitState::Open {
                        summary.aborted = true;
                        break 'drain;
                    }
                }
            }
        }

        info!(
            endpoint_id = %endpoint_id,
            delivered = summary.delivered,
            deduplicated = summary.deduplicated,
            skipped = summary.skipped,
            failed = summary.failed,
            aborted = summary.aborted,
            "replay drain finished"
        );

        Ok(summary)
    }

    /// Marks the item delivered without a send when another event with the
    /// same provider id already reached the destination.
    async fn deduplicate(
        &self,
        integration_id: &hookwise_core::IntegrationId,
        event: &WebhookEvent,
        item: &ReplayQueueItem,
    ) -> Result<bool> {
        let Some(provider_event_id) = &event.provider_event_id else {
            return Ok(false);
        };

        let duplicate = self
            .storage
            .deliveries
            .delivered_for_provider_event(*integration_id, provider_event_id, event.id)
            .await?;
        if duplicate {
            debug!(
                event_id = %event.id,
                provider_event_id,
                "duplicate provider event, marking delivered without send"
            );
            self.storage.replay_queue.mark_delivered(item.id, self.clock.now_utc()).await?;
        }

        Ok(duplicate)
    }
}

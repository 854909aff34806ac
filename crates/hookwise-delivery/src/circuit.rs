//! Per-endpoint circuit breaker over persisted delivery history.
//!
//! State is a cell, not a log: every write recomputes the sliding window
//! from the last 20 delivery rows plus the incoming one, under a row-level
//! lock on the endpoint. The truth stays in the deliveries table, so after
//! a restart the next `record_delivery` re-derives correct state.
//!
//! # State machine
//!
//! ```text
//!                ┌──────────────────────────┐
//!                │         CLOSED           │
//!                │   deliver immediately    │
//!                └──────────────────────────┘
//!                  │                      ▲
//!   5 consecutive  │                      │ 10 consecutive
//!   failures, or   │                      │ successes
//!   <50% success   ▼                      │
//!   ┌────────────────────┐   3 health   ┌───────────────────────┐
//!   │        OPEN        │   probes OK  │       HALF-OPEN       │
//!   │ enqueue to replay  │ ───────────▶ │  throttled to 1/s     │
//!   └────────────────────┘              └───────────────────────┘
//!                  ▲                      │
//!                  └──────────────────────┘
//!                     2 consecutive failures
//! ```
//!
//! Health-check outcomes are ignored unless the state is OPEN.

use std::sync::Arc;

use hookwise_core::{
    storage::{deliveries::WindowSample, endpoints::EndpointHealthUpdate, Storage},
    CircuitState, Clock, Endpoint, EndpointId, EventId,
};
use tracing::{info, warn};

use crate::error::{DeliveryError, Result};

/// Thresholds for the breaker state machine.
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Sliding window size, excluding the incoming delivery.
    pub window_size: i64,
    /// Minimum window length before the success-rate rule can trip.
    pub min_window_for_rate: usize,
    /// Success rate (percent) below which a full-enough window trips.
    pub min_success_rate: f64,
    /// Consecutive failures that open the circuit from CLOSED.
    pub failure_threshold: i32,
    /// Consecutive failures that reopen the circuit from HALF_OPEN.
    pub half_open_failure_threshold: i32,
    /// Consecutive successes that close the circuit from HALF_OPEN.
    pub close_threshold: i32,
    /// Consecutive health-check successes that move OPEN to HALF_OPEN.
    pub health_check_threshold: i32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            min_window_for_rate: 5,
            min_success_rate: 50.0,
            failure_threshold: 5,
            half_open_failure_threshold: 2,
            close_threshold: 10,
            health_check_threshold: 3,
        }
    }
}

/// Rolling statistics over a delivery window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    /// Percentage of delivered attempts, 0.0 to 100.0.
    pub success_rate: f64,
    /// Average response time over attempts that produced a response.
    pub avg_response_ms: f64,
    /// Number of samples in the window.
    pub window_len: usize,
}

/// Computes rolling stats from window samples.
///
/// An empty window reports a 100% success rate so a fresh endpoint never
/// trips on its first failure via the rate rule.
pub fn compute_window_stats(samples: &[WindowSample]) -> WindowStats {
    if samples.is_empty() {
        return WindowStats { success_rate: 100.0, avg_response_ms: 0.0, window_len: 0 };
    }

    let successes = samples.iter().filter(|s| s.succeeded).count();
    #[allow(clippy::cast_precision_loss)]
    let success_rate = (successes as f64 / samples.len() as f64) * 100.0;

    let timed: Vec<i32> = samples.iter().filter_map(|s| s.response_time_ms).collect();
    let avg_response_ms = if timed.is_empty() {
        0.0
    } else {
        f64::from(timed.iter().sum::<i32>()) / timed.len() as f64
    };

    WindowStats { success_rate, avg_response_ms, window_len: samples.len() }
}

/// Result of one breaker mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitTransition {
    /// State before the mutation.
    pub previous: CircuitState,
    /// State after the mutation.
    pub current: CircuitState,
}

impl CircuitTransition {
    /// Whether the state actually changed.
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }

    /// Whether this mutation opened the circuit.
    pub fn opened(&self) -> bool {
        self.changed() && self.current == CircuitState::Open
    }

    /// Whether this mutation moved OPEN to HALF_OPEN.
    pub fn recovered(&self) -> bool {
        self.previous == CircuitState::Open && self.current == CircuitState::HalfOpen
    }
}

/// Next state after a recorded delivery outcome.
///
/// OPEN never transitions here: only health checks leave OPEN.
fn next_state_after_delivery(
    config: &CircuitConfig,
    state: CircuitState,
    consecutive_failures: i32,
    consecutive_successes: i32,
    stats: WindowStats,
) -> CircuitState {
    match state {
        CircuitState::Closed => {
            if consecutive_failures >= config.failure_threshold
                || (stats.window_len >= config.min_window_for_rate
                    && stats.success_rate < config.min_success_rate)
            {
                CircuitState::Open
            } else {
                CircuitState::Closed
            }
        },
        CircuitState::HalfOpen => {
            if consecutive_failures >= config.half_open_failure_threshold {
                CircuitState::Open
            } else if consecutive_successes >= config.close_threshold {
                CircuitState::Closed
            } else {
                CircuitState::HalfOpen
            }
        },
        CircuitState::Open => CircuitState::Open,
    }
}

/// Database-backed circuit breaker.
///
/// All mutations run in a transaction holding the endpoint row lock, so
/// concurrent deliveries against the same destination serialize and can
/// never double-open the circuit with stale counters.
pub struct CircuitBreaker {
    storage: Storage,
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Creates a breaker over the given storage.
    pub fn new(storage: Storage, config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        Self { storage, config, clock }
    }

    /// Records a delivery outcome and applies any state transition.
    ///
    /// The delivery row must already be persisted: the window query reads
    /// the last `window_size + 1` rows, which is the prior window plus the
    /// incoming outcome.
    ///
    /// # Errors
    ///
    /// Returns `MissingEntity` if the endpoint row is gone, or a database
    /// error if the transaction fails.
    pub async fn record_delivery(
        &self,
        endpoint_id: EndpointId,
        success: bool,
    ) -> Result<CircuitTransition> {
        let now = self.clock.now_utc();
        let pool = self.storage.pool();
        let mut tx = pool.begin().await.map_err(|e| DeliveryError::database(e.to_string()))?;

        let endpoint = self
            .storage
            .endpoints
            .find_by_id_for_update(&mut tx, endpoint_id)
            .await?
            .ok_or_else(|| DeliveryError::missing(format!("endpoint {endpoint_id}")))?;

        let samples = self
            .storage
            .deliveries
            .window_in_tx(&mut tx, endpoint_id, self.config.window_size + 1)
            .await?;
        let stats = compute_window_stats(&samples);

        let (consecutive_failures, consecutive_successes) = if success {
            (0, endpoint.consecutive_successes + 1)
        } else {
            (endpoint.consecutive_failures + 1, 0)
        };

        let previous = endpoint.circuit_state;
        let current = next_state_after_delivery(
            &self.config,
            previous,
            consecutive_failures,
            consecutive_successes,
            stats,
        );

        let mut update = EndpointHealthUpdate {
            circuit_state: current,
            success_rate: stats.success_rate,
            avg_response_ms: stats.avg_response_ms,
            consecutive_failures,
            consecutive_successes,
            consecutive_health_check_successes: endpoint.consecutive_health_check_successes,
            last_health_check_at: endpoint.last_health_check_at,
            state_changed_at: endpoint.state_changed_at,
        };

        if current != previous {
            update.state_changed_at = now;
            update.consecutive_health_check_successes = 0;
            match current {
                // The failure streak that opened the circuit stays visible
                // for dashboards; the success streak restarts.
                CircuitState::Open => update.consecutive_successes = 0,
                CircuitState::Closed | CircuitState::HalfOpen => {
                    update.consecutive_failures = 0;
                    update.consecutive_successes = 0;
                },
            }
        }

        self.storage.endpoints.update_health_in_tx(&mut tx, endpoint_id, &update).await?;
        tx.commit().await.map_err(|e| DeliveryError::database(e.to_string()))?;

        let transition = CircuitTransition { previous, current };
        if transition.opened() {
            warn!(
                endpoint_id = %endpoint_id,
                consecutive_failures,
                success_rate = stats.success_rate,
                "circuit opened"
            );
        } else if transition.changed() {
            info!(
                endpoint_id = %endpoint_id,
                from = %previous,
                to = %current,
                "circuit state changed"
            );
        }

        Ok(transition)
    }

    /// Records a health probe outcome.
    ///
    /// Outcomes only mutate counters while the circuit is OPEN; in any
    /// other state just the probe timestamp advances. Three consecutive
    /// successes move the circuit to HALF_OPEN and reset the delivery
    /// counters.
    ///
    /// # Errors
    ///
    /// Returns `MissingEntity` if the endpoint row is gone, or a database
    /// error if the transaction fails.
    pub async fn record_health_check(
        &self,
        endpoint_id: EndpointId,
        success: bool,
    ) -> Result<CircuitTransition> {
        let now = self.clock.now_utc();
        let pool = self.storage.pool();
        let mut tx = pool.begin().await.map_err(|e| DeliveryError::database(e.to_string()))?;

        let endpoint = self
            .storage
            .endpoints
            .find_by_id_for_update(&mut tx, endpoint_id)
            .await?
            .ok_or_else(|| DeliveryError::missing(format!("endpoint {endpoint_id}")))?;

        let previous = endpoint.circuit_state;
        let mut update = EndpointHealthUpdate {
            circuit_state: previous,
            success_rate: endpoint.success_rate,
            avg_response_ms: endpoint.avg_response_ms,
            consecutive_failures: endpoint.consecutive_failures,
            consecutive_successes: endpoint.consecutive_successes,
            consecutive_health_check_successes: endpoint.consecutive_health_check_successes,
            last_health_check_at: Some(now),
            state_changed_at: endpoint.state_changed_at,
        };

        if previous == CircuitState::Open {
            update.consecutive_health_check_successes =
                if success { endpoint.consecutive_health_check_successes + 1 } else { 0 };

            if update.consecutive_health_check_successes >= self.config.health_check_threshold {
                update.circuit_state = CircuitState::HalfOpen;
                update.state_changed_at = now;
                update.consecutive_failures = 0;
                update.consecutive_successes = 0;
                update.consecutive_health_check_successes = 0;
            }
        }

        let current = update.circuit_state;
        self.storage.endpoints.update_health_in_tx(&mut tx, endpoint_id, &update).await?;
        tx.commit().await.map_err(|e| DeliveryError::database(e.to_string()))?;

        let transition = CircuitTransition { previous, current };
        if transition.recovered() {
            info!(endpoint_id = %endpoint_id, "destination recovered, circuit half-open");
        }

        Ok(transition)
    }

    /// Forces the circuit OPEN.
    ///
    /// Used when a failure class (TLS, connection refused) indicates the
    /// destination is unreachable outright: waiting for the failure
    /// thresholds would only burn attempts. Recovery still runs through
    /// the health prober.
    ///
    /// # Errors
    ///
    /// Returns `MissingEntity` if the endpoint row is gone, or a database
    /// error if the transaction fails.
    pub async fn trip(&self, endpoint_id: EndpointId) -> Result<CircuitTransition> {
        let now = self.clock.now_utc();
        let pool = self.storage.pool();
        let mut tx = pool.begin().await.map_err(|e| DeliveryError::database(e.to_string()))?;

        let endpoint = self
            .storage
            .endpoints
            .find_by_id_for_update(&mut tx, endpoint_id)
            .await?
            .ok_or_else(|| DeliveryError::missing(format!("endpoint {endpoint_id}")))?;

        let previous = endpoint.circuit_state;
        if previous == CircuitState::Open {
            tx.rollback().await.map_err(|e| DeliveryError::database(e.to_string()))?;
            return Ok(CircuitTransition { previous, current: CircuitState::Open });
        }

        let update = EndpointHealthUpdate {
            circuit_state: CircuitState::Open,
            success_rate: endpoint.success_rate,
            avg_response_ms: endpoint.avg_response_ms,
            consecutive_failures: endpoint.consecutive_failures,
            consecutive_successes: 0,
            consecutive_health_check_successes: 0,
            last_health_check_at: endpoint.last_health_check_at,
            state_changed_at: now,
        };
        self.storage.endpoints.update_health_in_tx(&mut tx, endpoint_id, &update).await?;
        tx.commit().await.map_err(|e| DeliveryError::database(e.to_string()))?;

        warn!(endpoint_id = %endpoint_id, "circuit tripped open");
        Ok(CircuitTransition { previous, current: CircuitState::Open })
    }

    /// Enqueues an event into the endpoint's replay queue.
    ///
    /// Position allocation happens under the endpoint row lock so
    /// concurrent enqueues serialize and positions stay dense and
    /// monotonic.
    ///
    /// # Errors
    ///
    /// Returns `MissingEntity` if the endpoint row is gone, or a database
    /// error if the transaction fails.
    pub async fn enqueue_for_replay(
        &self,
        endpoint_id: EndpointId,
        event_id: EventId,
        correlation_key: Option<&str>,
    ) -> Result<i64> {
        let now = self.clock.now_utc();
        let pool = self.storage.pool();
        let mut tx = pool.begin().await.map_err(|e| DeliveryError::database(e.to_string()))?;

        self.storage
            .endpoints
            .find_by_id_for_update(&mut tx, endpoint_id)
            .await?
            .ok_or_else(|| DeliveryError::missing(format!("endpoint {endpoint_id}")))?;

        let position = self
            .storage
            .replay_queue
            .enqueue_in_tx(&mut tx, endpoint_id, event_id, correlation_key, now)
            .await?;

        tx.commit().await.map_err(|e| DeliveryError::database(e.to_string()))?;

        Ok(position)
    }

    /// The next position a replay enqueue would receive.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub async fn next_replay_position(&self, endpoint_id: EndpointId) -> Result<i64> {
        let pool = self.storage.pool();
        let mut tx = pool.begin().await.map_err(|e| DeliveryError::database(e.to_string()))?;
        let position = self.storage.replay_queue.next_position_in_tx(&mut tx, endpoint_id).await?;
        tx.rollback().await.map_err(|e| DeliveryError::database(e.to_string()))?;

        Ok(position)
    }

    /// Current endpoint state without locking.
    ///
    /// The hot read used by throttle decisions; staleness is bounded by
    /// the lock window and self-corrects on the next `record_delivery`.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub async fn current_state(&self, endpoint_id: EndpointId) -> Result<Option<Endpoint>> {
        Ok(self.storage.endpoints.find_by_id(endpoint_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn sample(succeeded: bool, ms: i32) -> WindowSample {
        WindowSample { succeeded, response_time_ms: Some(ms) }
    }

    fn config() -> CircuitConfig {
        CircuitConfig::default()
    }

    #[test]
    fn empty_window_reports_perfect_health() {
        let stats = compute_window_stats(&[]);
        assert_eq!(stats.success_rate, 100.0);
        assert_eq!(stats.avg_response_ms, 0.0);
        assert_eq!(stats.window_len, 0);
    }

    #[test]
    fn stats_average_only_timed_samples() {
        let samples = vec![
            sample(true, 100),
            sample(true, 300),
            WindowSample { succeeded: false, response_time_ms: None },
        ];
        let stats = compute_window_stats(&samples);
        assert!((stats.success_rate - 66.666).abs() < 0.01);
        assert_eq!(stats.avg_response_ms, 200.0);
        assert_eq!(stats.window_len, 3);
    }

    #[test]
    fn closed_opens_on_five_consecutive_failures() {
        let stats = WindowStats { success_rate: 80.0, avg_response_ms: 50.0, window_len: 20 };
        assert_eq!(
            next_state_after_delivery(&config(), CircuitState::Closed, 4, 0, stats),
            CircuitState::Closed
        );
        assert_eq!(
            next_state_after_delivery(&config(), CircuitState::Closed, 5, 0, stats),
            CircuitState::Open
        );
    }

    #[test]
    fn closed_opens_on_low_success_rate_with_full_enough_window() {
        let stats = WindowStats { success_rate: 40.0, avg_response_ms: 50.0, window_len: 5 };
        assert_eq!(
            next_state_after_delivery(&config(), CircuitState::Closed, 1, 0, stats),
            CircuitState::Open
        );

        // Same rate but window too small: stays closed.
        let thin = WindowStats { success_rate: 40.0, avg_response_ms: 50.0, window_len: 4 };
        assert_eq!(
            next_state_after_delivery(&config(), CircuitState::Closed, 1, 0, thin),
            CircuitState::Closed
        );
    }

    #[test]
    fn half_open_reopens_on_two_failures() {
        let stats = WindowStats { success_rate: 50.0, avg_response_ms: 50.0, window_len: 20 };
        assert_eq!(
            next_state_after_delivery(&config(), CircuitState::HalfOpen, 1, 0, stats),
            CircuitState::HalfOpen
        );
        assert_eq!(
            next_state_after_delivery(&config(), CircuitState::HalfOpen, 2, 0, stats),
            CircuitState::Open
        );
    }

    #[test]
    fn half_open_closes_on_ten_successes() {
        let stats = WindowStats { success_rate: 90.0, avg_response_ms: 50.0, window_len: 20 };
        assert_eq!(
            next_state_after_delivery(&config(), CircuitState::HalfOpen, 0, 9, stats),
            CircuitState::HalfOpen
        );
        assert_eq!(
            next_state_after_delivery(&config(), CircuitState::HalfOpen, 0, 10, stats),
            CircuitState::Closed
        );
    }

    #[test]
    fn open_never_transitions_on_delivery_outcomes() {
        // Only health checks leave OPEN, however good the stats look.
        let stats = WindowStats { success_rate: 100.0, avg_response_ms: 10.0, window_len: 20 };
        assert_eq!(
            next_state_after_delivery(&config(), CircuitState::Open, 0, 50, stats),
            CircuitState::Open
        );
    }

    #[test]
    fn transition_helpers() {
        let opened =
            CircuitTransition { previous: CircuitState::Closed, current: CircuitState::Open };
        assert!(opened.changed());
        assert!(opened.opened());
        assert!(!opened.recovered());

        let recovered =
            CircuitTransition { previous: CircuitState::Open, current: CircuitState::HalfOpen };
        assert!(recovered.recovered());
        assert!(!recovered.opened());

        let same =
            CircuitTransition { previous: CircuitState::Closed, current: CircuitState::Closed };
        assert!(!same.changed());
    }

    proptest! {
        /// The delivery transition function never leaves the three-state
        /// machine and never exits OPEN.
        #[test]
        fn delivery_transitions_stay_in_machine(
            state_idx in 0usize..3,
            cf in 0i32..50,
            cs in 0i32..50,
            rate in 0.0f64..100.0,
            len in 0usize..30,
        ) {
            let states =
                [CircuitState::Closed, CircuitState::HalfOpen, CircuitState::Open];
            let state = states[state_idx];
            let stats = WindowStats {
                success_rate: rate,
                avg_response_ms: 0.0,
                window_len: len,
            };
            let next = next_state_after_delivery(&config(), state, cf, cs, stats);
            prop_assert!(states.contains(&next));
            if state == CircuitState::Open {
                prop_assert_eq!(next, CircuitState::Open);
            }
        }
    }
}

//! Health prober: drives OPEN endpoints back toward recovery.
//!
//! Periodically probes every destination whose circuit is OPEN and feeds
//! outcomes to the breaker. When an endpoint crosses the recovery
//! threshold the prober emits `endpoint/replay-started` exactly once, on
//! the probe that performed the transition.

use std::{sync::Arc, time::Duration};

use hookwise_core::{storage::Storage, Clock, Task, TaskQueue};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{circuit::CircuitBreaker, client::DeliveryClient, error::Result};

/// Configuration for the health prober.
#[derive(Debug, Clone)]
pub struct ProberConfig {
    /// How often OPEN endpoints are enumerated.
    pub interval: Duration,
    /// Deadline for each probe request.
    pub probe_timeout: Duration,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(60), probe_timeout: Duration::from_secs(5) }
    }
}

/// Background prober over OPEN endpoints.
pub struct HealthProber {
    storage: Storage,
    client: Arc<DeliveryClient>,
    breaker: Arc<CircuitBreaker>,
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Clock>,
    config: ProberConfig,
}

impl HealthProber {
    /// Creates a new health prober.
    pub fn new(
        storage: Storage,
        client: Arc<DeliveryClient>,
        breaker: Arc<CircuitBreaker>,
        queue: Arc<dyn TaskQueue>,
        clock: Arc<dyn Clock>,
        config: ProberConfig,
    ) -> Self {
        Self { storage, client, breaker, queue, clock, config }
    }

    /// Runs probe cycles until cancelled.
    pub async fn run(&self, cancellation_token: CancellationToken) {
        info!(interval_secs = self.config.interval.as_secs(), "health prober starting");

        loop {
            tokio::select! {
                () = self.clock.sleep(self.config.interval) => {},
                () = cancellation_token.cancelled() => break,
            }

            if let Err(e) = self.probe_cycle().await {
                error!(error = %e, "probe cycle failed");
            }
        }

        info!("health prober stopped");
    }

    /// Probes every OPEN endpoint once. Returns how many were probed.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint enumeration fails; individual
    /// probe or breaker failures are logged and skipped.
    pub async fn probe_cycle(&self) -> Result<usize> {
        let open = self.storage.endpoints.find_open_circuits(None).await?;
        let probed = open.len();

        for endpoint in open {
            let healthy =
                self.client.probe(&endpoint.destination_url, self.config.probe_timeout).await;
            debug!(
                endpoint_id = %endpoint.id,
                url = %endpoint.destination_url,
                healthy,
                "destination probed"
            );

            match self.breaker.record_health_check(endpoint.id, healthy).await {
                Ok(transition) if transition.recovered() => {
                    let task = Task::ReplayStarted {
                        endpoint_id: endpoint.id,
                        integration_id: endpoint.integration_id,
                    };
                    if let Err(e) = self.queue.enqueue(task).await {
                        error!(
                            endpoint_id = %endpoint.id,
                            error = %e,
                            "failed to trigger replay after recovery"
                        );
                    }
                },
                Ok(_) => {},
                Err(e) => {
                    error!(endpoint_id = %endpoint.id, error = %e, "health check recording failed");
                },
            }
        }

        Ok(probed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cadence_matches_contract() {
        let config = ProberConfig::default();
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
    }
}

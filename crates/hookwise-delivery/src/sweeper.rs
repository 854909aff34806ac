//! Orphan sweeper: redrives accepted events that never started delivery.
//!
//! Ingestion acknowledges the producer once the event row is durable; the
//! task hand-off after that is best-effort. This sweeper closes the hole:
//! any event old enough to be suspicious with no delivery attempt and no
//! replay-queue slot gets `webhook/received` re-emitted.

use std::{sync::Arc, time::Duration};

use hookwise_core::{storage::Storage, Clock, Task, TaskQueue};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::Result;

/// Configuration for the orphan sweeper.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often the sweep runs.
    pub interval: Duration,
    /// Minimum event age before it counts as orphaned.
    pub min_age: Duration,
    /// Maximum orphans redriven per sweep.
    pub batch_size: i64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            min_age: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

/// Background sweeper over orphaned events.
pub struct OrphanSweeper {
    storage: Storage,
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Clock>,
    config: SweeperConfig,
}

impl OrphanSweeper {
    /// Creates a new orphan sweeper.
    pub fn new(
        storage: Storage,
        queue: Arc<dyn TaskQueue>,
        clock: Arc<dyn Clock>,
        config: SweeperConfig,
    ) -> Self {
        Self { storage, queue, clock, config }
    }

    /// Runs sweep cycles until cancelled.
    pub async fn run(&self, cancellation_token: CancellationToken) {
        info!(interval_secs = self.config.interval.as_secs(), "orphan sweeper starting");

        loop {
            tokio::select! {
                () = self.clock.sleep(self.config.interval) => {},
                () = cancellation_token.cancelled() => break,
            }

            match self.sweep_once().await {
                Ok(0) => {},
                Ok(redriven) => info!(redriven, "orphaned events redriven"),
                Err(e) => error!(error = %e, "orphan sweep failed"),
            }
        }

        info!("orphan sweeper stopped");
    }

    /// One sweep pass. Returns how many events were redriven.
    ///
    /// # Errors
    ///
    /// Returns an error if the orphan query fails; individual enqueue
    /// failures are logged and retried on the next sweep.
    pub async fn sweep_once(&self) -> Result<usize> {
        let min_age = chrono::Duration::from_std(self.config.min_age).unwrap_or_default();
        let cutoff = self.clock.now_utc() - min_age;

        let orphans = self.storage.events.find_orphaned(cutoff, self.config.batch_size).await?;

        let mut redriven = 0;
        for orphan in orphans {
            let task = Task::WebhookReceived {
                event_id: orphan.id,
                integration_id: orphan.integration_id,
                destination_url: orphan.destination_url,
            };
            match self.queue.enqueue(task).await {
                Ok(()) => redriven += 1,
                Err(e) => error!(event_id = %orphan.id, error = %e, "orphan redrive failed"),
            }
        }

        Ok(redriven)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cadence_matches_contract() {
        let config = SweeperConfig::default();
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.min_age, Duration::from_secs(60));
    }
}

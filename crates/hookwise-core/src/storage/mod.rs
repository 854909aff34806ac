//! Database access layer implementing the repository pattern.
//!
//! The repository layer acts as an anti-corruption layer, translating
//! between domain models and database schemas. All database operations go
//! through these repositories; direct SQL outside this module is forbidden
//! to maintain consistency.

use std::sync::Arc;

use sqlx::PgPool;

pub mod deliveries;
pub mod endpoints;
pub mod events;
pub mod integrations;
pub mod reconciliation_runs;
pub mod replay_queue;
pub mod schema;

use crate::error::Result;

/// Container for all repository instances providing unified database
/// access.
///
/// Manages a shared connection pool and provides type-safe access to each
/// domain repository.
#[derive(Clone)]
pub struct Storage {
    /// Repository for integration configuration.
    pub integrations: Arc<integrations::Repository>,

    /// Repository for endpoint health state.
    pub endpoints: Arc<endpoints::Repository>,

    /// Repository for webhook events.
    pub events: Arc<events::Repository>,

    /// Repository for delivery attempt records.
    pub deliveries: Arc<deliveries::Repository>,

    /// Repository for the per-endpoint replay queue.
    pub replay_queue: Arc<replay_queue::Repository>,

    /// Repository for reconciliation run audits.
    pub reconciliation_runs: Arc<reconciliation_runs::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            integrations: Arc::new(integrations::Repository::new(pool.clone())),
            endpoints: Arc::new(endpoints::Repository::new(pool.clone())),
            events: Arc::new(events::Repository::new(pool.clone())),
            deliveries: Arc::new(deliveries::Repository::new(pool.clone())),
            replay_queue: Arc::new(replay_queue::Repository::new(pool.clone())),
            reconciliation_runs: Arc::new(reconciliation_runs::Repository::new(pool)),
        }
    }

    /// Returns the shared connection pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.integrations.pool()
    }

    /// Performs a health check on the database connection.
    ///
    /// Executes a trivial query to verify connectivity. Used by the
    /// `/ready` endpoint.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool()).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn storage_can_be_created() {
        let pool = sqlx::PgPool::connect_lazy("postgresql://test").unwrap();
        let _storage = Storage::new(pool);
    }
}

//! Repository for endpoint database operations.
//!
//! The endpoint row holds all mutable health state for one destination and
//! is the single point of contention per integration: every read-modify-
//! write goes through `find_by_id_for_update` inside a transaction so the
//! circuit breaker's transitions serialize.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::{
    error::Result,
    models::{CircuitState, Endpoint, EndpointId, IntegrationId},
};

/// Full health-state write for an endpoint row.
///
/// Written back atomically at the end of a breaker transaction.
#[derive(Debug, Clone)]
pub struct EndpointHealthUpdate {
    /// New circuit state.
    pub circuit_state: CircuitState,
    /// Rolling success percentage over the window.
    pub success_rate: f64,
    /// Rolling average response time in milliseconds.
    pub avg_response_ms: f64,
    /// Consecutive failed deliveries.
    pub consecutive_failures: i32,
    /// Consecutive successful deliveries.
    pub consecutive_successes: i32,
    /// Consecutive successful health probes.
    pub consecutive_health_check_successes: i32,
    /// When the prober last probed, if it has.
    pub last_health_check_at: Option<DateTime<Utc>>,
    /// When the circuit last changed state.
    pub state_changed_at: DateTime<Utc>,
}

/// An OPEN endpoint joined with its destination, as the prober sees it.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OpenEndpoint {
    /// Endpoint whose circuit is open.
    pub id: EndpointId,
    /// Integration the endpoint belongs to.
    pub integration_id: IntegrationId,
    /// Destination URL to probe.
    pub destination_url: String,
}

/// Repository for endpoint database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Creates a new endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails; the 1:1 unique constraint on
    /// `integration_id` rejects a second endpoint for an integration.
    pub async fn create(&self, endpoint: &Endpoint) -> Result<EndpointId> {
        let id = sqlx::query_scalar(
            r"
            INSERT INTO endpoints (
                id, integration_id, circuit_state, success_rate, avg_response_ms,
                consecutive_failures, consecutive_successes,
                consecutive_health_check_successes, last_health_check_at,
                state_changed_at, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12
            )
            RETURNING id
            ",
        )
        .bind(endpoint.id.0)
        .bind(endpoint.integration_id.0)
        .bind(endpoint.circuit_state)
        .bind(endpoint.success_rate)
        .bind(endpoint.avg_response_ms)
        .bind(endpoint.consecutive_failures)
        .bind(endpoint.consecutive_successes)
        .bind(endpoint.consecutive_health_check_successes)
        .bind(endpoint.last_health_check_at)
        .bind(endpoint.state_changed_at)
        .bind(endpoint.created_at)
        .bind(endpoint.updated_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(EndpointId(id))
    }

    /// Finds an endpoint by ID.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, endpoint_id: EndpointId) -> Result<Option<Endpoint>> {
        let endpoint = sqlx::query_as::<_, Endpoint>(
            r"
            SELECT id, integration_id, circuit_state, success_rate, avg_response_ms,
                   consecutive_failures, consecutive_successes,
                   consecutive_health_check_successes, last_health_check_at,
                   state_changed_at, created_at, updated_at
            FROM endpoints
            WHERE id = $1
            ",
        )
        .bind(endpoint_id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(endpoint)
    }

    /// Finds the endpoint for an integration (1:1).
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_integration(
        &self,
        integration_id: IntegrationId,
    ) -> Result<Option<Endpoint>> {
        let endpoint = sqlx::query_as::<_, Endpoint>(
            r"
            SELECT id, integration_id, circuit_state, success_rate, avg_response_ms,
                   consecutive_failures, consecutive_successes,
                   consecutive_health_check_successes, last_health_check_at,
                   state_changed_at, created_at, updated_at
            FROM endpoints
            WHERE integration_id = $1
            ",
        )
        .bind(integration_id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(endpoint)
    }

    /// Locks and returns an endpoint row for read-modify-write.
    ///
    /// Callers hold the lock for the remainder of the transaction;
    /// concurrent breaker mutations and replay position allocations on the
    /// same endpoint block here.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        endpoint_id: EndpointId,
    ) -> Result<Option<Endpoint>> {
        let endpoint = sqlx::query_as::<_, Endpoint>(
            r"
            SELECT id, integration_id, circuit_state, success_rate, avg_response_ms,
                   consecutive_failures, consecutive_successes,
                   consecutive_health_check_successes, last_health_check_at,
                   state_changed_at, created_at, updated_at
            FROM endpoints
            WHERE id = $1
            FOR UPDATE
            ",
        )
        .bind(endpoint_id.0)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(endpoint)
    }

    /// Writes back the full health state within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn update_health_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        endpoint_id: EndpointId,
        update: &EndpointHealthUpdate,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE endpoints
            SET circuit_state = $2,
                success_rate = $3,
                avg_response_ms = $4,
                consecutive_failures = $5,
                consecutive_successes = $6,
                consecutive_health_check_successes = $7,
                last_health_check_at = $8,
                state_changed_at = $9,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(endpoint_id.0)
        .bind(update.circuit_state)
        .bind(update.success_rate)
        .bind(update.avg_response_ms)
        .bind(update.consecutive_failures)
        .bind(update.consecutive_successes)
        .bind(update.consecutive_health_check_successes)
        .bind(update.last_health_check_at)
        .bind(update.state_changed_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Finds endpoints whose circuit is OPEN, with their destinations.
    ///
    /// The prober's work list. Paused and errored integrations are
    /// excluded; probing a paused destination tells us nothing actionable.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_open_circuits(&self, limit: Option<i64>) -> Result<Vec<OpenEndpoint>> {
        let endpoints = sqlx::query_as::<_, OpenEndpoint>(
            r"
            SELECT e.id, e.integration_id, i.destination_url
            FROM endpoints e
            JOIN integrations i ON i.id = e.integration_id
            WHERE e.circuit_state = 'open' AND i.status = 'active'
            ORDER BY e.state_changed_at ASC
            LIMIT $1
            ",
        )
        .bind(limit.unwrap_or(100))
        .fetch_all(&*self.pool)
        .await?;

        Ok(endpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repository_can_be_created() {
        let pool = sqlx::PgPool::connect_lazy("postgresql://test").unwrap();
        let _repo = Repository::new(Arc::new(pool));
    }
}

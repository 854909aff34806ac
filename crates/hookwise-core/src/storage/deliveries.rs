//! Repository for delivery attempt database operations.
//!
//! One immutable row per attempt. The circuit breaker's sliding window is
//! derived from this table rather than a separate counter store, so the
//! breaker re-derives correct state after a restart.

use std::sync::Arc;

use sqlx::{Executor, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    error::Result,
    models::{Delivery, EndpointId, EventId, IntegrationId},
};

/// One window sample: did the attempt succeed, and how long did the
/// destination take to answer.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct WindowSample {
    /// Whether the attempt ended `delivered`.
    pub succeeded: bool,
    /// Round-trip milliseconds, when a response was received.
    pub response_time_ms: Option<i32>,
}

/// Repository for delivery attempt database operations.
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

    /// Records a delivery attempt.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails. The unique key on
    /// `(event_id, attempt_number)` makes re-recording after a task retry
    /// a constraint violation instead of a duplicate row.
    pub async fn create(&self, delivery: &Delivery) -> Result<Uuid> {
        self.create_impl(&*self.pool, delivery).await
    }

    /// Records a delivery attempt within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        delivery: &Delivery,
    ) -> Result<Uuid> {
        self.create_impl(&mut **tx, delivery).await
    }

    /// Private helper for creating deliveries with generic executor.
    async fn create_impl<'e, E>(&self, executor: E, delivery: &Delivery) -> Result<Uuid>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let id = sqlx::query_scalar(
            r"
            INSERT INTO deliveries (
                id, event_id, endpoint_id, status, status_code,
                response_time_ms, response_body, error_type,
                attempt_number, attempted_at, next_retry_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11
            )
            RETURNING id
            ",
        )
        .bind(delivery.id)
        .bind(delivery.event_id.0)
        .bind(delivery.endpoint_id.map(|e| e.0))
        .bind(delivery.status)
        .bind(delivery.status_code)
        .bind(delivery.response_time_ms)
        .bind(&delivery.response_body)
        .bind(delivery.error_type)
        .bind(delivery.attempt_number)
        .bind(delivery.attempted_at)
        .bind(delivery.next_retry_at)
        .fetch_one(executor)
        .await?;

        Ok(id)
    }

    /// Finds all attempts for an event, in attempt order.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_event(&self, event_id: EventId) -> Result<Vec<Delivery>> {
        let deliveries = sqlx::query_as::<_, Delivery>(
            r"
            SELECT id, event_id, endpoint_id, status, status_code,
                   response_time_ms, response_body, error_type,
                   attempt_number, attempted_at, next_retry_at
            FROM deliveries
            WHERE event_id = $1
            ORDER BY attempt_number ASC
            ",
        )
        .bind(event_id.0)
        .fetch_all(&*self.pool)
        .await?;

        Ok(deliveries)
    }

    /// The most recent attempts against an endpoint, newest first.
    ///
    /// Runs inside the breaker's locking transaction so the window read and
    /// the state write are one atomic step. The just-persisted attempt is
    /// part of the result, which is exactly the "last 20 plus the incoming
    /// one" the breaker wants.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn window_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        endpoint_id: EndpointId,
        limit: i64,
    ) -> Result<Vec<WindowSample>> {
        let samples = sqlx::query_as::<_, WindowSample>(
            r"
            SELECT (status = 'delivered') AS succeeded, response_time_ms
            FROM deliveries
            WHERE endpoint_id = $1
            ORDER BY attempted_at DESC, attempt_number DESC
            LIMIT $2
            ",
        )
        .bind(endpoint_id.0)
        .bind(limit)
        .fetch_all(&mut **tx)
        .await?;

        Ok(samples)
    }

    /// Whether some other event with the same provider id was already
    /// delivered on this integration.
    ///
    /// The replay engine's dedup check: a hit means the destination has
    /// already seen this provider event through another path.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn delivered_for_provider_event(
        &self,
        integration_id: IntegrationId,
        provider_event_id: &str,
        exclude_event: EventId,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r"
            SELECT EXISTS(
                SELECT 1
                FROM deliveries d
                JOIN webhook_events e ON e.id = d.event_id
                WHERE e.integration_id = $1
                  AND e.provider_event_id = $2
                  AND e.id <> $3
                  AND d.status = 'delivered'
            )
            ",
        )
        .bind(integration_id.0)
        .bind(provider_event_id)
        .bind(exclude_event.0)
        .fetch_one(&*self.pool)
        .await?;

        Ok(exists)
    }

    /// Counts attempts recorded for an event.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn count_by_event(&self, event_id: EventId) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM deliveries WHERE event_id = $1")
                .bind(event_id.0)
                .fetch_one(&*self.pool)
                .await?;

        Ok(count.0)
    }
}

//! Repository for the per-endpoint replay queue.
//!
//! Position allocation is `MAX(position) + 1` and must run while the
//! caller holds the endpoint row lock, so concurrent enqueues serialize
//! and positions stay unique and monotonic per endpoint.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    error::Result,
    models::{EndpointId, EventId, ReplayQueueItem, ReplayStatus},
};

/// Repository for replay queue database operations.
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

    /// Next free position for an endpoint.
    ///
    /// Only meaningful while the caller holds the endpoint row lock in the
    /// same transaction.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn next_position_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        endpoint_id: EndpointId,
    ) -> Result<i64> {
        let position: i64 = sqlx::query_scalar(
            r"
            SELECT COALESCE(MAX(position), 0) + 1
            FROM replay_queue
            WHERE endpoint_id = $1
            ",
        )
        .bind(endpoint_id.0)
        .fetch_one(&mut **tx)
        .await?;

        Ok(position)
    }

    /// Enqueues an event at the next position for an endpoint.
    ///
    /// Must run in a transaction that already holds the endpoint row lock.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails.
    pub async fn enqueue_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        endpoint_id: EndpointId,
        event_id: EventId,
        correlation_key: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        let position = self.next_position_in_tx(tx, endpoint_id).await?;

        sqlx::query(
            r"
            INSERT INTO replay_queue (
                id, endpoint_id, event_id, position, correlation_key,
                status, attempts, created_at
            ) VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6)
            ",
        )
        .bind(Uuid::new_v4())
        .bind(endpoint_id.0)
        .bind(event_id.0)
        .bind(position)
        .bind(correlation_key)
        .bind(created_at)
        .execute(&mut **tx)
        .await?;

        Ok(position)
    }

    /// Pending items for an endpoint in strict position order.
    ///
    /// The replay engine's batch read; the ordering guarantee of the whole
    /// replay pipeline rests on this `ORDER BY position ASC`.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn pending_batch(
        &self,
        endpoint_id: EndpointId,
        limit: i64,
    ) -> Result<Vec<ReplayQueueItem>> {
        let items = sqlx::query_as::<_, ReplayQueueItem>(
            r"
            SELECT id, endpoint_id, event_id, position, correlation_key,
                   status, attempts, created_at, delivered_at
            FROM replay_queue
            WHERE endpoint_id = $1 AND status = 'pending'
            ORDER BY position ASC
            LIMIT $2
            ",
        )
        .bind(endpoint_id.0)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(items)
    }

    /// Claims an item for a replay send: `delivering`, attempts + 1.
    ///
    /// Returns the incremented attempt count.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_delivering(&self, item_id: Uuid) -> Result<i32> {
        let attempts: i32 = sqlx::query_scalar(
            r"
            UPDATE replay_queue
            SET status = 'delivering', attempts = attempts + 1
            WHERE id = $1
            RETURNING attempts
            ",
        )
        .bind(item_id)
        .fetch_one(&*self.pool)
        .await?;

        Ok(attempts)
    }

    /// Marks an item delivered.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_delivered(&self, item_id: Uuid, delivered_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r"
            UPDATE replay_queue
            SET status = 'delivered', delivered_at = $2
            WHERE id = $1
            ",
        )
        .bind(item_id)
        .bind(delivered_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Marks an item skipped after exhausting its attempt budget.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_skipped(&self, item_id: Uuid) -> Result<()> {
        self.set_status(item_id, ReplayStatus::Skipped).await
    }

    /// Marks an item terminally failed.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_failed(&self, item_id: Uuid) -> Result<()> {
        self.set_status(item_id, ReplayStatus::Failed).await
    }

    /// Returns an item to `pending` after a failed replay send.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn return_to_pending(&self, item_id: Uuid) -> Result<()> {
        self.set_status(item_id, ReplayStatus::Pending).await
    }

    async fn set_status(&self, item_id: Uuid, status: ReplayStatus) -> Result<()> {
        sqlx::query("UPDATE replay_queue SET status = $2 WHERE id = $1")
            .bind(item_id)
            .bind(status)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    /// Counts pending items for an endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn count_pending(&self, endpoint_id: EndpointId) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM replay_queue WHERE endpoint_id = $1 AND status = 'pending'",
        )
        .bind(endpoint_id.0)
        .fetch_one(&*self.pool)
        .await?;

        Ok(count.0)
    }

    /// All items for an endpoint in position order, any status.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_endpoint(&self, endpoint_id: EndpointId) -> Result<Vec<ReplayQueueItem>> {
        let items = sqlx::query_as::<_, ReplayQueueItem>(
            r"
            SELECT id, endpoint_id, event_id, position, correlation_key,
                   status, attempts, created_at, delivered_at
            FROM replay_queue
            WHERE endpoint_id = $1
            ORDER BY position ASC
            ",
        )
        .bind(endpoint_id.0)
        .fetch_all(&*self.pool)
        .await?;

        Ok(items)
    }
}

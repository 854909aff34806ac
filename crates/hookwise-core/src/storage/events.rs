//! Repository for webhook event database operations.
//!
//! Events are append-only: the ingestion path inserts and nothing ever
//! mutates. Delivery progress lives in the deliveries table.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres, Transaction};

use crate::{
    error::Result,
    models::{EventId, IntegrationId, WebhookEvent},
};

/// An accepted event that never produced a delivery attempt.
///
/// The orphan sweeper re-emits `webhook/received` for these.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrphanedEvent {
    /// Event awaiting redelivery.
    pub id: EventId,
    /// Integration the event belongs to.
    pub integration_id: IntegrationId,
    /// Current destination URL of the integration.
    pub destination_url: String,
}

/// Repository for webhook event database operations.
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

    /// Creates a new event.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails or constraints are violated.
    pub async fn create(&self, event: &WebhookEvent) -> Result<EventId> {
        self.create_impl(&*self.pool, event).await
    }

    /// Creates an event within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &WebhookEvent,
    ) -> Result<EventId> {
        self.create_impl(&mut **tx, event).await
    }

    /// Private helper for creating events with generic executor.
    async fn create_impl<'e, E>(&self, executor: E, event: &WebhookEvent) -> Result<EventId>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let id = sqlx::query_scalar(
            r"
            INSERT INTO webhook_events (
                id, integration_id, event_type, payload, headers,
                received_at, signature_valid, provider_event_id, source
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9
            )
            RETURNING id
            ",
        )
        .bind(event.id.0)
        .bind(event.integration_id.0)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(&event.headers)
        .bind(event.received_at)
        .bind(event.signature_valid)
        .bind(&event.provider_event_id)
        .bind(event.source)
        .fetch_one(executor)
        .await?;

        Ok(EventId(id))
    }

    /// Finds an event by ID.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, event_id: EventId) -> Result<Option<WebhookEvent>> {
        let event = sqlx::query_as::<_, WebhookEvent>(
            r"
            SELECT id, integration_id, event_type, payload, headers,
                   received_at, signature_valid, provider_event_id, source
            FROM webhook_events
            WHERE id = $1
            ",
        )
        .bind(event_id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(event)
    }

    /// Finds all events for an integration, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_integration(
        &self,
        integration_id: IntegrationId,
        limit: Option<i64>,
    ) -> Result<Vec<WebhookEvent>> {
        let events = sqlx::query_as::<_, WebhookEvent>(
            r"
            SELECT id, integration_id, event_type, payload, headers,
                   received_at, signature_valid, provider_event_id, source
            FROM webhook_events
            WHERE integration_id = $1
            ORDER BY received_at DESC
            LIMIT $2
            ",
        )
        .bind(integration_id.0)
        .bind(limit.unwrap_or(100))
        .fetch_all(&*self.pool)
        .await?;

        Ok(events)
    }

    /// Provider-supplied event ids seen for an integration since a cutoff.
    ///
    /// Reconciliation compares this set against the provider API listing to
    /// detect gaps.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn provider_event_ids_since(
        &self,
        integration_id: IntegrationId,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r"
            SELECT provider_event_id
            FROM webhook_events
            WHERE integration_id = $1
              AND received_at >= $2
              AND provider_event_id IS NOT NULL
            ",
        )
        .bind(integration_id.0)
        .bind(since)
        .fetch_all(&*self.pool)
        .await?;

        Ok(ids)
    }

    /// Whether any event with this provider id exists for the integration.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn provider_event_exists(
        &self,
        integration_id: IntegrationId,
        provider_event_id: &str,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r"
            SELECT EXISTS(
                SELECT 1 FROM webhook_events
                WHERE integration_id = $1 AND provider_event_id = $2
            )
            ",
        )
        .bind(integration_id.0)
        .bind(provider_event_id)
        .fetch_one(&*self.pool)
        .await?;

        Ok(exists)
    }

    /// Finds accepted events that never produced a delivery attempt.
    ///
    /// Excludes events parked in the replay queue (they are not lost, the
    /// replay engine owns them) and events of non-active integrations.
    /// Oldest first so a backlog drains fairly.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_orphaned(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OrphanedEvent>> {
        let orphans = sqlx::query_as::<_, OrphanedEvent>(
            r"
            SELECT e.id, e.integration_id, i.destination_url
            FROM webhook_events e
            JOIN integrations i ON i.id = e.integration_id
            WHERE e.received_at < $1
              AND i.status = 'active'
              AND NOT EXISTS (
                  SELECT 1 FROM deliveries d WHERE d.event_id = e.id
              )
              AND NOT EXISTS (
                  SELECT 1 FROM replay_queue r WHERE r.event_id = e.id
              )
            ORDER BY e.received_at ASC
            LIMIT $2
            ",
        )
        .bind(older_than)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(orphans)
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

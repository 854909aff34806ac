//! Repository for reconciliation run audit records.

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{IntegrationId, ReconciliationRun},
};

/// Repository for reconciliation run database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Records a completed pull cycle. A row is written whether or not gaps
    /// were found.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails.
    pub async fn create(&self, run: &ReconciliationRun) -> Result<Uuid> {
        let id = sqlx::query_scalar(
            r"
            INSERT INTO reconciliation_runs (
                id, integration_id, provider_events_found, local_events_found,
                gaps_detected, gaps_resolved, ran_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            ",
        )
        .bind(run.id)
        .bind(run.integration_id.0)
        .bind(run.provider_events_found)
        .bind(run.local_events_found)
        .bind(run.gaps_detected)
        .bind(run.gaps_resolved)
        .bind(run.ran_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(id)
    }

    /// Finds runs for an integration, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_integration(
        &self,
        integration_id: IntegrationId,
        limit: Option<i64>,
    ) -> Result<Vec<ReconciliationRun>> {
        let runs = sqlx::query_as::<_, ReconciliationRun>(
            r"
            SELECT id, integration_id, provider_events_found, local_events_found,
                   gaps_detected, gaps_resolved, ran_at
            FROM reconciliation_runs
            WHERE integration_id = $1
            ORDER BY ran_at DESC
            LIMIT $2
            ",
        )
        .bind(integration_id.0)
        .bind(limit.unwrap_or(100))
        .fetch_all(&*self.pool)
        .await?;

        Ok(runs)
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

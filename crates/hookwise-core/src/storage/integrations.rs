//! Repository for integration database operations.
//!
//! An integration is the producer-side configuration: provider, signing
//! secret, destination URL, and lifecycle status. Everything downstream
//! references it.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{Integration, IntegrationId, IntegrationStatus},
};

/// Repository for integration database operations.
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

    /// Creates a new integration.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails or constraints are violated.
    pub async fn create(&self, integration: &Integration) -> Result<IntegrationId> {
        let id = sqlx::query_scalar(
            r"
            INSERT INTO integrations (
                id, owner_id, name, provider, signing_secret, destination_url,
                status, reconciliation_credential, forward_invalid_signature,
                created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11
            )
            RETURNING id
            ",
        )
        .bind(integration.id.0)
        .bind(integration.owner_id)
        .bind(&integration.name)
        .bind(integration.provider)
        .bind(&integration.signing_secret)
        .bind(&integration.destination_url)
        .bind(integration.status)
        .bind(&integration.reconciliation_credential)
        .bind(integration.forward_invalid_signature)
        .bind(integration.created_at)
        .bind(integration.updated_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(IntegrationId(id))
    }

    /// Finds an integration by ID.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, integration_id: IntegrationId) -> Result<Option<Integration>> {
        let integration = sqlx::query_as::<_, Integration>(
            r"
            SELECT id, owner_id, name, provider, signing_secret, destination_url,
                   status, reconciliation_credential, forward_invalid_signature,
                   created_at, updated_at
            FROM integrations
            WHERE id = $1
            ",
        )
        .bind(integration_id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(integration)
    }

    /// Finds active integrations with a reconciliation credential set.
    ///
    /// These are the integrations the reconciliation job pulls provider
    /// APIs for.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_reconcilable(&self) -> Result<Vec<Integration>> {
        let integrations = sqlx::query_as::<_, Integration>(
            r"
            SELECT id, owner_id, name, provider, signing_secret, destination_url,
                   status, reconciliation_credential, forward_invalid_signature,
                   created_at, updated_at
            FROM integrations
            WHERE status = 'active' AND reconciliation_credential IS NOT NULL
            ORDER BY created_at ASC
            ",
        )
        .fetch_all(&*self.pool)
        .await?;

        Ok(integrations)
    }

    /// Updates the lifecycle status of an integration.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn set_status(
        &self,
        integration_id: IntegrationId,
        status: IntegrationStatus,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE integrations
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(integration_id.0)
        .bind(status)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }
}

//! Schema bootstrap for the HookWise tables.
//!
//! Applied at service startup and by the test environment. Statements are
//! idempotent so repeated application is safe.

use sqlx::PgPool;

use crate::error::Result;

/// Creates all tables and indexes if they do not exist yet.
///
/// # Errors
///
/// Returns error if any DDL statement fails.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS integrations (
            id UUID PRIMARY KEY,
            owner_id UUID NOT NULL,
            name TEXT NOT NULL,
            provider TEXT NOT NULL,
            signing_secret TEXT NOT NULL,
            destination_url TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            reconciliation_credential TEXT,
            forward_invalid_signature BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS endpoints (
            id UUID PRIMARY KEY,
            integration_id UUID NOT NULL UNIQUE REFERENCES integrations(id),
            circuit_state TEXT NOT NULL DEFAULT 'closed',
            success_rate DOUBLE PRECISION NOT NULL DEFAULT 100.0,
            avg_response_ms DOUBLE PRECISION NOT NULL DEFAULT 0.0,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            consecutive_successes INTEGER NOT NULL DEFAULT 0,
            consecutive_health_check_successes INTEGER NOT NULL DEFAULT 0,
            last_health_check_at TIMESTAMPTZ,
            state_changed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS webhook_events (
            id UUID PRIMARY KEY,
            integration_id UUID NOT NULL REFERENCES integrations(id),
            event_type TEXT NOT NULL,
            payload JSONB NOT NULL,
            headers JSONB NOT NULL,
            received_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            signature_valid BOOLEAN NOT NULL,
            provider_event_id TEXT,
            source TEXT NOT NULL DEFAULT 'webhook'
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS deliveries (
            id UUID PRIMARY KEY,
            event_id UUID NOT NULL REFERENCES webhook_events(id),
            endpoint_id UUID REFERENCES endpoints(id),
            status TEXT NOT NULL,
            status_code INTEGER,
            response_time_ms INTEGER,
            response_body TEXT,
            error_type TEXT,
            attempt_number INTEGER NOT NULL,
            attempted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            next_retry_at TIMESTAMPTZ,
            UNIQUE(event_id, attempt_number)
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS replay_queue (
            id UUID PRIMARY KEY,
            endpoint_id UUID NOT NULL REFERENCES endpoints(id),
            event_id UUID NOT NULL REFERENCES webhook_events(id),
            position BIGINT NOT NULL,
            correlation_key TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            delivered_at TIMESTAMPTZ,
            UNIQUE(endpoint_id, position)
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS reconciliation_runs (
            id UUID PRIMARY KEY,
            integration_id UUID NOT NULL REFERENCES integrations(id),
            provider_events_found INTEGER NOT NULL DEFAULT 0,
            local_events_found INTEGER NOT NULL DEFAULT 0,
            gaps_detected INTEGER NOT NULL DEFAULT 0,
            gaps_resolved INTEGER NOT NULL DEFAULT 0,
            ran_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_deliveries_endpoint_window
        ON deliveries(endpoint_id, attempted_at DESC)
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_webhook_events_provider_id
        ON webhook_events(integration_id, provider_event_id)
        WHERE provider_event_id IS NOT NULL
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_replay_queue_pending
        ON replay_queue(endpoint_id, position)
        WHERE status = 'pending'
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_webhook_events_received
        ON webhook_events(integration_id, received_at DESC)
        ",
    )
    .execute(pool)
    .await?;

    Ok(())
}

//! HookWise webhook intermediation service.
//!
//! Main entry point: initializes tracing, loads configuration, prepares
//! the database, and coordinates the HTTP server, the task dispatcher,
//! and the background jobs (health prober, orphan sweeper, reconciler)
//! through one cancellation token for graceful shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use hookwise_api::Config;
use hookwise_core::{storage::Storage, Clock, InProcessQueue, RealClock, TaskQueue};
use hookwise_delivery::{
    CircuitBreaker, DeliveryClient, DeliveryWorker, HealthProber, OrphanSweeper, ReplayEngine,
    TaskDispatcher,
};
use hookwise_reconcile::{ReconcileConfig, Reconciler};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting HookWise webhook intermediation service");

    let config = Config::load()?;
    let addr = config.parse_server_addr()?;
    info!(
        database_url = %config.database_url_masked(),
        addr = %addr,
        public_url = %config.public_url,
        "configuration loaded"
    );

    let pool = create_database_pool(&config).await?;
    info!("database connection pool established");

    hookwise_core::storage::schema::ensure_schema(&pool).await?;
    info!("database schema ready");

    let storage = Storage::new(pool.clone());
    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let cancellation_token = CancellationToken::new();

    let (queue, receiver) = InProcessQueue::new();
    let queue: Arc<dyn TaskQueue> = Arc::new(queue);

    let client = Arc::new(DeliveryClient::new(&config.to_client_config())?);
    let breaker = Arc::new(CircuitBreaker::new(
        storage.clone(),
        config.to_circuit_config(),
        clock.clone(),
    ));
    let worker = Arc::new(DeliveryWorker::new(
        storage.clone(),
        client.clone(),
        breaker.clone(),
        queue.clone(),
        clock.clone(),
        config.to_worker_config(),
    ));
    let replay = Arc::new(ReplayEngine::new(
        storage.clone(),
        client.clone(),
        breaker.clone(),
        clock.clone(),
        config.to_replay_config(),
    ));

    let dispatcher = TaskDispatcher::new(
        receiver,
        worker,
        replay,
        cancellation_token.clone(),
        config.to_dispatcher_config(),
    );
    let dispatcher_handle = tokio::spawn(dispatcher.run());

    let prober = HealthProber::new(
        storage.clone(),
        client.clone(),
        breaker.clone(),
        queue.clone(),
        clock.clone(),
        config.to_prober_config(),
    );
    let prober_token = cancellation_token.clone();
    let prober_handle = tokio::spawn(async move { prober.run(prober_token).await });

    let sweeper = OrphanSweeper::new(
        storage.clone(),
        queue.clone(),
        clock.clone(),
        config.to_sweeper_config(),
    );
    let sweeper_token = cancellation_token.clone();
    let sweeper_handle = tokio::spawn(async move { sweeper.run(sweeper_token).await });

    let reconciler = Reconciler::new(
        storage.clone(),
        queue.clone(),
        clock.clone(),
        ReconcileConfig {
            interval: Duration::from_secs(config.reconcile_interval_seconds),
            window: Duration::from_secs(config.reconcile_window_seconds),
            stripe_api_base: config.stripe_api_base.clone(),
            shopify_api_base: config.shopify_api_base.clone(),
        },
    );
    let reconciler_token = cancellation_token.clone();
    let reconciler_handle = tokio::spawn(async move { reconciler.run(reconciler_token).await });

    let server_handle = tokio::spawn({
        let storage = Arc::new(storage);
        let queue = queue.clone();
        let clock = clock.clone();
        let config = config.clone();
        async move {
            if let Err(e) =
                hookwise_api::start_server(storage, queue, clock, &config, addr).await
            {
                error!(error = %e, "HTTP server failed");
            }
        }
    });

    info!(addr = %addr, "HookWise is ready to receive webhooks");

    server_handle.await.ok();
    info!("server stopped, shutting down background jobs");

    cancellation_token.cancel();
    let shutdown = async {
        let _ = tokio::join!(dispatcher_handle, prober_handle, sweeper_handle, reconciler_handle);
    };
    if tokio::time::timeout(Duration::from_secs(30), shutdown).await.is_err() {
        error!("background jobs did not stop within the grace period");
    }

    pool.close().await;
    info!("HookWise shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,hookwise=debug,tower_http=debug"))
        .expect("invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with startup retries.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("failed to verify database connection")?;
                return Ok(pool);
            },
            Err(_) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to create database connection pool after retries");
            },
        }
    }
}

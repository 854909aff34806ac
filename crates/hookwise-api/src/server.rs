//! HTTP server configuration and request routing.
//!
//! Axum server with request-id injection, tracing, timeout enforcement,
//! and graceful shutdown on SIGTERM/CTRL+C.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use hookwise_core::{storage::Storage, Clock, TaskQueue};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::{config::Config, handlers, AppState};

/// Creates the router with all routes and middleware.
pub fn create_router(
    storage: Arc<Storage>,
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Clock>,
    config: &Config,
) -> Router {
    let app_state = AppState { storage, queue, clock };

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        .route("/ingest/{integration_id}", post(handlers::ingest_webhook))
        .with_state(app_state)
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout)))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
}

/// Middleware that stamps an `X-Request-Id` header on every response.
async fn inject_request_id(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let mut req = req;
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

/// Starts the HTTP server with graceful shutdown support.
///
/// # Errors
///
/// Returns an error if the bind address is unavailable.
pub async fn start_server(
    storage: Arc<Storage>,
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Clock>,
    config: &Config,
    addr: SocketAddr,
) -> Result<(), std::io::Error> {
    let app = create_router(storage, queue, clock, config);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Waits for CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received CTRL+C, starting graceful shutdown"),
        () = terminate => info!("received SIGTERM, starting graceful shutdown"),
    }
}

/// Test helper: router with default config over the given dependencies.
pub fn create_test_router(
    storage: Arc<Storage>,
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Clock>,
) -> Router {
    create_router(storage, queue, clock, &Config::default())
}

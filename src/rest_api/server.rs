//! Axum HTTP server for the REST API

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::ControllerState;
use crate::{Error, Result};

use super::handlers;

/// Metrics endpoint handler
#[cfg(feature = "metrics")]
async fn metrics_handler() -> std::result::Result<String, axum::http::StatusCode> {
    use prometheus_client::encoding::text::encode;
    let mut buffer = String::new();
    encode(&mut buffer, &crate::controller::metrics::REGISTRY)
        .map_err(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(buffer)
}

/// All routes, bound to `state`
pub fn router(state: Arc<ControllerState>) -> Router {
    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/subscribers", post(handlers::provision))
        .route(
            "/api/v1/subscribers/{id}",
            get(handlers::get_subscriber).delete(handlers::deprovision),
        )
        .route(
            "/api/v1/subscribers/{id}/package",
            post(handlers::change_package),
        )
        .route(
            "/api/v1/subscribers/{id}/disconnect",
            post(handlers::disconnect),
        )
        .route("/api/v1/subscribers/{id}/connect", post(handlers::connect))
        .route("/api/v1/subscribers/{id}/renew", post(handlers::renew))
        .route("/api/v1/subscribers/{id}/sync", post(handlers::request_sync))
        .route(
            "/api/v1/tenants/{tenant}/sweeps/{kind}",
            post(handlers::trigger_sweep),
        )
        .route(
            "/api/v1/routers/{router}/interfaces/{interface}/traffic",
            get(handlers::interface_traffic),
        );

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(metrics_handler));

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Run the REST API server until `shutdown` flips
pub async fn run_server(
    state: Arc<ControllerState>,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;
    info!("REST API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;

    info!("REST API server stopped");
    Ok(())
}

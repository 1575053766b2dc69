//! # HTTP Server Module
//!
//! Builds the axum router for the tracking API and runs it until a shutdown
//! signal arrives. Requests are traced with `TraceLayer`.
//!
//! There is no request-level timeout: a lookup always runs to completion so
//! its result gets cached, and the only deadlines are the per-call timeouts
//! of the vendor and spreadsheet clients.

use super::handlers::{
    cache_stats_handler, health_handler, invalidate_handler, tracking_handler, AppState,
};
use crate::core::config::ServerConfig;
use crate::core::error::{TrackingError, TrackingResult};
use axum::routing::{delete, get};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/bol/tracking", get(tracking_handler))
        .route("/api/v1/bol/tracking/cache/:code", delete(invalidate_handler))
        .route("/api/v1/cache/stats", get(cache_stats_handler))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// The HTTP server for the tracking API
pub struct TrackingServer {
    router: Router,
    bind_addr: SocketAddr,
}

impl TrackingServer {
    pub fn new(state: AppState, config: &ServerConfig) -> TrackingResult<Self> {
        let bind_addr = format!("{}:{}", config.bind_address, config.http_port)
            .parse()
            .map_err(|e| {
                TrackingError::config(format!(
                    "Invalid bind address {}:{}: {}",
                    config.bind_address, config.http_port, e
                ))
            })?;

        Ok(Self {
            router: build_router(state),
            bind_addr,
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests
    pub async fn serve<F>(self, shutdown: F) -> TrackingResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.bind_addr).await.map_err(|e| {
            TrackingError::internal(format!("Failed to bind server to {}: {}", self.bind_addr, e))
        })?;

        info!("Tracking HTTP server listening on {}", self.bind_addr);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| TrackingError::internal(format!("Server error: {}", e)))
    }
}

/// Resolves on SIGINT, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

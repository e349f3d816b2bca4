//! Dashboard: Axum web server for the scan results.
//!
//! Serves a read-mostly REST API over the scan snapshot, the market state
//! and the dismiss list. CORS enabled for local development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

pub use routes::{AppState, DashboardState};

/// Bind the dashboard port and serve in a background task until `shutdown`
/// fires. Binding errors are returned to the caller.
pub async fn spawn_dashboard(
    state: AppState,
    port: u16,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard port {port}"))?;
    info!(port, "Dashboard server starting on http://localhost:{port}");

    Ok(tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = served {
            error!(error = %e, "Dashboard server error");
        }
    }))
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/v1/system/status", get(routes::get_status))
        .route("/api/v1/breakouts", get(routes::get_breakouts))
        .route("/api/v1/scan/summary", get(routes::get_summary))
        .route("/api/v1/dismiss", post(routes::dismiss))
        .route("/api/v1/restore", post(routes::restore))
        .route("/api/v1/dismissed", get(routes::get_dismissed))
        .route("/api/v1/history/:symbol", get(routes::get_history))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

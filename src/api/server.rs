use axum::{
    routing::{get, patch, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    check_profile, health_check, list_profiles, profile_alerts, profile_growth, profile_history,
    profile_status, source_health, stats, update_alert, AppState,
};
use crate::service::MonitorService;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health checks
        .route("/health", get(health_check))
        .route("/source/health", get(source_health))
        // Reporting
        .route("/profiles", get(list_profiles))
        .route("/profiles/:key/status", get(profile_status))
        .route("/profiles/:key/history", get(profile_history))
        .route("/profiles/:key/alerts", get(profile_alerts))
        .route("/profiles/:key/growth", get(profile_growth))
        // Manual trigger
        .route("/profiles/:key/check", post(check_profile))
        // Alert management
        .route("/alerts/:id", patch(update_alert))
        // Stats
        .route("/stats", get(stats))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve the reporting API and start monitoring; on Ctrl+C stop accepting
/// requests, then let in-flight checks finish.
pub async fn run_server(
    config: ServerConfig,
    service: Arc<MonitorService>,
) -> Result<(), Box<dyn std::error::Error>> {
    service.start()?;

    let state = Arc::new(AppState {
        service: Arc::clone(&service),
    });
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting socialpulse server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.shutdown().await;
    tracing::info!("socialpulse server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received, stopping monitoring...");
}

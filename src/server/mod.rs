/// API server for cidgate.
///
/// A thin routing layer over the registry, orchestrator, and prober; the
/// dashboard and CLI consume this surface. Handlers never block on a
/// transfer: submissions return a job id and callers poll for the outcome.
pub mod routes;

use std::sync::Arc;

use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::orchestrator::TransferOrchestrator;
use crate::prober::StatusProber;
use crate::registry::BackendRegistry;

/// Shared application state available to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<BackendRegistry>,
    pub orchestrator: Arc<TransferOrchestrator>,
    pub prober: Arc<StatusProber>,
    pub config: GatewayConfig,
}

/// Build the Axum application with all routes and middleware.
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health_routes())
        .merge(routes::config_routes())
        .merge(routes::transfer_routes())
        .with_state(Arc::new(state))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Start the API server.
pub async fn serve(state: AppState, addr: &str) -> crate::error::Result<()> {
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(GatewayError::Io)?;

    tracing::info!("cidgate API server listening on {addr}");

    axum::serve(listener, app).await.map_err(GatewayError::Io)?;

    Ok(())
}

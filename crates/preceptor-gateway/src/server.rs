//! Axum-based HTTP server.

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::routes;
use crate::state::GatewayState;

/// Start the gateway HTTP server. Runs until ctrl-c.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state.config.gateway_bind();
    let app = router(state);

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Build the router over shared state.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route(
            "/api/voice/sessions",
            post(routes::start_session).get(routes::list_sessions),
        )
        .route(
            "/api/voice/sessions/{session_id}/audio",
            post(routes::audio_turn),
        )
        .route(
            "/api/voice/sessions/{session_id}/text",
            post(routes::text_turn),
        )
        .route(
            "/api/voice/sessions/{session_id}",
            delete(routes::end_session),
        )
        .route("/api/rtc/token", post(routes::issue_token))
        .route("/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");
}

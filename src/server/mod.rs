//! HTTP API over the chat service.

pub mod error;
pub mod middleware;
pub mod routes;

use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::app::AppState;
use crate::error::Result;

pub use error::ApiError;

pub fn build_router(state: Arc<AppState>) -> Router {
    let rate_limited = axum::middleware::from_fn_with_state(state.clone(), middleware::rate_limit_middleware);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/providers/health", get(routes::providers_health))
        .route("/api/stats", get(routes::stats))
        .route(
            "/api/conversations",
            get(routes::list_conversations).post(routes::create_conversation),
        )
        .route(
            "/api/conversations/{id}",
            get(routes::get_conversation)
                .patch(routes::rename_conversation)
                .delete(routes::delete_conversation),
        )
        .route(
            "/api/conversations/{id}/messages",
            post(routes::send_message).route_layer(rate_limited),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves until Ctrl-C or SIGTERM.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> Result<()> {
    let sweeper = state.start_background_tasks();
    let app = build_router(state.clone());

    let listener = TcpListener::bind(addr).await?;
    info!("ChatRelay listening on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    state.database().close().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

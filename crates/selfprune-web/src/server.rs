//! Axum server setup and router construction.

use std::net::SocketAddr;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::api::{self, AppState};

/// Build the `/api/*` router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(api::post_chat))
        .route("/api/tokens", get(api::get_tokens).post(api::post_tokens))
        .route("/api/usage", get(api::get_usage))
        .route("/api/usage/reset", post(api::post_usage_reset))
        .route("/api/archive", get(api::get_archive).delete(api::delete_archive))
        .route("/api/archive/{id}/restore", post(api::post_restore))
        .route("/api/config", get(api::get_config).patch(api::patch_config))
        .route("/api/pruned", get(api::get_pruned).delete(api::delete_pruned))
        .route(
            "/api/suggestions",
            get(api::get_suggestions).delete(api::delete_suggestions),
        )
        .route("/api/suggestions/approve", post(api::post_approve))
        .with_state(state)
        .layer(cors)
}

/// Bind `bind_addr`, serve `router` on a background task, and return the
/// bound address.
pub async fn start_server(router: Router, bind_addr: SocketAddr) -> std::io::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;
    info!("Listening on http://{addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("Server error: {e}");
        }
    });

    Ok(addr)
}

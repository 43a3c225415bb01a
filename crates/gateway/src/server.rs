use std::{net::SocketAddr, sync::Arc};

use {
    anyhow::{Context, Result},
    axum::{
        Router,
        routing::{get, post},
    },
    tower_http::cors::{Any, CorsLayer},
    tracing::info,
};

use crate::{routes, state::GatewayState};

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        .route("/tools/list", get(routes::tools_list))
        .route("/exec/run", post(routes::exec_run))
        .route("/process/start", post(routes::process_start))
        .route("/process/status", post(routes::process_status))
        .route("/process/kill", post(routes::process_kill))
        .route("/process/read", post(routes::process_read))
        .route("/process/list", post(routes::process_list))
        .route("/fs/read", post(routes::fs_read))
        .route("/fs/write", post(routes::fs_write))
        .route("/fs/list", post(routes::fs_list))
        .route("/search/text", post(routes::search_text))
        .route("/archive/pack", post(routes::archive_pack))
        .route("/archive/unpack", post(routes::archive_unpack))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn run_server(state: Arc<GatewayState>, addr: SocketAddr) -> Result<()> {
    let app = build_gateway_app(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        %addr,
        sandbox_root = %state.sandbox_root.display(),
        "gateway listening"
    );
    axum::serve(listener, app)
        .await
        .context("gateway server failed")
}

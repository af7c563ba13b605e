use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::net::TcpListener;

use super::ServerState;
use crate::metrics::MetricsSnapshot;

/// `/ws` for clients, `/status` for a JSON snapshot of the world's counters.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/status", get(status))
        .with_state(state)
}

/// Accept WebSocket clients until `shutdown` resolves or the server fails.
pub async fn run<F>(state: Arc<ServerState>, bind_addr: &str, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;
    tracing::info!("Listening on ws://{}/ws", bind_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| super::connection::handle_socket(socket, state))
}

async fn status(State(state): State<Arc<ServerState>>) -> Json<MetricsSnapshot> {
    Json(state.world.store().snapshot())
}

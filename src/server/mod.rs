//! HTTP surface: `/stream`, `/offer`, `/gamepad` and `/status`.

mod handlers;

use crate::config::GameviewConfig;
use crate::hub::FrameHub;
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

/// State shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub hub: FrameHub,
    pub config: Arc<GameviewConfig>,
}

impl AppState {
    pub fn new(hub: FrameHub, config: GameviewConfig) -> Self {
        Self {
            hub,
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stream", get(handlers::stream))
        .route("/offer", post(handlers::offer))
        .route("/gamepad", get(handlers::gamepad))
        .route("/status", get(handlers::status))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

mod app;
mod serv;

use axum::{routing::get, Router};
use std::sync::Arc;
use tracing::info;

use app::AppState;
use serv::ws_handler::ws_handler;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app_state = Arc::new(AppState::default());
    let app = Router::new()
        .route("/ws/signaling", get(ws_handler))
        .with_state(app_state);

    let addr = std::env::var("SIGNALING_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("signaling relay listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await
}

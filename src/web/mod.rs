pub mod error;
pub mod models;
pub mod routes;
pub mod websocket_handler;

use axum::{http::Method, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::server::engine::Engine;

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn build_router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check_handler))
        .nest("/api/devices", routes::device_routes::device_router())
        .nest("/api", routes::config_routes::config_router())
        .nest("/api", routes::metric_routes::metric_router())
        .nest("/api/events", routes::event_routes::event_router())
        .nest("/api/schedules", routes::schedule_routes::schedule_router())
        .route("/ws", get(websocket_handler::websocket_handler))
        .with_state(engine)
        .layer(cors)
}

pub async fn run_http_server(
    engine: Arc<Engine>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let router = build_router(engine);
    info!("HTTP server listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

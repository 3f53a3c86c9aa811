mod handlers;
mod state;

use axum::http::{header, HeaderValue};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

use crate::pipeline::ReadingPipeline;
use state::AppState;

pub fn build_router(pipeline: ReadingPipeline) -> Router {
    let state = Arc::new(AppState { pipeline });

    Router::new()
        .route("/api/reading", post(handlers::reading))
        .route("/api/resolve", get(handlers::resolve))
        .route("/api/cities", get(handlers::city_list))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start(host: &str, port: u16, pipeline: ReadingPipeline) -> std::io::Result<()> {
    let app = build_router(pipeline);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(%addr, "natal relay listening");
    axum::serve(listener, app).await
}

//! Management plane: cache inspection and flush, stats, prometheus export.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{Local, TimeZone};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::fwd::Forwarder;
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub fwd: Arc<Forwarder>,
    pub metrics: Arc<Metrics>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/fwd/caches", get(fwd_caches_get).delete(fwd_caches_delete))
        .route("/fwd/stats", get(fwd_stats_get))
        .route("/fwd/stats/reset", post(fwd_stats_reset))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

pub async fn serve(bind: SocketAddr, state: AppState) -> crate::error::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("management HTTP server listening on {bind}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render(&state.fwd.stats)
}

/// Dump every cache entry as `{Domain, Type, ExpiredTime}`, expiry rendered
/// in local time.
async fn fwd_caches_get(State(state): State<AppState>) -> impl IntoResponse {
    let rows: Vec<_> = state
        .fwd
        .cache
        .dump()
        .into_iter()
        .map(|view| {
            let expired_time = Local
                .timestamp_opt(view.expires_at as i64, 0)
                .single()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            json!({
                "Domain": view.domain,
                "Type": view.qtype,
                "ExpiredTime": expired_time,
            })
        })
        .collect();
    Json(rows)
}

async fn fwd_caches_delete(State(state): State<AppState>) -> impl IntoResponse {
    state.fwd.cache.delete_all();
    info!("forward cache flushed via management plane");
    (StatusCode::OK, "OK\n")
}

async fn fwd_stats_get(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.fwd.stats.snapshot())
}

async fn fwd_stats_reset(State(state): State<AppState>) -> impl IntoResponse {
    state.fwd.stats.reset();
    (StatusCode::OK, "OK\n")
}

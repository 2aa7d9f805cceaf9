//! Auxiliary, always-reachable endpoints: root banner, health, and info.
//!
//! Grounded on the teacher's `web/handlers/health.rs` shape, trimmed to the
//! subsystems this crate actually has (no database, no plugin manager).

use axum::extract::State;
use axum::response::IntoResponse;
use serde_json::json;

use crate::web::AppState;

pub async fn root() -> impl IntoResponse {
    json_ok(json!({ "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") }))
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let pool_stats = state.proxy_pool.stats().await;
    json_ok(json!({
        "status": "healthy",
        "proxy_pool": {
            "working_count": pool_stats.working_count,
            "total_success": pool_stats.total_success,
            "total_failures": pool_stats.total_failures,
        }
    }))
}

pub async fn info(State(state): State<AppState>) -> impl IntoResponse {
    json_ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "use_proxy": state.config.use_proxy,
        "our_scheme": state.config.our_scheme,
        "our_domain": state.config.our_domain,
        "max_range_size": state.config.max_range_size,
        "stream_chunk_size": state.config.stream_chunk_size,
    }))
}

fn json_ok(value: serde_json::Value) -> impl IntoResponse {
    (axum::http::StatusCode::OK, axum::Json(value))
}

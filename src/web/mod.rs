//! Web server & routing: owns the axum `Router`, CORS, and body-size limits.
//!
//! Grounded on the teacher's `web/mod.rs` (`AppState` + `Router::new()`
//! wiring), trimmed to this crate's actual dependencies.

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{any, get};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::http_client::ClientFactory;
use crate::proxy_pool::SharedProxyPool;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub client_factory: ClientFactory,
    pub proxy_pool: SharedProxyPool,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = state.config.max_request_size;

    Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health_check))
        .route("/info", get(handlers::health::info))
        .route(
            "/{*path}",
            any(handlers::proxy::handle).options(handlers::proxy::options_catch_all),
        )
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

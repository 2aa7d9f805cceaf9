//! End-to-end routing tests against the full axum `Router`, exercising the
//! paths that don't require reaching a live upstream: auxiliary endpoints,
//! the OPTIONS catch-all, and path-decode failures.

use std::sync::Arc;

use axum_test::TestServer;
use serde_json::Value;

use urlcast_proxy::config::Config;
use urlcast_proxy::http_client::ClientFactory;
use urlcast_proxy::proxy_pool::ProxyPool;
use urlcast_proxy::web::{self, AppState};

fn test_server() -> TestServer {
    let state = AppState {
        config: Arc::new(Config::default()),
        client_factory: ClientFactory::new(),
        proxy_pool: Arc::new(ProxyPool::new(false)),
    };
    TestServer::new(web::build_router(state)).unwrap()
}

#[tokio::test]
async fn root_reports_package_name() {
    let server = test_server();
    let response = server.get("/").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["name"], "urlcast-proxy");
}

#[tokio::test]
async fn health_reports_empty_pool_when_proxy_disabled() {
    let server = test_server();
    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["proxy_pool"]["working_count"], 0);
}

#[tokio::test]
async fn info_reports_configured_scheme_and_domain() {
    let server = test_server();
    let response = server.get("/info").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["our_scheme"], "https");
    assert_eq!(body["use_proxy"], false);
}

#[tokio::test]
async fn options_catch_all_returns_no_content_with_cors() {
    let server = test_server();
    let response = server.method(axum::http::Method::OPTIONS, "/enc2/whatever").await;
    response.assert_status(axum::http::StatusCode::NO_CONTENT);
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
}

#[tokio::test]
async fn enc_handler_without_trailing_segments_is_a_bad_request() {
    let server = test_server();
    // "enc" with a payload but no additional URL segments after it.
    let response = server.get("/enc/cGFyYW0vVXNlci1BZ2VudD1jdXJs").await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_base64_payload_is_a_bad_request() {
    let server = test_server();
    let response = server.get("/enc2/!not-base64!").await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

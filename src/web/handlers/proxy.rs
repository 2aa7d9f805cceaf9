//! Top-level request handler: decode path, dispatch, shape the response.
//!
//! Grounded on the original `request_handler.py` (`RequestHandler`).

use std::collections::HashMap;

use axum::body::Body;
use axum::extract::{OriginalUri, RawQuery, State};
use axum::http::{HeaderMap, Method, Response, StatusCode, header};
use axum::response::IntoResponse;
use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::config::defaults::INBOUND_HEADER_ALLOWLIST;
use crate::decode::{self, HandlerKind};
use crate::dispatcher::{self, DispatchOutcome};
use crate::errors::AppError;
use crate::generic::CapturedResponse;
use crate::web::AppState;

pub async fn handle(
    State(state): State<AppState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    if body.len() > state.config.max_request_size {
        return AppError::PayloadTooLarge(body.len(), state.config.max_request_size).into_response();
    }

    let raw_path = uri.path().trim_start_matches('/');
    debug!(
        "inbound headers: {:?}",
        headers.keys().map(|k| k.as_str()).collect::<Vec<_>>()
    );

    let resolved = match decode::resolve(raw_path, query.as_deref()) {
        Ok(r) => r,
        Err(e) => {
            error!("path decode failed: {}", e);
            return e.into_response();
        }
    };

    info!(
        "resolved {:?} request to target {}",
        resolved.decoded_path.handler_kind, resolved.target_url
    );

    let inbound_allowed = filter_inbound_headers(&headers);
    let mut overlay = inbound_allowed;
    overlay.extend(resolved.header_overlay.clone());

    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let body_for_upstream = if body.is_empty() { None } else { Some(&body) };

    let outcome = dispatcher::dispatch(
        &method,
        &resolved.target_url,
        &headers,
        &overlay,
        range_header.as_deref(),
        body_for_upstream,
        &state.config,
        &state.client_factory,
        &state.proxy_pool,
    )
    .await;

    match outcome {
        DispatchOutcome::Stream(response) => response,
        DispatchOutcome::Captured(captured) => {
            shape_response(resolved.decoded_path.handler_kind, captured)
        }
    }
}

fn filter_inbound_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for name in INBOUND_HEADER_ALLOWLIST {
        if let Some(value) = headers.get(*name) {
            if let Ok(v) = value.to_str() {
                out.insert(name.to_string(), v.to_string());
            }
        }
    }
    out
}

fn shape_response(handler_kind: HandlerKind, captured: CapturedResponse) -> Response<Body> {
    let status = StatusCode::from_u16(captured.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if let Some(error) = &captured.error {
        let body = serde_json::json!({ "error": error, "currentUrl": captured.final_url });
        return with_cors(status, axum::Json(body).into_response());
    }

    let content_type = captured
        .headers
        .get("content-type")
        .cloned()
        .unwrap_or_default();
    let is_json_content_type = content_type.contains("application/json");
    let parsed_json: Option<Value> = if is_json_content_type || looks_like_json(&captured.body) {
        serde_json::from_str(&captured.body).ok()
    } else {
        None
    };

    match handler_kind {
        HandlerKind::Enc | HandlerKind::Enc1 | HandlerKind::Enc2 | HandlerKind::Literal => {
            if let Some(value) = parsed_json {
                with_cors(status, axum::Json(value).into_response())
            } else {
                with_cors(status, (status, captured.body).into_response())
            }
        }
        HandlerKind::Enc3 => {
            if let Some(value) = parsed_json {
                let envelope = serde_json::json!({
                    "currentUrl": captured.final_url,
                    "cookie": captured.set_cookies,
                    "headers": captured.headers,
                    "status": captured.status,
                    "body": value,
                });
                with_cors(status, axum::Json(envelope).into_response())
            } else {
                with_cors(status, (status, captured.body).into_response())
            }
        }
    }
}

fn looks_like_json(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
}

fn with_cors(status: StatusCode, mut response: Response<Body>) -> Response<Body> {
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*".parse().unwrap());
    response
}

pub async fn options_catch_all() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::ACCESS_CONTROL_ALLOW_METHODS, "*")
        .header(header::ACCESS_CONTROL_ALLOW_HEADERS, "*")
        .body(Body::empty())
        .unwrap()
}

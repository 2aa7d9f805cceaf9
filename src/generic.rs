//! Generic (non-streaming) request processor.
//!
//! Grounded on the original `request_processor.py` (`RequestProcessor`):
//! one attempt against the target with default headers overlaid under
//! caller-supplied ones, explicit redirect handling (redirects are never
//! followed by the underlying client), and error-to-status mapping.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION};
use tracing::{error, info};

use crate::config::Config;
use crate::decode::normalize_url;
use crate::errors::AppError;
use crate::http_client::{self, ClientFactory, TransportErrorKind};
use crate::proxy_pool::SharedProxyPool;

#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub final_url: String,
    pub set_cookies: Vec<String>,
    pub headers: HashMap<String, String>,
    pub status: u16,
    pub body: String,
    pub error: Option<String>,
}

impl CapturedResponse {
    fn failure(url: &str, status: u16, error: String) -> Self {
        CapturedResponse {
            final_url: url.to_string(),
            set_cookies: Vec::new(),
            headers: HashMap::new(),
            status,
            body: String::new(),
            error: Some(error),
        }
    }
}

const DEFAULT_REQUEST_HEADERS: &[(&str, &str)] = &[
    (
        "Accept",
        "application/json, text/javascript, */*; q=0.01",
    ),
    ("Accept-Language", "en-GB,en-US;q=0.9,en;q=0.8,ru;q=0.7"),
    ("Cache-Control", "no-cache"),
    ("Pragma", "no-cache"),
];

#[allow(clippy::too_many_arguments)]
pub async fn process_request(
    target_url: &str,
    method: &Method,
    body: Option<&Bytes>,
    caller_headers: &HashMap<String, String>,
    config: &Config,
    factory: &ClientFactory,
    proxy_pool: &SharedProxyPool,
) -> CapturedResponse {
    process_request_inner(
        target_url,
        method,
        body,
        caller_headers,
        config,
        factory,
        proxy_pool,
        0,
    )
    .await
}

async fn process_request_inner(
    target_url: &str,
    method: &Method,
    body: Option<&Bytes>,
    caller_headers: &HashMap<String, String>,
    config: &Config,
    factory: &ClientFactory,
    proxy_pool: &SharedProxyPool,
    redirect_count: u32,
) -> CapturedResponse {
    info!("processing {} request to {}", method, target_url);

    let target_url = match normalize_url(target_url) {
        Ok(u) => u,
        Err(e) => return CapturedResponse::failure(target_url, 400, e.to_string()),
    };

    let mut request_headers: HashMap<String, String> = DEFAULT_REQUEST_HEADERS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    request_headers.insert("User-Agent".to_string(), config.user_agent.clone());
    for (k, v) in caller_headers {
        request_headers.insert(k.clone(), v.clone());
    }

    let header_map = match to_header_map(&request_headers) {
        Ok(h) => h,
        Err(e) => return CapturedResponse::failure(&target_url, 500, e),
    };

    let proxy_endpoint = if proxy_pool.available().await {
        proxy_pool.pick().await
    } else {
        None
    };

    let timeout_multiplier = if proxy_endpoint.is_some() { 10.0 } else { 1.0 };
    let overall_timeout = Duration::from_secs_f64(
        config
            .timeout_read
            .max(config.timeout_connect)
            * timeout_multiplier,
    );

    let client = match factory.acquire(
        header_map,
        false,
        false,
        proxy_endpoint.as_deref(),
        overall_timeout,
    ) {
        Ok(c) => c,
        Err(e) => return CapturedResponse::failure(&target_url, 500, e.to_string()),
    };

    let mut request = client.request(method.clone(), &target_url);
    if matches!(method, &Method::POST | &Method::PUT | &Method::DELETE) {
        if let Some(b) = body {
            request = match body_as_form_pairs(b) {
                Some(pairs) => request.form(&pairs),
                None => request.body(b.clone()),
            };
        }
    }

    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            if let Some(p) = &proxy_endpoint {
                proxy_pool.fail(p).await;
            }
            return map_transport_error(&target_url, e);
        }
    };

    let status = response.status();
    info!("response status: {}", status);

    if matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308) {
        if redirect_count >= config.max_redirects {
            let err = AppError::TooManyRedirects(config.max_redirects);
            error!("too many redirects following {}", target_url);
            return CapturedResponse::failure(&target_url, err.status().as_u16(), err.to_string());
        }

        let location = match response.headers().get(LOCATION).and_then(|v| v.to_str().ok()) {
            Some(l) => l.to_string(),
            None => {
                return CapturedResponse::failure(
                    &target_url,
                    500,
                    "redirect response without location header".to_string(),
                );
            }
        };

        let redirect_url = resolve_redirect(&target_url, &location);
        if let Some(p) = &proxy_endpoint {
            proxy_pool.succeed(p).await;
        }

        return Box::pin(process_request_inner(
            &redirect_url,
            method,
            body,
            caller_headers,
            config,
            factory,
            proxy_pool,
            redirect_count + 1,
        ))
        .await;
    }

    if let Some(p) = &proxy_endpoint {
        proxy_pool.succeed(p).await;
    }

    let final_url = response.url().to_string();
    let mut set_cookies = Vec::new();
    let mut headers = HashMap::new();
    for (name, value) in response.headers() {
        let name_lower = name.as_str().to_ascii_lowercase();
        if let Ok(v) = value.to_str() {
            if name_lower == "set-cookie" {
                set_cookies.push(v.to_string());
            }
            headers.insert(name_lower, v.to_string());
        }
    }

    let status_code = status.as_u16();
    let body_text = match response.text().await {
        Ok(t) => t,
        Err(e) => {
            return CapturedResponse::failure(&final_url, 500, format!("failed to read response body: {e}"));
        }
    };

    CapturedResponse {
        final_url,
        set_cookies,
        headers,
        status: status_code,
        body: body_text,
        error: None,
    }
}

/// A JSON-object body is sent form-encoded (key-value mapping); anything
/// else (JSON array/scalar, non-JSON bytes) is sent as raw content.
fn body_as_form_pairs(body: &Bytes) -> Option<Vec<(String, String)>> {
    let serde_json::Value::Object(map) = serde_json::from_slice(body).ok()? else {
        return None;
    };
    Some(
        map.into_iter()
            .map(|(k, v)| (k, json_scalar_to_string(v)))
            .collect(),
    )
}

fn json_scalar_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn resolve_redirect(current_url: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        return location.to_string();
    }
    match url::Url::parse(current_url).and_then(|base| base.join(location)) {
        Ok(joined) => joined.to_string(),
        Err(_) => location.to_string(),
    }
}

fn map_transport_error(target_url: &str, err: reqwest::Error) -> CapturedResponse {
    match http_client::classify_transport_error(&err) {
        TransportErrorKind::Timeout => {
            error!("request timeout: {}", target_url);
            CapturedResponse::failure(target_url, 408, "Request timeout".to_string())
        }
        TransportErrorKind::Connect => {
            error!("request failed: {} - {}", target_url, err);
            CapturedResponse::failure(target_url, 500, format!("Request failed: {err}"))
        }
        TransportErrorKind::Other => {
            error!("unexpected error: {} - {}", target_url, err);
            CapturedResponse::failure(target_url, 500, format!("Unexpected error: {err}"))
        }
    }
}

fn to_header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, String> {
    let mut map = HeaderMap::new();
    for (k, v) in headers {
        let name = HeaderName::from_bytes(k.as_bytes()).map_err(|e| e.to_string())?;
        let value = HeaderValue::from_str(v).map_err(|e| e.to_string())?;
        map.insert(name, value);
    }
    Ok(map)
}

pub fn status_to_app_error(status: u16, error: Option<String>) -> Option<AppError> {
    match status {
        408 => Some(AppError::Timeout),
        500 => Some(AppError::UpstreamTransport(error.unwrap_or_default())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_redirect_joins_relative_path() {
        let resolved = resolve_redirect("https://example.com/a/b", "/c");
        assert_eq!(resolved, "https://example.com/c");
    }

    #[test]
    fn resolve_redirect_keeps_absolute_url() {
        let resolved = resolve_redirect("https://example.com/a", "https://other.com/x");
        assert_eq!(resolved, "https://other.com/x");
    }

    #[test]
    fn status_to_app_error_maps_known_statuses() {
        assert!(matches!(status_to_app_error(408, None), Some(AppError::Timeout)));
        assert!(matches!(
            status_to_app_error(500, Some("x".into())),
            Some(AppError::UpstreamTransport(_))
        ));
        assert!(status_to_app_error(200, None).is_none());
    }

    #[test]
    fn json_object_body_becomes_form_pairs() {
        let body = Bytes::from_static(br#"{"a":"1","b":2}"#);
        let pairs = body_as_form_pairs(&body).unwrap();
        assert!(pairs.contains(&("a".to_string(), "1".to_string())));
        assert!(pairs.contains(&("b".to_string(), "2".to_string())));
    }

    #[test]
    fn non_object_body_is_not_form_encoded() {
        assert!(body_as_form_pairs(&Bytes::from_static(b"raw text")).is_none());
        assert!(body_as_form_pairs(&Bytes::from_static(b"[1,2,3]")).is_none());
    }
}

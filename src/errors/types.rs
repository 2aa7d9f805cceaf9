//! Error type definitions for the proxy.
//!
//! Mirrors the request-handling taxonomy: a small set of client-facing
//! kinds (`BadRequest`, `PayloadTooLarge`, `Timeout`, `UpstreamTransport`,
//! `TooManyRedirects`).

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("payload too large: {0} bytes exceeds limit of {1} bytes")]
    PayloadTooLarge(usize, usize),

    #[error("request timeout")]
    Timeout,

    #[error("request failed: {0}")]
    UpstreamTransport(String),

    #[error("too many redirects (max: {0})")]
    TooManyRedirects(u32),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_, _) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Timeout => StatusCode::REQUEST_TIMEOUT,
            AppError::UpstreamTransport(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::TooManyRedirects(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

//! Centralized error handling for the proxy.
//!
//! One enum per the taxonomy in the error-handling design; every kind
//! converts straight to an HTTP response via `IntoResponse`.

pub mod types;

pub use types::*;

pub type AppResult<T> = Result<T, AppError>;

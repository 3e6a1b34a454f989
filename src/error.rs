use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the admission path and the fetch orchestrator.
///
/// None of these are retried internally. `TemporarilyUnavailable` and
/// `RateLimited` are transient; the caller decides when to try again.
#[derive(Debug, Error)]
pub enum ThrottlerError {
    /// The coordination store could not be reached. Never downgraded to
    /// "no usage", so an unreachable store stops all upstream traffic.
    #[error("coordination store unavailable: {0}")]
    StoreUnavailable(String),

    /// Another caller currently holds the selection lock.
    #[error("endpoint selection is in progress elsewhere, retry shortly")]
    TemporarilyUnavailable,

    /// Every endpoint has used its quota for the trailing window.
    #[error("all endpoints reached their quota, retry in {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("upstream responded with status {status}")]
    UpstreamError { status: u16 },

    #[error("transport failure: {0}")]
    TransportFailure(#[source] reqwest::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ThrottlerResult<T> = Result<T, ThrottlerError>;

impl From<redis::RedisError> for ThrottlerError {
    fn from(err: redis::RedisError) -> Self {
        ThrottlerError::StoreUnavailable(err.to_string())
    }
}

impl ThrottlerError {
    /// Suggested wait before retrying, when the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ThrottlerError::TemporarilyUnavailable => Some(Duration::from_secs(1)),
            ThrottlerError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_error(err: &ThrottlerError) -> Self {
        let message = err.to_string();
        match err {
            ThrottlerError::StoreUnavailable(_) => Self::new("store_unavailable", &message, 503),
            ThrottlerError::TemporarilyUnavailable => {
                Self::new("temporarily_unavailable", &message, 503)
            }
            ThrottlerError::RateLimited { .. } => Self::new("rate_limited", &message, 429),
            ThrottlerError::UpstreamError { .. } => Self::new("upstream_error", &message, 502),
            ThrottlerError::TransportFailure(_) => Self::new("transport_failure", &message, 502),
            ThrottlerError::Configuration(_) => Self::new("configuration_error", &message, 500),
            ThrottlerError::ValidationError(_) => Self::new("validation_error", &message, 422),
            ThrottlerError::Internal(_) => Self::new("internal_error", &message, 500),
        }
    }
}

impl IntoResponse for ThrottlerError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_error(&self);
        let status =
            StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut response = (status, Json(body)).into_response();
        if let Some(wait) = self.retry_after() {
            if let Ok(value) = HeaderValue::from_str(&wait.as_secs().max(1).to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

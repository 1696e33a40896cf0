//! API error handling with structured responses.

use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// API error type with structured responses.
///
/// The history endpoint only ever refuses a caller for exceeding its rate
/// limit; storage problems are reported as "History not found" instead.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Rate limit exceeded: {limit} per {window:?}")]
    TooManyRequests {
        limit: u32,
        window: Duration,
        retry_after: Duration,
    },
}

impl ApiError {
    pub fn too_many_requests(limit: u32, window: Duration, retry_after: Duration) -> Self {
        Self::TooManyRequests {
            limit,
            window,
            retry_after,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::TooManyRequests { .. } => "TOO_MANY_REQUESTS",
        }
    }
}

/// Structured error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.error_code(),
            details: None,
        };

        match &self {
            Self::TooManyRequests { retry_after, .. } => {
                warn!("{}", self);
                // Round up so a client never retries a moment too early.
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                let mut response = (status, Json(body)).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
                response
            }
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

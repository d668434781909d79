use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

// Errors surfaced to API callers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Rate limit exceeded. Retry after {} seconds", retry_after_secs(.retry_after))]
    RateLimitExceeded { retry_after: Duration },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // The detail stays in the logs; callers get a generic message
    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("Service unavailable")]
    Unavailable,
}

// Failures talking to the LLM, the embedding service or the memory store.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request to {service} failed: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} returned an unexpected payload: {detail}")]
    Payload {
        service: &'static str,
        detail: String,
    },

    #[error("memory snapshot {path}: {detail}")]
    Storage { path: String, detail: String },
}

// Startup configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

// Whole seconds, rounded up so clients never retry too early
pub fn retry_after_secs(retry_after: &Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 { secs + 1 } else { secs }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::Upstream(_) => "UPSTREAM_FAILURE",
            ApiError::Unavailable => "SERVICE_UNAVAILABLE",
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Upstream(_) => "An error occurred while processing your request".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        ApiError::Upstream(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Upstream(detail) = &self {
            tracing::error!(detail = %detail, "upstream call failed");
        }

        let retry_after = match &self {
            ApiError::RateLimitExceeded { retry_after } => Some(retry_after_secs(retry_after)),
            _ => None,
        };
        let body = ErrorBody {
            error: self.public_message(),
            code: self.error_code(),
            retry_after,
        };

        let mut response = (self.status_code(), Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

mod chat;
mod health;
mod memory;
mod metrics;
mod root;

pub use chat::chat_handler;
pub use health::health_handler;
pub use memory::{clear_memory_handler, search_memory_handler};
pub use metrics::metrics_handler;
pub use root::root_handler;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::routing::{delete, get, post};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::error::ApiError;
use crate::metrics::{INVALID_INPUT, RATE_LIMITED, REQUEST_TOTAL};
use crate::rate_limit::{ClientKey, Decision, EndpointClass};
use crate::state::AppState;

pub fn router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/chat", post(chat_handler))
        .route("/memory/search", post(search_memory_handler))
        .route("/memory/{user_id}", delete(clear_memory_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .with_state(state)
}

// Gate in front of every API operation
pub(crate) fn enforce_rate_limit(
    state: &AppState,
    client: &ClientKey,
    class: EndpointClass,
) -> Result<(), ApiError> {
    REQUEST_TOTAL.with_label_values(&[class.as_str()]).inc();

    match state.rate_limiter.check(client, class) {
        Decision::Allowed => Ok(()),
        Decision::Rejected { retry_after, window } => {
            RATE_LIMITED.with_label_values(&[class.as_str()]).inc();
            tracing::warn!(
                target: "security",
                client = %client,
                class = class.as_str(),
                window = ?window,
                retry_after_ms = retry_after.as_millis() as u64,
                "rate limit exceeded"
            );
            Err(ApiError::RateLimitExceeded { retry_after })
        }
    }
}

pub(crate) fn invalid_body(rejection: JsonRejection) -> ApiError {
    INVALID_INPUT.inc();
    tracing::warn!(target: "security", reason = %rejection.body_text(), "malformed request body");
    ApiError::InvalidInput("request body is not valid JSON for this endpoint".to_string())
}

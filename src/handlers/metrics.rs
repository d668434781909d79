use axum::extract::State;
use axum::http::StatusCode;
use std::sync::Arc;

use crate::metrics::{TRACKED_CLIENTS, render};
use crate::state::AppState;

// Prometheus scrape endpoint, not rate limited
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Result<String, (StatusCode, String)> {
    TRACKED_CLIENTS.set(state.rate_limiter.tracked_clients() as f64);
    render().map_err(|e| {
        tracing::error!(error = %e, "failed to render metrics");
        (StatusCode::INTERNAL_SERVER_ERROR, "failed to render metrics".to_string())
    })
}

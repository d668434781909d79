use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, TextEncoder, opts, register_counter,
    register_counter_vec, register_gauge, register_histogram,
};

lazy_static! {
    pub static ref REQUEST_TOTAL: CounterVec = register_counter_vec!(
        opts!("gateway_requests_total", "Total number of requests per endpoint class"),
        &["class"]
    )
    .unwrap();
    pub static ref RATE_LIMITED: CounterVec = register_counter_vec!(
        opts!("gateway_rate_limited_total", "Requests rejected by the rate limiter"),
        &["class"]
    )
    .unwrap();
    pub static ref INVALID_INPUT: Counter =
        register_counter!("gateway_invalid_input_total", "Requests rejected by input sanitization").unwrap();
    pub static ref UPSTREAM_FAILURES: Counter =
        register_counter!("gateway_upstream_failures_total", "Failed calls to LLM, embedding or memory services").unwrap();
    pub static ref CHAT_LATENCY: Histogram = register_histogram!(
        "gateway_chat_latency_seconds",
        "End-to-end chat pipeline latency in seconds"
    )
    .unwrap();
    pub static ref TRACKED_CLIENTS: Gauge =
        register_gauge!("gateway_tracked_clients", "Rate limit entries currently held in memory").unwrap();
}

// Render everything registered in the default registry
pub fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| format!("encode failed: {}", e))?;
    String::from_utf8(buffer).map_err(|e| format!("metrics not utf-8: {}", e))
}

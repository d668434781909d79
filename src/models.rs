use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::UpstreamError;
use crate::memory::MemoryHit;

// POST /chat
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ChatRequest {
    pub message: String,
    pub user_id: String,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ChatResponse {
    pub response: String,
    pub user_id: String,
    #[serde(default)]
    pub memory_count: usize,
}

// POST /memory/search
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MemorySearchRequest {
    pub query: String,
    pub user_id: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Serialize, Debug)]
pub struct MemorySearchResponse {
    pub memories: Vec<MemoryHit>,
    pub count: usize,
    pub user_id: String,
}

#[derive(Serialize, Debug)]
pub struct DeleteResponse {
    pub message: String,
}

#[derive(Serialize, Debug)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub timestamp: String,
}

// What the agent produced for one chat turn
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOutcome {
    pub reply: String,
    pub memory_count: usize,
}

// Queued chat turn - holds the sanitized input + response channel
pub struct ChatJob {
    pub user_id: String,
    pub message: String,
    pub response_tx: oneshot::Sender<Result<ChatOutcome, UpstreamError>>,
}

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::memory::MemoryStore;
use crate::models::ChatJob;
use crate::rate_limit::RateLimiter;

// app's shared state
pub struct AppState {
    pub rate_limiter: RateLimiter,
    pub memory: Arc<dyn MemoryStore>,
    pub chat_tx: mpsc::Sender<ChatJob>, // queue into the agent worker
}

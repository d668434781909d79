// Test doubles for the external collaborators

use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::UpstreamError;
use crate::llm::ChatModel;
use crate::memory::{Embedder, MemoryHit, MemoryStore};

// Letter-frequency vectors: texts sharing letters end up close together.
pub struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, UpstreamError> {
        let mut v = vec![0.0; 26];
        for c in text.chars().filter(|c| c.is_ascii_alphabetic()) {
            v[(c.to_ascii_lowercase() as u8 - b'a') as usize] += 1.0;
        }
        Ok(v)
    }
}

// Replies with a fixed text and remembers the prompts it was given.
pub struct ScriptedModel {
    pub reply: String,
    pub seen: Mutex<Vec<(String, String)>>,
}

impl ScriptedModel {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, system: &str, user_message: &str, _max_tokens: u32) -> Result<String, UpstreamError> {
        self.seen
            .lock()
            .unwrap()
            .push((system.to_string(), user_message.to_string()));
        Ok(self.reply.clone())
    }
}

pub struct FailingModel;

#[async_trait]
impl ChatModel for FailingModel {
    async fn complete(&self, _: &str, _: &str, _: u32) -> Result<String, UpstreamError> {
        Err(UpstreamError::Status {
            service: "anthropic",
            status: 401,
            body: "invalid x-api-key".to_string(),
        })
    }
}

pub struct FailingStore;

#[async_trait]
impl MemoryStore for FailingStore {
    async fn search(&self, _: &str, _: &str, _: usize) -> Result<Vec<MemoryHit>, UpstreamError> {
        Err(UpstreamError::Payload {
            service: "ollama",
            detail: "connection refused".to_string(),
        })
    }

    async fn add(&self, _: &str, _: &str, _: &str) -> Result<(), UpstreamError> {
        Err(UpstreamError::Payload {
            service: "ollama",
            detail: "connection refused".to_string(),
        })
    }

    async fn delete_all(&self, _: &str) -> Result<usize, UpstreamError> {
        Err(UpstreamError::Payload {
            service: "ollama",
            detail: "connection refused".to_string(),
        })
    }
}

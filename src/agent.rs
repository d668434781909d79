use std::sync::Arc;

use crate::error::UpstreamError;
use crate::llm::ChatModel;
use crate::memory::{MemoryHit, MemoryStore};
use crate::models::ChatOutcome;

const MAX_REPLY_TOKENS: u32 = 1000;
// memories fetched per turn / memories placed in the prompt
const RETRIEVE_LIMIT: usize = 10;
const CONTEXT_MEMORIES: usize = 3;

pub struct Agent {
    model: Arc<dyn ChatModel>,
    memory: Arc<dyn MemoryStore>,
}

impl Agent {
    pub fn new(model: Arc<dyn ChatModel>, memory: Arc<dyn MemoryStore>) -> Self {
        Self { model, memory }
    }

    // A failed lookup only costs context, so it degrades to no memories.
    pub async fn retrieve_memory(&self, user_id: &str, message: &str) -> Vec<MemoryHit> {
        match self.memory.search(user_id, message, RETRIEVE_LIMIT).await {
            Ok(memories) => memories,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "memory retrieval failed, continuing without context");
                Vec::new()
            }
        }
    }

    pub async fn generate_response(
        &self,
        user_id: &str,
        message: &str,
        memories: &[MemoryHit],
    ) -> Result<String, UpstreamError> {
        let system = system_prompt(memories);
        let reply = self.model.complete(&system, message, MAX_REPLY_TOKENS).await?;

        if let Err(e) = self.memory.add(user_id, message, &reply).await {
            tracing::warn!(user_id, error = %e, "failed to store conversation in memory");
        }
        Ok(reply)
    }

    pub async fn run(&self, user_id: &str, message: &str) -> Result<ChatOutcome, UpstreamError> {
        let memories = self.retrieve_memory(user_id, message).await;
        tracing::debug!(user_id, retrieved = memories.len(), "memory retrieved");
        let reply = self.generate_response(user_id, message, &memories).await?;
        Ok(ChatOutcome {
            reply,
            memory_count: memories.len(),
        })
    }
}

pub fn system_prompt(memories: &[MemoryHit]) -> String {
    let mut prompt = String::from(
        "You are a helpful AI assistant with access to conversation history and memories. \
         Use the provided memories to give more personalized and contextual responses.",
    );
    if !memories.is_empty() {
        prompt.push_str("\n\nRelevant memories from previous conversations:\n");
        for hit in memories.iter().take(CONTEXT_MEMORIES) {
            prompt.push_str("- ");
            prompt.push_str(&hit.memory);
            prompt.push('\n');
        }
    }
    prompt.push_str("\nRemember to be conversational and reference past interactions when relevant.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::VectorMemory;
    use crate::testing::{FailingModel, FailingStore, LetterEmbedder, ScriptedModel};
    use chrono::Utc;

    fn hit(text: &str) -> MemoryHit {
        MemoryHit {
            id: text.to_string(),
            memory: text.to_string(),
            score: 1.0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn prompt_includes_top_three_memories() {
        let memories: Vec<_> = ["one", "two", "three", "four"].iter().map(|m| hit(m)).collect();
        let prompt = system_prompt(&memories);
        assert!(prompt.contains("- one\n"));
        assert!(prompt.contains("- three\n"));
        assert!(!prompt.contains("- four"));

        assert!(!system_prompt(&[]).contains("Relevant memories"));
    }

    #[tokio::test]
    async fn second_turn_sees_first_turn() {
        let model = Arc::new(ScriptedModel::new("Nice to meet you"));
        let memory = Arc::new(VectorMemory::new(Arc::new(LetterEmbedder), 50, 10));
        let agent = Agent::new(model.clone(), memory);

        let first = agent.run("alice", "My name is Alice").await.unwrap();
        assert_eq!(first.memory_count, 0);
        assert_eq!(first.reply, "Nice to meet you");

        let second = agent.run("alice", "What is my name?").await.unwrap();
        assert_eq!(second.memory_count, 1);

        let seen = model.seen.lock().unwrap();
        assert!(seen[1].0.contains("My name is Alice"));
        assert_eq!(seen[1].1, "What is my name?");
    }

    #[tokio::test]
    async fn memory_outage_does_not_block_reply() {
        let agent = Agent::new(Arc::new(ScriptedModel::new("hello")), Arc::new(FailingStore));
        let outcome = agent.run("bob", "hi").await.unwrap();
        assert_eq!(outcome.reply, "hello");
        assert_eq!(outcome.memory_count, 0);
    }

    #[tokio::test]
    async fn model_failure_is_reported() {
        let memory = Arc::new(VectorMemory::new(Arc::new(LetterEmbedder), 50, 10));
        let agent = Agent::new(Arc::new(FailingModel), memory.clone());
        assert!(agent.run("bob", "hi").await.is_err());
        // nothing stored for a failed turn
        assert!(memory.search("bob", "hi", 5).await.unwrap().is_empty());
    }
}

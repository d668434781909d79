use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::UpstreamError;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, UpstreamError>;
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn search(&self, user_id: &str, query: &str, limit: usize) -> Result<Vec<MemoryHit>, UpstreamError>;

    async fn add(&self, user_id: &str, user_message: &str, assistant_message: &str) -> Result<(), UpstreamError>;

    // Returns how many memories were removed.
    async fn delete_all(&self, user_id: &str) -> Result<usize, UpstreamError>;
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MemoryHit {
    pub id: String,
    pub memory: String,
    pub score: f32,
    pub created_at: DateTime<Utc>,
}

// Ollama embeddings API format
#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(client: reqwest::Client, base_url: &str, model: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, UpstreamError> {
        let res = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|source| UpstreamError::Http {
                service: "ollama",
                source,
            })?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                service: "ollama",
                status: status.as_u16(),
                body,
            });
        }

        let body: EmbeddingResponse = res.json().await.map_err(|e| UpstreamError::Payload {
            service: "ollama",
            detail: e.to_string(),
        })?;
        if body.embedding.is_empty() {
            return Err(UpstreamError::Payload {
                service: "ollama",
                detail: "empty embedding".to_string(),
            });
        }
        Ok(body.embedding)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemoryRecord {
    id: String,
    memory: String,
    embedding: Vec<f32>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserMemories {
    updated_at: DateTime<Utc>,
    records: Vec<MemoryRecord>,
}

// On-disk format of the whole index
#[derive(Serialize, Deserialize)]
struct Snapshot {
    users: HashMap<String, UserMemories>,
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn storage_error(path: &Path, detail: impl ToString) -> UpstreamError {
    UpstreamError::Storage {
        path: path.display().to_string(),
        detail: detail.to_string(),
    }
}

// Per-user vector index. Oldest memories are dropped once a user exceeds
// `max_per_user`, and the least recently updated user is dropped once more
// than `max_users` have memories. With a path set, every change is written
// out as a JSON snapshot.
pub struct VectorMemory {
    embedder: Arc<dyn Embedder>,
    users: DashMap<String, UserMemories>,
    max_per_user: usize,
    max_users: usize,
    path: Option<PathBuf>,
    // serializes snapshot writes
    write_lock: Mutex<()>,
}

impl VectorMemory {
    pub fn new(embedder: Arc<dyn Embedder>, max_per_user: usize, max_users: usize) -> Self {
        Self {
            embedder,
            users: DashMap::new(),
            max_per_user: max_per_user.max(1),
            max_users: max_users.max(1),
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    // Attach a snapshot file, loading whatever it already holds.
    pub async fn load(mut self, path: PathBuf) -> Result<Self, UpstreamError> {
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| storage_error(&path, e))?;
                for (user_id, mut memories) in snapshot.users {
                    if memories.records.len() > self.max_per_user {
                        let excess = memories.records.len() - self.max_per_user;
                        memories.records.drain(..excess);
                    }
                    self.users.insert(user_id, memories);
                }
                while self.users.len() > self.max_users {
                    self.evict_stalest(None);
                }
                tracing::info!(path = %path.display(), users = self.users.len(), "loaded memory snapshot");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no memory snapshot yet, starting empty");
            }
            Err(e) => return Err(storage_error(&path, e)),
        }
        self.path = Some(path);
        Ok(self)
    }

    fn evict_stalest(&self, keep: Option<&str>) {
        let stalest = self
            .users
            .iter()
            .filter(|entry| Some(entry.key().as_str()) != keep)
            .min_by_key(|entry| entry.value().updated_at)
            .map(|entry| entry.key().clone());
        if let Some(user_id) = stalest {
            self.users.remove(&user_id);
            tracing::info!(user_id = %user_id, "evicted memories of least recently active user");
        }
    }

    async fn persist(&self) -> Result<(), UpstreamError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;

        // copy out under the map guards, write without them
        let snapshot = Snapshot {
            users: self
                .users
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        };
        let bytes = serde_json::to_vec(&snapshot).map_err(|e| storage_error(path, e))?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(|e| storage_error(path, e))?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(|e| storage_error(path, e))?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| storage_error(path, e))?;
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for VectorMemory {
    async fn search(&self, user_id: &str, query: &str, limit: usize) -> Result<Vec<MemoryHit>, UpstreamError> {
        if !self.users.contains_key(user_id) {
            return Ok(Vec::new());
        }
        // embed before taking the map guard, never hold it across an await
        let query_embedding = self.embedder.embed(query).await?;

        let mut hits: Vec<MemoryHit> = match self.users.get(user_id) {
            Some(user) => user
                .records
                .iter()
                .map(|r| MemoryHit {
                    id: r.id.clone(),
                    memory: r.memory.clone(),
                    score: cosine_similarity(&query_embedding, &r.embedding),
                    created_at: r.created_at,
                })
                .collect(),
            None => return Ok(Vec::new()),
        };
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn add(&self, user_id: &str, user_message: &str, assistant_message: &str) -> Result<(), UpstreamError> {
        let embedding = self.embedder.embed(user_message).await?;
        let now = Utc::now();
        let record = MemoryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            memory: format!("User: {}\nAssistant: {}", user_message, assistant_message),
            embedding,
            created_at: now,
        };

        if !self.users.contains_key(user_id) && self.users.len() >= self.max_users {
            self.evict_stalest(Some(user_id));
        }
        {
            let mut user = self.users.entry(user_id.to_string()).or_default();
            user.updated_at = now;
            user.records.push(record);
            if user.records.len() > self.max_per_user {
                let excess = user.records.len() - self.max_per_user;
                user.records.drain(..excess);
            }
        }
        self.persist().await
    }

    async fn delete_all(&self, user_id: &str) -> Result<usize, UpstreamError> {
        let removed = self
            .users
            .remove(user_id)
            .map(|(_, user)| user.records.len())
            .unwrap_or(0);
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }
}

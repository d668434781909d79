use axum::http::HeaderValue;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::error::ConfigError;
use crate::rate_limit::{RateLimitConfig, WindowLimits};

// CLI arguments, each one can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "memory-gateway")]
#[command(about = "REST gateway for a memory-backed chat agent")]
pub struct Args {
    // Interface to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    #[arg(long, env = "ANTHROPIC_BASE_URL", default_value = "https://api.anthropic.com")]
    pub anthropic_url: String,

    // Model used for replies
    #[arg(short, long, env = "ANTHROPIC_MODEL", default_value = "claude-sonnet-4-0")]
    pub model: String,

    // Ollama server used for embeddings
    #[arg(short, long, env = "OLLAMA_BASE_URL", default_value = "http://localhost:11434")]
    pub ollama_url: String,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = "nomic-embed-text:latest")]
    pub embedding_model: String,

    // Chat / memory search ceilings
    #[arg(long, env = "RATE_LIMIT_REQUESTS_PER_MINUTE", default_value_t = 20)]
    pub rate_limit_per_minute: u32,

    #[arg(long, env = "RATE_LIMIT_REQUESTS_PER_HOUR", default_value_t = 100)]
    pub rate_limit_per_hour: u32,

    // Seconds between sweeps of idle rate limit entries
    #[arg(long, default_value_t = 300)]
    pub sweep_interval: u64,

    // Pending chat jobs before callers have to wait
    #[arg(long, default_value_t = 100)]
    pub queue_size: usize,

    // Snapshot file for long-term memory
    #[arg(long, env = "MEMORY_PATH", default_value = "db/memories.json")]
    pub memory_path: PathBuf,

    #[arg(long, default_value_t = 1000)]
    pub max_memories_per_user: usize,

    // Least recently active users are evicted past this
    #[arg(long, default_value_t = 10_000)]
    pub max_memory_users: usize,

    // "*" or comma-separated origins
    #[arg(long, env = "CORS_ALLOW_ORIGINS", default_value = "*")]
    pub cors_origins: String,
}

impl Args {
    // Only the chat class is configurable; the rest keep fixed ceilings
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            chat: WindowLimits::new(Some(self.rate_limit_per_minute), Some(self.rate_limit_per_hour)),
            ..RateLimitConfig::default()
        }
    }

    pub fn sweep_every(&self) -> Duration {
        Duration::from_secs(self.sweep_interval.max(1))
    }

    pub fn cors_layer(&self) -> Result<CorsLayer, ConfigError> {
        let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
        let origins = self.cors_origins.trim();
        if origins == "*" {
            return Ok(layer.allow_origin(Any));
        }

        let list = origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(|o| {
                HeaderValue::from_str(o).map_err(|e| ConfigError::Invalid {
                    name: "CORS_ALLOW_ORIGINS",
                    reason: format!("'{}': {}", o, e),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if list.is_empty() {
            return Err(ConfigError::Invalid {
                name: "CORS_ALLOW_ORIGINS",
                reason: "no origins given".to_string(),
            });
        }
        Ok(layer.allow_origin(AllowOrigin::list(list)))
    }
}

// Built by hand so tests don't pick up the caller's environment
#[cfg(test)]
pub fn test_args() -> Args {
    Args {
        host: "127.0.0.1".to_string(),
        port: 8000,
        anthropic_api_key: Some("sk-ant-REDACTED".to_string()),
        anthropic_url: "https://api.anthropic.com".to_string(),
        model: "claude-sonnet-4-0".to_string(),
        ollama_url: "http://localhost:11434".to_string(),
        embedding_model: "nomic-embed-text:latest".to_string(),
        rate_limit_per_minute: 20,
        rate_limit_per_hour: 100,
        sweep_interval: 300,
        queue_size: 100,
        memory_path: PathBuf::from("db/memories.json"),
        max_memories_per_user: 1000,
        max_memory_users: 10_000,
        cors_origins: "*".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_ceilings_come_from_args() {
        let args = Args {
            rate_limit_per_minute: 5,
            rate_limit_per_hour: 50,
            ..test_args()
        };
        let config = args.rate_limit_config();
        assert_eq!(config.chat, WindowLimits::new(Some(5), Some(50)));
        assert_eq!(config.memory_delete, RateLimitConfig::default().memory_delete);
    }

    #[test]
    fn cors_origins_are_validated() {
        assert!(test_args().cors_layer().is_ok());

        let listed = Args {
            cors_origins: "http://localhost:3000, https://app.example.com".to_string(),
            ..test_args()
        };
        assert!(listed.cors_layer().is_ok());

        let broken = Args {
            cors_origins: "http://ok.example\nbad".to_string(),
            ..test_args()
        };
        assert!(broken.cors_layer().is_err());

        let empty = Args {
            cors_origins: " , ".to_string(),
            ..test_args()
        };
        assert!(empty.cors_layer().is_err());
    }
}

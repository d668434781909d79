mod agent;
mod config;
mod error;
mod handlers;
mod llm;
mod memory;
mod metrics;
mod models;
mod rate_limit;
mod security;
mod state;
#[cfg(test)]
mod testing;
mod worker;

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::agent::Agent;
use crate::config::Args;
use crate::error::ConfigError;
use crate::llm::AnthropicClient;
use crate::memory::{MemoryStore, OllamaEmbedder, VectorMemory};
use crate::models::ChatJob;
use crate::rate_limit::{RateLimiter, spawn_sweeper};
use crate::state::AppState;
use crate::worker::agent_worker;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memory_gateway=info,security=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // parse cli arguments (and env)
    let args = Args::parse();
    security::validate_environment(&args)?;
    let api_key = args
        .anthropic_api_key
        .clone()
        .ok_or(ConfigError::Missing("ANTHROPIC_API_KEY"))?;

    let client = reqwest::Client::builder().timeout(UPSTREAM_TIMEOUT).build()?;

    // collaborators
    let model = Arc::new(AnthropicClient::new(
        client.clone(),
        &args.anthropic_url,
        api_key,
        args.model.clone(),
    ));
    let embedder = Arc::new(OllamaEmbedder::new(client, &args.ollama_url, args.embedding_model.clone()));
    let memory = VectorMemory::new(embedder, args.max_memories_per_user, args.max_memory_users)
        .load(args.memory_path.clone())
        .await?;
    let memory: Arc<dyn MemoryStore> = Arc::new(memory);
    let agent = Arc::new(Agent::new(model, memory.clone()));

    // spawn the background worker
    let (chat_tx, chat_rx) = mpsc::channel::<ChatJob>(args.queue_size);
    tokio::spawn(agent_worker(chat_rx, agent));

    let rate_limiter = RateLimiter::with_system_clock(args.rate_limit_config());
    spawn_sweeper(rate_limiter.clone(), args.sweep_every());

    let state = Arc::new(AppState {
        rate_limiter,
        memory,
        chat_tx,
    });
    let app = handlers::router(state, args.cors_layer()?);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(%addr, "gateway listening");
    tracing::info!(model = %args.model, ollama = %args.ollama_url, "collaborators configured");
    tracing::info!(
        per_minute = args.rate_limit_per_minute,
        per_hour = args.rate_limit_per_hour,
        "chat rate limit"
    );
    tracing::info!(path = %args.memory_path.display(), cors = %args.cors_origins, "memory and cors configured");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("API server shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::agent::Agent;
use crate::metrics::UPSTREAM_FAILURES;
use crate::models::ChatJob;

// Background worker -> runs queued chat turns one by one
pub async fn agent_worker(mut rx: mpsc::Receiver<ChatJob>, agent: Arc<Agent>) {
    tracing::info!("agent worker started - processing chat turns sequentially");

    while let Some(job) = rx.recv().await {
        let result = agent.run(&job.user_id, &job.message).await;
        if result.is_err() {
            UPSTREAM_FAILURES.inc();
        }
        // caller may have gone away; nothing to do then
        if job.response_tx.send(result).is_err() {
            tracing::debug!(user_id = %job.user_id, "chat caller dropped before reply");
        }
    }

    tracing::info!("agent worker stopped");
}

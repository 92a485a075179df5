//! offsync host entry point.
//!
//! Boots the engine against the configured store and remote, keeps the
//! periodic sync timer running, and serves the engine's inbound events as MCP
//! tools on stdio. Logging goes to stderr to keep stdout for JSON-RPC.

use std::sync::Arc;

use anyhow::Result;
use offsync_core::AppConfig;
use offsync_engine::{Engine, SyncEvent};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(db = %config.db_path.display(), generation = %config.generation_name, "Starting offsync on stdio transport");

    let engine = Arc::new(Engine::open(config).await?);

    match engine.check_for_updates().await {
        Ok(status) => tracing::info!(?status, "Boot update check finished"),
        Err(e) => tracing::warn!(error = %e, "Boot update check failed; serving from the existing generation"),
    }

    let periodic = engine.spawn_periodic_sync();
    let events = tokio::spawn(log_sync_events(engine.clone()));

    let handler = handler::OffsyncServer::new(engine);
    let server = serve_server(handler, stdio()).await?;
    server.waiting().await?;

    periodic.abort();
    events.abort();
    Ok(())
}

/// Mirror reconciler notifications into the log until the channel closes.
async fn log_sync_events(engine: Arc<Engine>) {
    let mut rx = engine.subscribe();
    loop {
        match rx.recv().await {
            Ok(SyncEvent::MutationApplied { id, entity_type }) => {
                tracing::info!(id = %id, entity_type = %entity_type, "Mutation applied")
            }
            Ok(SyncEvent::MutationFailed { id, entity_type, reason, retry_count, permanent }) => {
                tracing::warn!(id = %id, entity_type = %entity_type, reason = %reason, retry_count, permanent, "Mutation failed")
            }
            Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Sync event log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

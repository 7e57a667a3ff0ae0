//! stash server entry point.
//!
//! Loads configuration, opens the cache database, installs the worker and
//! serves the MCP tools on stdio. Logging goes to stderr to avoid interfering
//! with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use stash_client::{ClientNotice, DispatchResult, Engine, FetchConfig, HttpFetcher, WorkerEvent};
use stash_core::{AppConfig, CacheDb};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

mod error;
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
    tracing::info!(
        app = %config.app_name,
        version = %config.cache_version,
        db_path = %config.db_path.display(),
        "Starting stash server on stdio transport"
    );

    let db = CacheDb::open(&config.db_path).await?;
    let fetcher = Arc::new(HttpFetcher::new(FetchConfig::from_app(&config))?);
    let engine = Engine::new(config, db, fetcher)?;
    engine.register_client(handler::STDIO_CLIENT).await;

    tokio::spawn(log_notices(engine.subscribe()));

    if let DispatchResult::Lifecycle(state) = engine.dispatch(WorkerEvent::Install).await? {
        tracing::info!(%state, "worker installed");
    }

    let db = engine.db().clone();
    let handler = handler::StashServer::new(engine);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;
    db.close().await?;

    Ok(())
}

/// Log every client notice until the engine is dropped. Missed notices are
/// reported and skipped.
async fn log_notices(mut notices: broadcast::Receiver<ClientNotice>) {
    loop {
        match notices.recv().await {
            Ok(ClientNotice::UpdateAvailable { version, message }) => tracing::info!(%version, "{message}"),
            Err(RecvError::Lagged(missed)) => tracing::warn!(missed, "client notices dropped"),
            Err(RecvError::Closed) => break,
        }
    }
}

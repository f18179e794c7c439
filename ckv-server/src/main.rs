//! # clonekv Server
//!
//! Serve an in-memory key-value store over the Redis protocol.
//!
//! ## Design Principles
//!
//! 1. **Single Responsibility**: Parsing, dispatch and lifecycle live in modules.
//! 2. **Async First**: Tokio handles concurrent connections efficiently.
//! 3. **Fail-Open Defaults**: Protocol errors are localized to the connection.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use ckv_engine::MemoryStore;
use ckv_server::{Server, ServerConfig};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = ServerConfig::from_env().context("reading configuration")?;
    let listener = TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("binding {}", config.addr))?;

    let store = Arc::new(MemoryStore::new());
    let server = Server::from_config(&config, store);

    info!("started server at {}", listener.local_addr()?);
    server
        .run_until(listener, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await?;
    Ok(())
}

//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p substrate_server -- [--addr 127.0.0.1:40000] [--sync-interval-ms 100]
//!
//! The server accepts client connections, stores one entity per connection,
//! and broadcasts the full snapshot on the sync interval.

use std::env;

use anyhow::Context;
use substrate_server::server::{default_spawn, SyncServer};
use substrate_shared::config::SyncConfig;
use tracing::info;

fn parse_args() -> SyncConfig {
    let mut cfg = SyncConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--sync-interval-ms" if i + 1 < args.len() => {
                cfg.sync_interval_ms = args[i + 1].parse().unwrap_or(100);
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(addr = %cfg.server_addr, sync_interval_ms = cfg.sync_interval_ms, "Starting server");

    let mut server = SyncServer::bind(cfg, default_spawn())
        .await
        .context("bind server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    server.run().await
}

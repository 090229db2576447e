//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p substrate_client -- [--addr 127.0.0.1:40000]
//!
//! Connects to the sync server, mirrors the server snapshot into a local
//! scene, and sends the controlled entity's state every frame.

use std::env;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use substrate_client::client::{apply_snapshot, SyncClient, SyncEvent};
use substrate_shared::config::SyncConfig;
use substrate_shared::render::{NullRenderer, Renderer};
use substrate_shared::scene::Scene;
use substrate_shared::scheduler::GameLoop;
use tracing::{info, warn};

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
    info!(server = %cfg.server_addr, "Starting client");

    let mut client = SyncClient::connect(&cfg).await.context("connect")?;
    let mut my_id = client.id().cloned().context("no assigned id")?.to_string();

    let renderer: Arc<Mutex<dyn Renderer>> = Arc::new(Mutex::new(NullRenderer));
    let mut scene = Scene::new(renderer);
    let mut game_loop = GameLoop::new();
    scene.activate(&mut game_loop);
    game_loop.start(false);

    let frame = Duration::from_millis(16);
    'main: loop {
        while let Some(event) = client.try_event() {
            match event {
                SyncEvent::Snapshot(records) => {
                    scene.with_pool(|pool| apply_snapshot(pool, &records));
                }
                SyncEvent::PeerJoined(record) => {
                    info!(id = %record.id, "peer joined");
                }
                SyncEvent::PeerLeft(id) => {
                    info!(conn = %id, "peer left");
                }
                SyncEvent::Disconnected { reason } => {
                    let server_close = reason.is_some();
                    if server_close && client.reconnect().await {
                        my_id = client
                            .id()
                            .cloned()
                            .context("no assigned id after reconnect")?
                            .to_string();
                        info!(conn = %my_id, "reconnected");
                    } else {
                        info!("connection lost, exiting");
                        break 'main;
                    }
                }
                SyncEvent::Error(message) => {
                    warn!(%message, "client error");
                }
            }
        }

        game_loop.tick_at(Instant::now());

        if let Some(record) = scene.with_pool(|pool| pool.get(&my_id).map(|e| e.record())) {
            client.send_state(record);
        }

        tokio::time::sleep(frame).await;
    }

    client.disconnect();
    scene.destroy(&mut game_loop);
    game_loop.stop();
    Ok(())
}

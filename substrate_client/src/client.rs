//! Sync client implementation.
//!
//! The client keeps one persistent connection to the authoritative server.
//! On connect it waits for its assigned connection id before reporting
//! ready; after that, inbound traffic (peer joins/leaves, interval
//! snapshots, disconnects) surfaces as [`SyncEvent`]s pulled from
//! [`SyncClient::poll_event`]. Outbound state is fire-and-forget: a send
//! with no active connection reports locally and never raises.

use std::net::SocketAddr;

use anyhow::Context;
use substrate_shared::config::SyncConfig;
use substrate_shared::entity::{Entity, EntityRecord};
use substrate_shared::error::ConnectionError;
use substrate_shared::net::{Conn, ConnectionId, FrameReader, FrameWriter, NetMsg};
use substrate_shared::pool::EntityPool;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Not connected to any server.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Assigned id received; snapshots flowing.
    Connected,
}

/// Inbound activity surfaced to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    PeerJoined(EntityRecord),
    PeerLeft(ConnectionId),
    Snapshot(Vec<EntityRecord>),
    /// `reason` is `Some` when the server closed explicitly, `None` on a
    /// network-level drop.
    Disconnected { reason: Option<String> },
    /// A local, recoverable failure (for example sending with no
    /// connection).
    Error(String),
}

/// State-sync client over one persistent connection.
pub struct SyncClient {
    cfg: SyncConfig,
    state: ClientState,
    id: Option<ConnectionId>,
    outbound: Option<mpsc::UnboundedSender<NetMsg>>,
    events_tx: mpsc::UnboundedSender<SyncEvent>,
    events_rx: mpsc::UnboundedReceiver<SyncEvent>,
}

impl SyncClient {
    /// Connects and waits (bounded by the handshake timeout) for the
    /// server-assigned id.
    pub async fn connect(cfg: &SyncConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        info!(server = %addr, "connecting");

        let conn = Conn::connect(addr).await?;
        let (mut reader, writer) = conn.into_split();

        let assigned = tokio::time::timeout(cfg.handshake_timeout(), reader.recv())
            .await
            .map_err(|_| ConnectionError::HandshakeTimeout)??;
        let id = match assigned {
            NetMsg::AssignId { id } => id,
            other => anyhow::bail!("expected AssignId, got {other:?}"),
        };
        info!(conn = %id, "connected, id assigned");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_task(writer, outbound_rx));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(read_task(reader, events_tx.clone()));

        Ok(Self {
            cfg: cfg.clone(),
            state: ClientState::Connected,
            id: Some(id),
            outbound: Some(outbound_tx),
            events_tx,
            events_rx,
        })
    }

    /// The server-assigned connection id, which is also the id of this
    /// client's controlled entity.
    pub fn id(&self) -> Option<&ConnectionId> {
        self.id.as_ref()
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    /// Waits up to `window` for the next inbound event.
    pub async fn poll_event(&mut self, window: std::time::Duration) -> Option<SyncEvent> {
        let event = match tokio::time::timeout(window, self.events_rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) | Err(_) => return None,
        };
        if let SyncEvent::Disconnected { reason } = &event {
            info!(reason = ?reason, "connection closed");
            self.state = ClientState::Disconnected;
            self.outbound = None;
        }
        Some(event)
    }

    /// Non-blocking variant of [`poll_event`](Self::poll_event).
    pub fn try_event(&mut self) -> Option<SyncEvent> {
        let event = self.events_rx.try_recv().ok()?;
        if let SyncEvent::Disconnected { reason } = &event {
            info!(reason = ?reason, "connection closed");
            self.state = ClientState::Disconnected;
            self.outbound = None;
        }
        Some(event)
    }

    /// Fire-and-forget state update for this client's controlled entity.
    /// Without an active connection this reports locally (an `Error` event
    /// plus a warning) and never raises.
    pub fn send_state(&mut self, record: EntityRecord) {
        let Some(outbound) = &self.outbound else {
            self.report_local(ConnectionError::NotConnected);
            return;
        };
        if outbound.send(NetMsg::UpdateState(record)).is_err() {
            self.state = ClientState::Disconnected;
            self.outbound = None;
            self.report_local(ConnectionError::NotConnected);
        }
    }

    /// Tears the connection down. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(NetMsg::Disconnect {
                reason: "client disconnect".to_string(),
            });
            info!("disconnected");
        }
        self.state = ClientState::Disconnected;
    }

    /// Re-establishes the connection per the configured reconnect policy.
    /// Returns whether a connection was re-established. The server assigns
    /// a fresh id on success.
    pub async fn reconnect(&mut self) -> bool {
        let policy = self.cfg.reconnect;
        for attempt in 1..=policy.max_attempts {
            self.state = ClientState::Connecting;
            tokio::time::sleep(policy.backoff()).await;
            match Self::connect(&self.cfg).await {
                Ok(fresh) => {
                    *self = fresh;
                    return true;
                }
                Err(e) => {
                    warn!(attempt, max = policy.max_attempts, error = %e, "reconnect failed");
                }
            }
        }
        self.state = ClientState::Disconnected;
        false
    }

    fn report_local(&mut self, err: ConnectionError) {
        warn!(error = %err, "local send failure");
        let _ = self.events_tx.send(SyncEvent::Error(err.to_string()));
    }
}

async fn read_task(mut reader: FrameReader, events: mpsc::UnboundedSender<SyncEvent>) {
    loop {
        let event = match reader.recv().await {
            Ok(NetMsg::PeerJoined(record)) => SyncEvent::PeerJoined(record),
            Ok(NetMsg::PeerLeft { id }) => SyncEvent::PeerLeft(id),
            Ok(NetMsg::Snapshot(records)) => SyncEvent::Snapshot(records),
            Ok(NetMsg::Disconnect { reason }) => {
                let _ = events.send(SyncEvent::Disconnected {
                    reason: Some(reason),
                });
                return;
            }
            Ok(other) => {
                debug!(msg = ?other, "unexpected message");
                continue;
            }
            Err(e) => {
                debug!(error = %e, "reader closing");
                let _ = events.send(SyncEvent::Disconnected { reason: None });
                return;
            }
        };
        if events.send(event).is_err() {
            return; // application dropped the client
        }
    }
}

async fn write_task(mut writer: FrameWriter, mut outbound: mpsc::UnboundedReceiver<NetMsg>) {
    while let Some(msg) = outbound.recv().await {
        if let Err(e) = writer.send(&msg).await {
            debug!(error = %e, "writer closing");
            return;
        }
    }
}

/// Reconciles a local pool with a server snapshot: upserts every record
/// (validate-then-replace, keeping local update functions) and removes
/// entities the server no longer knows.
pub fn apply_snapshot(pool: &mut EntityPool, records: &[EntityRecord]) {
    for record in records {
        if pool.has(&record.id) {
            if let Some(entity) = pool.get_mut(&record.id) {
                if let Err(e) = entity.apply_record(record) {
                    warn!(id = %record.id, error = %e, "rejecting snapshot record");
                }
            }
        } else {
            match Entity::from_record(record) {
                Ok(entity) => {
                    // Records in a snapshot carry distinct server-side ids,
                    // so the add cannot collide.
                    let _ = pool.add(entity);
                }
                Err(e) => {
                    warn!(id = %record.id, error = %e, "rejecting snapshot record");
                }
            }
        }
    }
    let known: Vec<String> = pool
        .iter()
        .map(|e| e.id().to_string())
        .filter(|id| !records.iter().any(|r| &r.id == id))
        .collect();
    for id in known {
        pool.remove(&id);
    }
}

//! Authoritative sync server.
//!
//! The server owns one entity snapshot per open connection. Connection
//! events (join, update-state, leave) are edge-triggered broadcasts; the
//! steady-state mechanism is a fixed-interval snapshot of every stored
//! entity, sent whether or not anything changed.
//!
//! Concurrency model: one reader task and one writer task per connection,
//! both funneled through the single event loop in [`SyncServer::run`]. All
//! map mutation happens inside that loop, so a disconnect removes the
//! connection's entity atomically within one event turn.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use substrate_shared::config::SyncConfig;
use substrate_shared::entity::{Entity, EntityRecord};
use substrate_shared::net::{Conn, ConnectionId, FrameReader, FrameWriter, Listener, NetMsg};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Builds the initial entity for a new connection. The returned record's id
/// is overwritten with the connection id before use.
pub type SpawnFn = Box<dyn FnMut(&ConnectionId) -> EntityRecord + Send>;

/// Inbound activity from a connection's reader task.
enum ConnEvent {
    Message(ConnectionId, NetMsg),
    Closed(ConnectionId),
}

struct Peer {
    outbound: mpsc::UnboundedSender<NetMsg>,
}

/// Authoritative state-sync server.
pub struct SyncServer {
    cfg: SyncConfig,
    listener: Listener,
    spawn_fn: SpawnFn,

    peers: HashMap<ConnectionId, Peer>,
    /// Last-known entity snapshot per open connection.
    players: HashMap<ConnectionId, EntityRecord>,
    /// Join order, drives snapshot ordering.
    join_order: Vec<ConnectionId>,

    events_tx: mpsc::UnboundedSender<ConnEvent>,
    events_rx: mpsc::UnboundedReceiver<ConnEvent>,
}

impl SyncServer {
    /// Binds the listen socket.
    pub async fn bind(cfg: SyncConfig, spawn_fn: SpawnFn) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = Listener::bind(addr).await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            cfg,
            listener,
            spawn_fn,
            peers: HashMap::new(),
            players: HashMap::new(),
            join_order: Vec::new(),
            events_tx,
            events_rx,
        })
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn connection_count(&self) -> usize {
        self.players.len()
    }

    /// Runs the event loop until the task is cancelled: accepts connections,
    /// applies inbound state updates, and broadcasts snapshots on the sync
    /// interval.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(self.cfg.sync_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        enum Turn {
            Accepted(Conn, SocketAddr),
            Event(ConnEvent),
            Tick,
        }

        loop {
            // Arms only pick the turn; mutation happens below, once the
            // competing borrows are dropped.
            let turn = tokio::select! {
                accepted = self.listener.accept() => {
                    let (conn, peer_addr) = accepted?;
                    Turn::Accepted(conn, peer_addr)
                }
                event = self.events_rx.recv() => match event {
                    Some(event) => Turn::Event(event),
                    // The server holds an events_tx clone, so recv never
                    // yields None while the loop is alive.
                    None => continue,
                },
                _ = ticker.tick() => Turn::Tick,
            };

            match turn {
                Turn::Accepted(conn, peer_addr) => self.handle_accept(conn, peer_addr),
                Turn::Event(event) => self.handle_event(event),
                Turn::Tick => self.broadcast_snapshot(),
            }
        }
    }

    /// Runs the event loop for a bounded window. Test helper.
    pub async fn run_for(&mut self, window: Duration) -> anyhow::Result<()> {
        match tokio::time::timeout(window, self.run()).await {
            Ok(result) => result,
            Err(_) => Ok(()),
        }
    }

    fn handle_accept(&mut self, conn: Conn, peer_addr: SocketAddr) {
        let id = ConnectionId::new_unique();
        let (reader, writer) = conn.into_split();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_task(writer, outbound_rx));
        tokio::spawn(read_task(id.clone(), reader, self.events_tx.clone()));

        let mut record = (self.spawn_fn)(&id);
        record.id = id.as_str().to_string();
        if let Err(e) = record.validate() {
            warn!(conn = %id, error = %e, "spawn template produced an invalid entity, using a bare one");
            record = EntityRecord::new(id.as_str(), [0.0, 0.0], [50.0, 50.0]);
        }

        self.peers.insert(id.clone(), Peer { outbound: outbound_tx });

        // The new peer learns its id first, then the already-present
        // entities in join order, so every client sees the same join
        // sequence regardless of when it connected.
        self.send_to(&id, NetMsg::AssignId { id: id.clone() });
        for existing in &self.join_order {
            if let Some(rec) = self.players.get(existing) {
                self.send_to(&id, NetMsg::PeerJoined(rec.clone()));
            }
        }

        self.players.insert(id.clone(), record.clone());
        self.join_order.push(id.clone());
        self.broadcast(NetMsg::PeerJoined(record));

        info!(conn = %id, peer = %peer_addr, connections = self.players.len(), "peer joined");
    }

    fn handle_event(&mut self, event: ConnEvent) {
        match event {
            ConnEvent::Message(id, NetMsg::UpdateState(record)) => {
                self.apply_update(&id, record);
            }
            ConnEvent::Message(id, NetMsg::Disconnect { reason }) => {
                debug!(conn = %id, reason = %reason, "peer requested disconnect");
                self.drop_connection(&id);
            }
            ConnEvent::Message(id, other) => {
                debug!(conn = %id, msg = ?other, "unexpected message");
            }
            ConnEvent::Closed(id) => {
                self.drop_connection(&id);
            }
        }
    }

    /// Validate-then-replace: the stored snapshot changes only when the
    /// whole incoming record (with the server-supplied id) is valid.
    fn apply_update(&mut self, id: &ConnectionId, mut record: EntityRecord) {
        let Some(stored) = self.players.get_mut(id) else {
            // Unknown connection: ignored, never fatal.
            warn!(conn = %id, "update-state from unknown connection, ignoring");
            return;
        };
        record.id = id.as_str().to_string();
        match Entity::from_record(&record) {
            Ok(_) => *stored = record,
            Err(e) => {
                warn!(conn = %id, error = %e, "invalid update-state, keeping previous snapshot");
            }
        }
    }

    /// Removes the connection's entity and writer and tells everyone else.
    /// Runs to completion within one event turn.
    fn drop_connection(&mut self, id: &ConnectionId) {
        if self.players.remove(id).is_none() {
            return; // already gone (close raced with an explicit disconnect)
        }
        self.join_order.retain(|j| j != id);
        self.peers.remove(id);
        self.broadcast(NetMsg::PeerLeft { id: id.clone() });
        info!(conn = %id, connections = self.players.len(), "peer left");
    }

    fn broadcast_snapshot(&mut self) {
        if self.peers.is_empty() {
            return;
        }
        let records: Vec<EntityRecord> = self
            .join_order
            .iter()
            .filter_map(|id| self.players.get(id).cloned())
            .collect();
        debug!(entities = records.len(), "broadcasting snapshot");
        self.broadcast(NetMsg::Snapshot(records));
    }

    fn broadcast(&self, msg: NetMsg) {
        for (id, peer) in &self.peers {
            if peer.outbound.send(msg.clone()).is_err() {
                // Writer task died; the reader side will surface Closed.
                debug!(conn = %id, "dropping broadcast to closed writer");
            }
        }
    }

    fn send_to(&self, id: &ConnectionId, msg: NetMsg) {
        if let Some(peer) = self.peers.get(id) {
            let _ = peer.outbound.send(msg);
        }
    }
}

async fn read_task(
    id: ConnectionId,
    mut reader: FrameReader,
    events: mpsc::UnboundedSender<ConnEvent>,
) {
    loop {
        match reader.recv().await {
            Ok(msg) => {
                if events.send(ConnEvent::Message(id.clone(), msg)).is_err() {
                    return; // server gone
                }
            }
            Err(e) => {
                debug!(conn = %id, error = %e, "reader closing");
                let _ = events.send(ConnEvent::Closed(id));
                return;
            }
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

/// Default spawn template: a 50x50 rect at the origin.
pub fn default_spawn() -> SpawnFn {
    Box::new(|id| EntityRecord::new(id.as_str(), [0.0, 0.0], [50.0, 50.0]))
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(
    sync_interval_ms: u64,
    spawn_fn: SpawnFn,
) -> anyhow::Result<(SyncServer, SyncConfig)> {
    let cfg = SyncConfig {
        server_addr: "127.0.0.1:0".to_string(),
        sync_interval_ms,
        ..Default::default()
    };
    let server = SyncServer::bind(cfg.clone(), spawn_fn).await?;
    let mut cfg = cfg;
    cfg.server_addr = server.local_addr()?.to_string();
    Ok((server, cfg))
}

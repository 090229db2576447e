//! Networking primitives.
//!
//! One persistent TCP connection per peer carries every message type as
//! length-prefixed (u32 BE) JSON frames. The connection can be split into
//! reader/writer halves so a server task can pump inbound messages while
//! another broadcasts outbound ones.
//!
//! Keep serialization explicit and versionable; this is a state-sync wire,
//! not a general RPC layer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpListener, TcpStream,
};

use crate::entity::EntityRecord;

static NEXT_CONNECTION_ID: AtomicU32 = AtomicU32::new(1);

/// Upper bound on a single frame's payload. The length prefix comes from
/// the peer, so it is never trusted as an allocation size beyond this.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Identifies one client-server session. The string doubles as the id of
/// the connection's controlled entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Process-unique id.
    pub fn new_unique() -> Self {
        ConnectionId(format!(
            "conn-{}",
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetMsg {
    // ─── Handshake ───
    /// Server -> client: your connection id (also your entity's id).
    AssignId { id: ConnectionId },

    // ─── Edge-triggered peer events ───
    /// Server -> client: a peer joined; carries its full entity record.
    PeerJoined(EntityRecord),
    /// Server -> client: a peer left.
    PeerLeft { id: ConnectionId },

    // ─── State propagation ───
    /// Client -> server: the controlled entity's current state. The id is
    /// supplied by the server from the connection, not trusted on the wire.
    UpdateState(EntityRecord),
    /// Server -> client: all known entities, sent on a fixed interval
    /// whether or not anything changed.
    Snapshot(Vec<EntityRecord>),

    // ─── Teardown ───
    Disconnect { reason: String },
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct Conn {
    stream: TcpStream,
}

impl Conn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        let frame = encode_frame(msg)?;
        self.stream.write_all(&frame).await.context("tcp write")?;
        Ok(())
    }

    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        let mut len_buf = [0u8; 4];
        self.stream
            .read_exact(&mut len_buf)
            .await
            .context("tcp read len")?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            anyhow::bail!("frame length {len} exceeds the {MAX_FRAME_LEN} byte cap");
        }
        let mut payload = vec![0u8; len];
        self.stream
            .read_exact(&mut payload)
            .await
            .context("tcp read payload")?;
        serde_json::from_slice(&payload).context("deserialize msg")
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits into independently owned reader and writer halves.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (read, write) = self.stream.into_split();
        (FrameReader { read }, FrameWriter { write })
    }
}

/// Read half of a split connection.
#[derive(Debug)]
pub struct FrameReader {
    read: OwnedReadHalf,
}

impl FrameReader {
    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        let mut len_buf = [0u8; 4];
        self.read
            .read_exact(&mut len_buf)
            .await
            .context("tcp read len")?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            anyhow::bail!("frame length {len} exceeds the {MAX_FRAME_LEN} byte cap");
        }
        let mut payload = vec![0u8; len];
        self.read
            .read_exact(&mut payload)
            .await
            .context("tcp read payload")?;
        serde_json::from_slice(&payload).context("deserialize msg")
    }
}

/// Write half of a split connection.
#[derive(Debug)]
pub struct FrameWriter {
    write: OwnedWriteHalf,
}

impl FrameWriter {
    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        let frame = encode_frame(msg)?;
        self.write.write_all(&frame).await.context("tcp write")?;
        Ok(())
    }
}

/// TCP server listener.
pub struct Listener {
    listener: TcpListener,
}

impl Listener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(Conn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        Ok((Conn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

fn encode_frame(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    Ok(buf.freeze())
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}

//! `substrate_server`
//!
//! Server-side systems:
//! - Accepts persistent connections and assigns connection ids
//! - Owns the per-connection entity map (the authoritative state)
//! - Applies validated `UpdateState` messages
//! - Broadcasts `PeerJoined`/`PeerLeft` edges and interval `Snapshot`s

pub mod server;

pub use server::SyncServer;

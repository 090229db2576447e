//! `substrate_client`
//!
//! Client-side systems:
//! - Connection management over one persistent channel
//! - Assigned-id handshake and reconnect policy
//! - Snapshot reception and local pool reconciliation
//! - Logical input query stub

pub mod client;
pub mod input;

pub use client::{SyncClient, SyncEvent};

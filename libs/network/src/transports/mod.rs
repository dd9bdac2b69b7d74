//! Group Transport Layer
//!
//! Best-effort group communication: a node joins a named group, learns about
//! peers joining and leaving through membership events, and exchanges opaque
//! byte payloads with individual peers or with the whole group. Delivery is
//! not guaranteed; a failed send is reported to the caller and nothing is
//! retried at this layer.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

pub mod memory;

pub use memory::{MemoryNetwork, MemoryTransport};

/// Transport-level address of a group member
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransportAddress(String);

impl TransportAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Membership changes and inbound traffic, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A member became visible (may be the local member itself)
    PeerJoined(TransportAddress),
    /// A member is no longer part of the view
    PeerLeft(TransportAddress),
    /// Payload addressed to this member or broadcast to the group
    Received { from: TransportAddress, payload: Bytes },
}

/// Unified group transport trait
#[async_trait]
pub trait GroupTransport: Send + Sync {
    /// Join the group; events for this member arrive on the returned channel
    async fn join(&self) -> Result<(TransportAddress, mpsc::UnboundedReceiver<TransportEvent>)>;

    /// Leave the group; remaining members observe `PeerLeft`
    async fn leave(&self) -> Result<()>;

    /// Send a payload to one member
    async fn send(&self, to: &TransportAddress, payload: Bytes) -> Result<()>;

    /// Send a payload to every other member of the current view
    async fn broadcast(&self, payload: Bytes) -> Result<()>;

    /// Address of the local member while joined
    fn local_address(&self) -> Option<TransportAddress>;

    /// Name of the group this transport joins
    fn group(&self) -> &str;
}

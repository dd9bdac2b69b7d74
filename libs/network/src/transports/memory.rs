//! In-Memory Group Transport
//!
//! A process-local group communication hub. Every [`MemoryTransport`]
//! attached to the same [`MemoryNetwork`] and group name sees the others as
//! peers. The hub can split and re-merge the views of two members to exercise
//! partitions without real sockets.

use super::{GroupTransport, TransportAddress, TransportEvent};
use crate::error::{Result, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Shared hub connecting in-memory transports
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    state: Mutex<HubState>,
}

#[derive(Debug, Default)]
struct HubState {
    groups: HashMap<String, GroupState>,
    next_member: u64,
}

#[derive(Debug, Default)]
struct GroupState {
    members: HashMap<TransportAddress, EventSender>,
    /// Unordered pairs of members that currently cannot see each other
    severed: HashSet<(TransportAddress, TransportAddress)>,
}

fn link(a: &TransportAddress, b: &TransportAddress) -> (TransportAddress, TransportAddress) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

impl GroupState {
    fn can_reach(&self, a: &TransportAddress, b: &TransportAddress) -> bool {
        !self.severed.contains(&link(a, b))
    }

    fn notify(&self, member: &TransportAddress, event: TransportEvent) {
        if let Some(tx) = self.members.get(member) {
            if tx.send(event).is_err() {
                trace!(member = %member, "Dropping event for closed member channel");
            }
        }
    }
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a transport endpoint for `group` on this hub
    pub fn transport(self: &Arc<Self>, group: impl Into<String>) -> MemoryTransport {
        MemoryTransport {
            network: Arc::clone(self),
            group: group.into(),
            address: Mutex::new(None),
        }
    }

    /// Current members of `group`
    pub fn members(&self, group: &str) -> Vec<TransportAddress> {
        let state = self.state.lock();
        let mut members: Vec<_> = state
            .groups
            .get(group)
            .map(|g| g.members.keys().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Split the views of `a` and `b`: each observes the other leaving and
    /// sends between them fail until [`heal`](Self::heal).
    pub fn partition(&self, group: &str, a: &TransportAddress, b: &TransportAddress) {
        let mut state = self.state.lock();
        let Some(group_state) = state.groups.get_mut(group) else {
            return;
        };
        if !group_state.severed.insert(link(a, b)) {
            return;
        }
        debug!(group, a = %a, b = %b, "Partitioning members");
        group_state.notify(a, TransportEvent::PeerLeft(b.clone()));
        group_state.notify(b, TransportEvent::PeerLeft(a.clone()));
    }

    /// Re-merge the views of `a` and `b`
    pub fn heal(&self, group: &str, a: &TransportAddress, b: &TransportAddress) {
        let mut state = self.state.lock();
        let Some(group_state) = state.groups.get_mut(group) else {
            return;
        };
        if !group_state.severed.remove(&link(a, b)) {
            return;
        }
        debug!(group, a = %a, b = %b, "Healing partition");
        if group_state.members.contains_key(a) && group_state.members.contains_key(b) {
            group_state.notify(a, TransportEvent::PeerJoined(b.clone()));
            group_state.notify(b, TransportEvent::PeerJoined(a.clone()));
        }
    }
}

/// One member's endpoint on a [`MemoryNetwork`]
#[derive(Debug)]
pub struct MemoryTransport {
    network: Arc<MemoryNetwork>,
    group: String,
    address: Mutex<Option<TransportAddress>>,
}

impl MemoryTransport {
    fn joined_address(&self) -> Result<TransportAddress> {
        self.address
            .lock()
            .clone()
            .ok_or_else(|| TransportError::not_joined(&self.group))
    }
}

#[async_trait]
impl GroupTransport for MemoryTransport {
    async fn join(&self) -> Result<(TransportAddress, mpsc::UnboundedReceiver<TransportEvent>)> {
        let mut own_address = self.address.lock();
        if own_address.is_some() {
            return Err(TransportError::configuration(
                format!("already joined group '{}'", self.group),
                Some("group"),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.network.state.lock();
        state.next_member += 1;
        let address = TransportAddress::new(format!("mem://{}/{}", self.group, state.next_member));
        let group = state.groups.entry(self.group.clone()).or_default();

        // The view handed to a newcomer includes itself.
        let _ = tx.send(TransportEvent::PeerJoined(address.clone()));
        for (member, member_tx) in &group.members {
            if !group.can_reach(member, &address) {
                continue;
            }
            let _ = member_tx.send(TransportEvent::PeerJoined(address.clone()));
            let _ = tx.send(TransportEvent::PeerJoined(member.clone()));
        }
        group.members.insert(address.clone(), tx);

        debug!(group = %self.group, address = %address, "Joined group");
        *own_address = Some(address.clone());
        Ok((address, rx))
    }

    async fn leave(&self) -> Result<()> {
        let Some(address) = self.address.lock().take() else {
            return Ok(());
        };

        let mut state = self.network.state.lock();
        if let Some(group) = state.groups.get_mut(&self.group) {
            group.members.remove(&address);
            group.severed.retain(|(a, b)| *a != address && *b != address);
            for (member, member_tx) in &group.members {
                let _ = member_tx.send(TransportEvent::PeerLeft(address.clone()));
                trace!(member = %member, left = %address, "Announced departure");
            }
        }
        debug!(group = %self.group, address = %address, "Left group");
        Ok(())
    }

    async fn send(&self, to: &TransportAddress, payload: Bytes) -> Result<()> {
        let from = self.joined_address()?;
        let state = self.network.state.lock();
        let group = state
            .groups
            .get(&self.group)
            .ok_or_else(|| TransportError::not_joined(&self.group))?;

        if !group.can_reach(&from, to) {
            return Err(TransportError::unreachable(to));
        }
        let target = group.members.get(to).ok_or_else(|| TransportError::unreachable(to))?;
        target
            .send(TransportEvent::Received { from, payload })
            .map_err(|_| TransportError::unreachable(to))
    }

    async fn broadcast(&self, payload: Bytes) -> Result<()> {
        let from = self.joined_address()?;
        let state = self.network.state.lock();
        let group = state
            .groups
            .get(&self.group)
            .ok_or_else(|| TransportError::not_joined(&self.group))?;

        for (member, member_tx) in &group.members {
            if *member == from || !group.can_reach(&from, member) {
                continue;
            }
            let event = TransportEvent::Received {
                from: from.clone(),
                payload: payload.clone(),
            };
            if member_tx.send(event).is_err() {
                warn!(member = %member, "Broadcast to closed member channel");
            }
        }
        Ok(())
    }

    fn local_address(&self) -> Option<TransportAddress> {
        self.address.lock().clone()
    }

    fn group(&self) -> &str {
        &self.group
    }
}

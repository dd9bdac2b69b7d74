//! Address Book
//!
//! Maps node identity to the node's current transport address. Entries are
//! added when a handshake completes and removed when membership reports the
//! peer gone. Absence of an entry is the authoritative signal that a node is
//! currently unreachable, so removal must happen before anyone is told about
//! the disconnection.
//!
//! Owned exclusively by its node; other components only read it or go
//! through the node's membership handlers.

use crate::transports::TransportAddress;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;
use types::NodeId;

#[derive(Debug, Default)]
pub struct AddressBook {
    entries: RwLock<HashMap<NodeId, TransportAddress>>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or refresh) the binding for `node`
    ///
    /// Returns the previous address, if any.
    pub fn insert(&self, node: NodeId, address: TransportAddress) -> Option<TransportAddress> {
        debug!(node_id = %node, address = %address, "Address book entry added");
        self.entries.write().insert(node, address)
    }

    /// Remove the binding for `node`
    pub fn remove(&self, node: &NodeId) -> Option<TransportAddress> {
        let removed = self.entries.write().remove(node);
        if removed.is_some() {
            debug!(node_id = %node, "Address book entry removed");
        }
        removed
    }

    /// Remove whichever node is bound to `address`
    pub fn remove_address(&self, address: &TransportAddress) -> Option<NodeId> {
        let mut entries = self.entries.write();
        let node = entries
            .iter()
            .find(|(_, bound)| *bound == address)
            .map(|(node, _)| *node)?;
        entries.remove(&node);
        debug!(node_id = %node, address = %address, "Address book entry removed");
        Some(node)
    }

    pub fn lookup(&self, node: &NodeId) -> Option<TransportAddress> {
        self.entries.read().get(node).cloned()
    }

    pub fn node_at(&self, address: &TransportAddress) -> Option<NodeId> {
        self.entries
            .read()
            .iter()
            .find(|(_, bound)| *bound == address)
            .map(|(node, _)| *node)
    }

    pub fn is_reachable(&self, node: &NodeId) -> bool {
        self.entries.read().contains_key(node)
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        self.entries.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every entry, returning the nodes that were reachable
    pub fn clear(&self) -> Vec<NodeId> {
        self.entries.write().drain().map(|(node, _)| node).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_lookup_remove() {
        let book = AddressBook::new();
        let node = NodeId::new();
        let address = TransportAddress::new("mem://g/1");

        assert!(!book.is_reachable(&node));
        assert!(book.insert(node, address.clone()).is_none());
        assert_eq!(book.lookup(&node), Some(address.clone()));
        assert_eq!(book.node_at(&address), Some(node));

        assert_eq!(book.remove(&node), Some(address));
        assert!(book.lookup(&node).is_none());
        assert!(book.is_empty());
    }

    #[test]
    fn test_remove_by_address() {
        let book = AddressBook::new();
        let a = NodeId::new();
        let b = NodeId::new();
        book.insert(a, TransportAddress::new("mem://g/1"));
        book.insert(b, TransportAddress::new("mem://g/2"));

        assert_eq!(book.remove_address(&TransportAddress::new("mem://g/2")), Some(b));
        assert_eq!(book.nodes(), vec![a]);
        assert!(book.remove_address(&TransportAddress::new("mem://g/9")).is_none());
    }

    #[test]
    fn test_rebinding_returns_previous_address() {
        let book = AddressBook::new();
        let node = NodeId::new();
        book.insert(node, TransportAddress::new("mem://g/1"));
        let previous = book.insert(node, TransportAddress::new("mem://g/7"));
        assert_eq!(previous, Some(TransportAddress::new("mem://g/1")));
        assert_eq!(book.len(), 1);
    }
}

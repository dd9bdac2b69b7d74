//! Runtime Identifiers
//!
//! Typed identifiers for nodes, actors and exported objects, plus the
//! `(node, actor, object)` triple that names the target of every far
//! reference. All identifiers are plain values: cheap to copy, hashable and
//! serializable so they can travel inside node protocol commands.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    id: Uuid,
}

impl NodeId {
    /// Create new node ID
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    /// Create from UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self { id }
    }

    /// Get UUID
    pub fn uuid(&self) -> Uuid {
        self.id
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.id.simple())
    }
}

/// Unique actor identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId {
    id: Uuid,
}

impl ActorId {
    /// Create new actor ID
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    /// Create from UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self { id }
    }

    /// Get UUID
    pub fn uuid(&self) -> Uuid {
        self.id
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor-{}", self.id.simple())
    }
}

/// Export identity of an object within its hosting actor
///
/// Derived from the object's identity (its allocation address) when it is
/// first exported, so exporting the same object twice yields the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj-{:x}", self.0)
    }
}

/// Identity triple of a far reference
///
/// Immutable once built. Two far references are equal exactly when their
/// triples are equal, regardless of which reference instance holds them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FarRefId {
    pub node: NodeId,
    pub actor: ActorId,
    pub object: ObjectId,
}

impl FarRefId {
    pub fn new(node: NodeId, actor: ActorId, object: ObjectId) -> Self {
        Self {
            node,
            actor,
            object,
        }
    }

    /// Whether the referenced object lives on `node`
    pub fn is_hosted_on(&self, node: &NodeId) -> bool {
        self.node == *node
    }
}

impl fmt::Display for FarRefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.node, self.actor, self.object)
    }
}

/// Network-unique identity of a service publication
///
/// Assigned by the publishing node from a local sequence, so a subscriber can
/// recognise the same publication arriving through different paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicationId {
    pub node: NodeId,
    pub sequence: u64,
}

impl PublicationId {
    pub fn new(node: NodeId, sequence: u64) -> Self {
        Self { node, sequence }
    }
}

impl fmt::Display for PublicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.node, self.sequence)
    }
}

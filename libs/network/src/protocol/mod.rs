//! Node Protocol
//!
//! Commands exchanged between nodes of one group. Every payload handed to the
//! group transport is exactly one bincode-encoded [`NodeCommand`]; there is no
//! additional framing. Type tags travel in serialized form and become
//! canonical again when decoded.

use crate::error::{Result, TransportError};
use crate::transports::{GroupTransport, TransportAddress};
use bytes::Bytes;
use codec::Envelope;
use serde::{Deserialize, Serialize};
use types::{ActorId, FarRefId, NodeId, ObjectId, PublicationId, TypeTag};

/// Upper bound on an encoded command
pub const MAX_COMMAND_SIZE: usize = 16 * 1024 * 1024;

/// A service publication as seen by other nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOffer {
    pub publication: PublicationId,
    pub owner: ActorId,
    pub topic: TypeTag,
    pub service: Envelope,
}

/// Node-to-node command set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeCommand {
    /// Announce the sender's identity after a membership change
    Handshake { node_id: NodeId },

    /// A new local publication, broadcast to the group
    ProvideService(ServiceOffer),

    /// A new open subscription, broadcast to the group
    RequireService { topic: TypeTag },

    /// Publications matching a requirement, sent back to the requester
    JoinServices { offers: Vec<ServiceOffer> },

    /// All open subscription topics of the sender, sent after a handshake
    InitRequireServices { topics: Vec<TypeTag> },

    /// The named object is no longer exported by its actor
    ObjectTakenOffline { object: FarRefId },

    /// A letter for an exported object on the receiving node
    DeliverMessage {
        sender: NodeId,
        sender_actor: Option<ActorId>,
        target: FarRefId,
        envelope: Envelope,
    },
}

impl NodeCommand {
    /// Encode for the group transport
    pub fn encode(&self) -> Result<Bytes> {
        let bytes = bincode::serialize(self)?;
        if bytes.len() > MAX_COMMAND_SIZE {
            return Err(TransportError::protocol(format!(
                "{} command of {} bytes exceeds limit of {} bytes",
                self.kind(),
                bytes.len(),
                MAX_COMMAND_SIZE
            )));
        }
        Ok(Bytes::from(bytes))
    }

    /// Decode a payload received from the group transport
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_COMMAND_SIZE {
            return Err(TransportError::protocol(format!(
                "payload of {} bytes exceeds limit of {} bytes",
                payload.len(),
                MAX_COMMAND_SIZE
            )));
        }
        bincode::deserialize(payload)
            .map_err(|e| TransportError::protocol_with_source("malformed node command", e))
    }

    /// Encoded size of the `DeliverMessage` that would carry `envelope`
    ///
    /// Measured without copying the payload, so a letter can be checked
    /// against [`MAX_COMMAND_SIZE`] when it is sealed.
    pub fn deliver_message_size(sender_actor: Option<ActorId>, envelope: &Envelope) -> Result<usize> {
        let empty = Envelope::from_parts(Bytes::new(), "", None);
        let frame = NodeCommand::DeliverMessage {
            sender: NodeId::new(),
            sender_actor,
            target: FarRefId::new(NodeId::new(), ActorId::new(), ObjectId::new(0)),
            envelope: empty.clone(),
        };
        let header = bincode::serialized_size(&frame)? - bincode::serialized_size(&empty)?;
        Ok((header + bincode::serialized_size(envelope)?) as usize)
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            NodeCommand::Handshake { .. } => "handshake",
            NodeCommand::ProvideService(_) => "provide_service",
            NodeCommand::RequireService { .. } => "require_service",
            NodeCommand::JoinServices { .. } => "join_services",
            NodeCommand::InitRequireServices { .. } => "init_require_services",
            NodeCommand::ObjectTakenOffline { .. } => "object_taken_offline",
            NodeCommand::DeliverMessage { .. } => "deliver_message",
        }
    }
}

/// A command together with where it goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Broadcast(NodeCommand),
    Unicast { to: TransportAddress, command: NodeCommand },
}

impl Outgoing {
    pub fn command(&self) -> &NodeCommand {
        match self {
            Outgoing::Broadcast(command) => command,
            Outgoing::Unicast { command, .. } => command,
        }
    }

    /// Encode and hand to `transport`
    pub async fn dispatch(&self, transport: &dyn GroupTransport) -> Result<()> {
        let payload = self.command().encode()?;
        match self {
            Outgoing::Broadcast(_) => transport.broadcast(payload).await,
            Outgoing::Unicast { to, .. } => transport.send(to, payload).await,
        }
    }
}

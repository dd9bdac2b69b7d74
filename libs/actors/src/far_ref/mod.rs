//! Far References
//!
//! The only way to reach an object owned by another actor. A far reference
//! never exposes its target directly; it accepts letters and guarantees they
//! are delivered in the order they were sent, at most one at a time per
//! reference. Two variants share nothing but their identity triple:
//!
//! - [`LocalFarReference`]: target actor lives on this node; delivery is a
//!   task submitted to the target's scheduler
//! - [`RemoteFarReference`]: target lives on another node; letters wait in an
//!   outbox served by the node's [`TransmissionPool`](crate::TransmissionPool)
//!
//! While disconnected both variants keep letters queued. Queued letters can be
//! taken back with `retract_unsent_messages`, which is atomic with respect to
//! an attempt in flight: a letter is either retracted or attempted, never
//! both.

use async_trait::async_trait;
use codec::{CodecError, Envelope, Passable};
use network::{NodeCommand, MAX_COMMAND_SIZE};
use std::fmt;
use std::sync::Arc;
use types::{ActorId, FarRefId, TypeTag};

pub mod listeners;
pub mod local;
pub mod remote;

pub use listeners::{Listener, ListenerHandle, ListenerRegistry};
pub use local::LocalFarReference;
pub use remote::RemoteFarReference;

/// A language value in flight
pub type Message = Arc<dyn Passable>;

/// A message sealed for one target
///
/// The envelope is produced once, when the letter is built, and never changes
/// afterwards; every transmission attempt sends the same bytes.
#[derive(Clone)]
pub struct Letter {
    sender: Option<ActorId>,
    message: Message,
    envelope: Arc<Envelope>,
}

impl Letter {
    /// Serialize `message` for `destination`
    ///
    /// Fails when the value refuses to pass or when the letter would not fit
    /// in one node command, wherever the destination lives.
    pub fn seal(sender: Option<ActorId>, message: Message, destination: ActorId) -> codec::Result<Self> {
        let envelope = Envelope::seal(message.as_ref(), Some(destination))?;
        let frame = NodeCommand::deliver_message_size(sender, &envelope)
            .map_err(|e| CodecError::encode("letter", e))?;
        if frame > MAX_COMMAND_SIZE {
            return Err(CodecError::encode(
                "letter",
                format!("frame of {} bytes exceeds limit of {} bytes", frame, MAX_COMMAND_SIZE),
            ));
        }
        Ok(Self {
            sender,
            message,
            envelope: Arc::new(envelope),
        })
    }

    pub fn sender(&self) -> Option<ActorId> {
        self.sender
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn envelope(&self) -> &Arc<Envelope> {
        &self.envelope
    }

    pub fn into_message(self) -> Message {
        self.message
    }
}

impl fmt::Debug for Letter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Letter")
            .field("sender", &self.sender)
            .field("envelope", &self.envelope.to_string())
            .finish()
    }
}

/// Connectivity transitions a reference can be told about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionChange {
    /// The target became unreachable; letters queue up
    Disconnected,
    /// The target is reachable again; queued letters flow in order
    Reconnected,
    /// The target object was withdrawn by its owner; permanent
    TakenOffline,
}

/// Common surface of both far-reference variants
#[async_trait]
pub trait FarReference: Send + Sync {
    /// Identity triple of the target
    fn id(&self) -> FarRefId;

    /// Capability tags the target declared
    fn type_tags(&self) -> &[TypeTag];

    /// Queue a sealed letter for delivery
    fn enqueue(&self, letter: Letter);

    /// Seal `message` and queue it, without sender attribution
    ///
    /// Serialization happens here, so a value that refuses to pass is
    /// reported to the caller and nothing is queued.
    fn send(&self, message: Message) -> codec::Result<()> {
        let letter = Letter::seal(None, message, self.id().actor)?;
        self.enqueue(letter);
        Ok(())
    }

    /// Make progress on queued letters if the reference is connected
    fn serve(&self);

    /// Remove and return every letter not yet handed to the network
    async fn retract_unsent_messages(&self) -> Vec<Message>;

    fn notify_connection_change(&self, change: ConnectionChange);

    fn is_connected(&self) -> bool;

    fn is_taken_offline(&self) -> bool;

    /// Letters currently waiting
    fn pending(&self) -> usize;
}

impl fmt::Debug for dyn FarReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FarReference")
            .field("id", &self.id())
            .field("connected", &self.is_connected())
            .finish()
    }
}

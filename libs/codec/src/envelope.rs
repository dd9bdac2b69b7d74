//! Wire Envelope
//!
//! An opaque, versionless payload plus a human readable description and an
//! optional destination actor. Envelopes are produced exactly once from a
//! value's passing hook and never mutated afterwards; far references share
//! them behind an `Arc` while a message waits in an outbox.

use crate::error::Result;
use crate::passing::{Passable, Resolvable};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use types::ActorId;

/// Serialized language value ready for transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    payload: Bytes,
    description: String,
    destination: Option<ActorId>,
}

impl Envelope {
    /// Serialize `value` through its passing hook
    pub fn seal(value: &dyn Passable, destination: Option<ActorId>) -> Result<Self> {
        let payload = value.pass_for_transport()?;
        let description = value.description();
        tracing::trace!(
            description = %description,
            payload_bytes = payload.len(),
            "Sealed envelope"
        );
        Ok(Self {
            payload,
            description,
            destination,
        })
    }

    /// Build an envelope around an already encoded payload
    pub fn from_parts(payload: Bytes, description: impl Into<String>, destination: Option<ActorId>) -> Self {
        Self {
            payload,
            description: description.into(),
            destination,
        }
    }

    /// Reconstitute the carried value through its resolving hook
    pub fn open<T: Resolvable>(&self) -> Result<T> {
        T::resolve_after_transport(&self.payload)
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn destination(&self) -> Option<ActorId> {
        self.destination
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.destination {
            Some(actor) => write!(f, "<{} → {}>", self.description, actor),
            None => write!(f, "<{}>", self.description),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;
    use types::TypeTag;

    struct Refuser;

    impl Passable for Refuser {
        fn pass_for_transport(&self) -> Result<Bytes> {
            Err(CodecError::refused("refuser", "never leaves its actor"))
        }
    }

    #[test]
    fn test_seal_and_open() {
        let actor = ActorId::new();
        let tag = TypeTag::new("Sensor");
        let envelope = Envelope::seal(&tag, Some(actor)).unwrap();

        assert_eq!(envelope.destination(), Some(actor));
        assert_eq!(envelope.description(), "type tag Sensor");
        assert_eq!(envelope.open::<TypeTag>().unwrap(), tag);
        assert!(envelope.to_string().contains("actor-"));
    }

    #[test]
    fn test_refusal_surfaces_at_seal_time() {
        let err = Envelope::seal(&Refuser, None).unwrap_err();
        assert!(err.is_refusal());
    }

    #[test]
    fn test_open_with_wrong_type_fails() {
        let envelope = Envelope::from_parts(Bytes::from_static(&[1, 2]), "junk", None);
        assert!(envelope.open::<String>().is_err());
        assert_eq!(envelope.len(), 2);
    }
}

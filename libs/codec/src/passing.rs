//! Value Passing Hooks
//!
//! The runtime never serializes language values itself. A value is asked to
//! pass itself for transport, and after transport the receiving side asks the
//! target type to resolve itself from the payload. The passing policy belongs
//! to the value:
//!
//! - **copy**: the hook encodes the value's own state (see [`pass_by_copy`])
//! - **proxy**: the hook encodes a stand-in, typically a [`FarRefId`] obtained
//!   by exporting the object from its hosting actor
//! - **refuse**: the hook returns [`CodecError::Refused`]

use crate::error::{CodecError, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use types::{FarRefId, TypeTag};

/// Outgoing half of the passing contract
pub trait Passable: Send + Sync + 'static {
    /// Produce the wire payload for this value, or refuse
    fn pass_for_transport(&self) -> Result<Bytes>;

    /// Human readable description carried next to the payload
    fn description(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Incoming half of the passing contract
pub trait Resolvable: Sized {
    /// Reconstitute a value from a payload produced by [`Passable`]
    fn resolve_after_transport(payload: &[u8]) -> Result<Self>;
}

/// Encode a serde value as its own wire form
pub fn pass_by_copy<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    bincode::serialize(value)
        .map(Bytes::from)
        .map_err(|e| CodecError::encode(std::any::type_name::<T>(), e))
}

/// Decode a value encoded with [`pass_by_copy`]
pub fn resolve_by_copy<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    bincode::deserialize(payload).map_err(|e| CodecError::decode(std::any::type_name::<T>(), e))
}

impl Passable for String {
    fn pass_for_transport(&self) -> Result<Bytes> {
        pass_by_copy(self)
    }

    fn description(&self) -> String {
        format!("string({} bytes)", self.len())
    }
}

impl Resolvable for String {
    fn resolve_after_transport(payload: &[u8]) -> Result<Self> {
        resolve_by_copy(payload)
    }
}

impl Passable for TypeTag {
    fn pass_for_transport(&self) -> Result<Bytes> {
        pass_by_copy(self)
    }

    fn description(&self) -> String {
        format!("type tag {}", self)
    }
}

impl Resolvable for TypeTag {
    fn resolve_after_transport(payload: &[u8]) -> Result<Self> {
        resolve_by_copy(payload)
    }
}

/// A far reference identity travels by copy; the receiving node turns it
/// back into a live reference.
impl Passable for FarRefId {
    fn pass_for_transport(&self) -> Result<Bytes> {
        pass_by_copy(self)
    }

    fn description(&self) -> String {
        format!("far reference {}", self)
    }
}

impl Resolvable for FarRefId {
    fn resolve_after_transport(payload: &[u8]) -> Result<Self> {
        resolve_by_copy(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Socket;

    impl Passable for Socket {
        fn pass_for_transport(&self) -> Result<Bytes> {
            Err(CodecError::refused(self.description(), "sockets are not serializable"))
        }

        fn description(&self) -> String {
            "socket".to_string()
        }
    }

    #[test]
    fn test_copy_roundtrip_for_type_tag() {
        let tag = TypeTag::new("Printer").extending(TypeTag::new("Device"));
        let payload = tag.pass_for_transport().unwrap();
        assert_eq!(TypeTag::resolve_after_transport(&payload).unwrap(), tag);
    }

    #[test]
    fn test_refusing_value() {
        let err = Socket.pass_for_transport().unwrap_err();
        assert!(err.is_refusal());
        assert!(err.to_string().contains("socket"));
    }

    #[test]
    fn test_garbage_payload_fails_to_resolve() {
        let err = TypeTag::resolve_after_transport(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, CodecError::Decode { .. }));
    }
}

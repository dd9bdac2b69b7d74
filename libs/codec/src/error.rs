//! Codec errors
//!
//! Serialization failures are surfaced synchronously to whichever operation
//! asked for serialization; they never affect other queued traffic.

use thiserror::Error;

/// Value passing and envelope errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The value's passing hook refused transmission
    #[error("Value refused to be passed: {description}: {reason}")]
    Refused { description: String, reason: String },

    /// Encoding into the wire form failed
    #[error("Encode error ({context}): {message}")]
    Encode { context: String, message: String },

    /// Payload could not be reconstituted
    #[error("Decode error ({context}): {message}")]
    Decode { context: String, message: String },
}

impl CodecError {
    /// Create a refusal error
    pub fn refused(description: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Refused {
            description: description.into(),
            reason: reason.into(),
        }
    }

    /// Create an encode error
    pub fn encode(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Encode {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a decode error
    pub fn decode(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Whether the failure came from a value's own passing policy
    pub fn is_refusal(&self) -> bool {
        matches!(self, Self::Refused { .. })
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;

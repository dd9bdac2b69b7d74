//! Transport Error Types
//!
//! Error handling for group membership, node-to-node sends and node protocol
//! encoding. Transient variants are recovered by the far-reference layer
//! (the affected reference goes to the disconnected state); they are never
//! surfaced to callers of an asynchronous send.

use crate::transports::TransportAddress;
use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// Destination is not a member of the current view
    #[error("Peer unreachable: {address}")]
    Unreachable { address: TransportAddress },

    /// Protocol and serialization errors
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Transport timeout errors
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Operation requires group membership
    #[error("Not joined to group '{group}'")]
    NotJoined { group: String },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create an unreachable-peer error
    pub fn unreachable(address: &TransportAddress) -> Self {
        Self::Unreachable {
            address: address.clone(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            source: None,
        }
    }

    /// Create a protocol error with source
    pub fn protocol_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Protocol {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a not-joined error
    pub fn not_joined(group: impl Into<String>) -> Self {
        Self::NotJoined { group: group.into() }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout { .. } => true,
            TransportError::Unreachable { .. } => false,
            TransportError::Protocol { .. } => false,
            TransportError::Configuration { .. } => false,
            TransportError::NotJoined { .. } => false,
        }
    }

    /// Get error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            TransportError::Unreachable { .. } => "unreachable",
            TransportError::Protocol { .. } => "protocol",
            TransportError::Configuration { .. } => "configuration",
            TransportError::Timeout { .. } => "timeout",
            TransportError::NotJoined { .. } => "not_joined",
        }
    }
}

// Custom Clone implementation since Box<dyn Error> doesn't implement Clone
impl Clone for TransportError {
    fn clone(&self) -> Self {
        match self {
            TransportError::Unreachable { address } => TransportError::Unreachable {
                address: address.clone(),
            },
            TransportError::Protocol { message, .. } => TransportError::Protocol {
                message: message.clone(),
                source: None,
            },
            TransportError::Configuration { message, field } => TransportError::Configuration {
                message: message.clone(),
                field: field.clone(),
            },
            TransportError::Timeout {
                operation,
                timeout_ms,
            } => TransportError::Timeout {
                operation: operation.clone(),
                timeout_ms: *timeout_ms,
            },
            TransportError::NotJoined { group } => TransportError::NotJoined { group: group.clone() },
        }
    }
}

impl From<bincode::Error> for TransportError {
    fn from(err: bincode::Error) -> Self {
        TransportError::protocol_with_source("bincode encoding failed", err)
    }
}

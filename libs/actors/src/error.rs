//! Actor Runtime Errors
//!
//! Transient network failures never show up here: they are absorbed by the
//! far-reference layer. What does surface is synchronous misuse (sending to
//! an unknown actor, serializing a value that refuses to pass) and
//! scheduler lifecycle problems.

use codec::CodecError;
use network::TransportError;
use thiserror::Error;
use types::{ActorId, FarRefId, NodeId};

/// Scheduler lifecycle and round-trip errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The loop no longer accepts tasks
    #[error("Scheduler '{name}' is stopped")]
    Stopped { name: String },

    /// A blocking round-trip was issued from the loop it targets
    #[error("Blocking round-trip onto scheduler '{name}' issued from its own loop")]
    Reentrant { name: String },

    /// The task panicked while running on the loop
    #[error("Task on scheduler '{name}' panicked: {message}")]
    TaskPanicked { name: String, message: String },

    /// The loop shut down before the task ran
    #[error("Task on scheduler '{name}' was dropped before it ran")]
    Dropped { name: String },

    /// No Tokio runtime was available to host the loop
    #[error("Scheduler '{name}' requires a Tokio runtime")]
    NoRuntime { name: String },
}

/// Main actor runtime error type
#[derive(Debug, Error)]
pub enum ActorError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("Actor {actor} is not hosted on this node")]
    ActorNotFound { actor: ActorId },

    #[error("Object {object} is not exported")]
    ObjectOffline { object: FarRefId },

    #[error("Node {node} is offline")]
    Offline { node: NodeId },

    #[error("Behavior error: {0}")]
    Behavior(String),
}

pub type Result<T> = std::result::Result<T, ActorError>;

impl ActorError {
    /// Get error category for logs
    pub fn category(&self) -> &'static str {
        match self {
            ActorError::Codec(_) => "codec",
            ActorError::Transport(e) => e.category(),
            ActorError::Scheduler(_) => "scheduler",
            ActorError::ActorNotFound { .. } => "actor_not_found",
            ActorError::ObjectOffline { .. } => "object_offline",
            ActorError::Offline { .. } => "offline",
            ActorError::Behavior(_) => "behavior",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions_keep_category() {
        let err: ActorError = CodecError::refused("socket", "not passable").into();
        assert_eq!(err.category(), "codec");

        let err: ActorError = SchedulerError::Stopped { name: "a".into() }.into();
        assert_eq!(err.to_string(), "Scheduler 'a' is stopped");

        let err: ActorError = TransportError::timeout("send", 5).into();
        assert_eq!(err.category(), "timeout");
    }
}

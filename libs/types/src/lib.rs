//! # Ambit Shared Types
//!
//! Identity vocabulary for the actor runtime:
//!
//! - [`NodeId`], [`ActorId`], [`ObjectId`] and the [`FarRefId`] triple that
//!   names the target of every far reference
//! - [`PublicationId`], the network-unique name of a published service
//! - [`TypeTag`], the structural capability label used by service discovery
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → libs/codec → libs/network → libs/actors
//!     ↑
//! Pure data: no I/O, no runtime
//! ```

pub mod ids;
pub mod type_tag;

pub use ids::{ActorId, FarRefId, NodeId, ObjectId, PublicationId};
pub use type_tag::{TypeTag, MAX_TAG_DEPTH};

//! Network Infrastructure
//!
//! Group membership and node-to-node traffic for the actor runtime:
//!
//! - [`transports`]: the [`GroupTransport`] trait and the in-memory group hub
//! - [`address_book`]: node identity to transport address bindings
//! - [`protocol`]: the [`NodeCommand`] set and its wire encoding
//!
//! Nothing in this crate knows about actors or far references; it moves
//! opaque envelopes between nodes on a best-effort basis.

pub mod address_book;
pub mod error;
pub mod protocol;
pub mod transports;

pub use address_book::AddressBook;
pub use error::{Result, TransportError};
pub use protocol::{NodeCommand, Outgoing, ServiceOffer, MAX_COMMAND_SIZE};
pub use transports::{GroupTransport, MemoryNetwork, MemoryTransport, TransportAddress, TransportEvent};

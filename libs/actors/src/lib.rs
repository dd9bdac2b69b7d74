//! Actor Runtime Core
//!
//! Concurrency and distribution core for an actor-based language runtime.
//! Every actor owns private state and a single-consumer scheduler; actors
//! talk only through asynchronous letters sent over far references, whether
//! the target lives in this process or on another node of the group.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── Node ─────────────────────────────┐
//! │                                                               │
//! │  Actor ──send──▶ LocalFarReference ──submit──▶ Actor loop     │
//! │    │                                                          │
//! │    └──send──▶ RemoteFarReference ──serve──▶ TransmissionPool  │
//! │                    ▲  outbox                      │           │
//! │                    │                              ▼           │
//! │          connection changes              GroupTransport ──────┼──▶ peers
//! │                    │                              │           │
//! │  AddressBook ◀── membership / handshake ◀─────────┘           │
//! │                                                               │
//! │  DiscoveryService (own loop): publish / subscribe / match     │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - tasks of one scheduler never run concurrently and run in submission order
//! - letters through one far reference are attempted in the order sent, one
//!   at a time
//! - a retracted letter is never attempted and an attempted letter is never
//!   retracted
//! - a transient network failure disconnects the affected reference only;
//!   its letters stay queued until reconnection or retraction
//!
//! # Example
//!
//! ```no_run
//! use messaging_actors::{ActorContext, Delivery, Node};
//! use network::MemoryNetwork;
//! use node_config::RuntimeConfig;
//! use std::sync::Arc;
//!
//! # async fn run() -> messaging_actors::Result<()> {
//! let network = MemoryNetwork::new();
//! let node = Node::new(RuntimeConfig::default(), Arc::new(network.transport("ambit")))?;
//! node.go_online().await?;
//!
//! let echo = node.spawn_actor(|_ctx: &ActorContext, delivery: Delivery| {
//!     println!("received {}", delivery.envelope);
//! })?;
//! let reference = node.far_reference(echo.reference_id(), vec![])?;
//! reference.send(Arc::new("hello".to_string()))?;
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod discovery;
pub mod error;
pub mod far_ref;
pub mod node;
pub mod registry;
pub mod scheduler;
pub mod transmission;

pub use actor::{Actor, ActorContext, ActorRoot, Behavior, Delivery};
pub use discovery::{
    DiscoveryEngine, DiscoveryService, PublicationHandle, ServiceHandler, SubscriptionHandle, SubscriptionId,
};
pub use error::{ActorError, Result, SchedulerError};
pub use far_ref::{
    ConnectionChange, FarReference, Letter, Listener, ListenerHandle, LocalFarReference, Message,
    RemoteFarReference,
};
pub use node::Node;
pub use registry::{Client, ExportRegistry, ExportedObject};
pub use scheduler::{Scheduler, SchedulerStats};
pub use transmission::{TransmissionPool, TransmissionStats};

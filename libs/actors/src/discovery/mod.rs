//! Publish/Subscribe Service Discovery
//!
//! Actors publish services under a structural [`TypeTag`](types::TypeTag)
//! and subscribe to the topics they need. A publication satisfies a
//! subscription when its topic is a subtype of the subscribed topic and the
//! two belong to different actors. Publications and subscriptions spread
//! across nodes through the node protocol; the engine itself is
//! network-agnostic.

pub mod engine;
pub mod service;

pub use engine::{DiscoveryEngine, Notification, ServiceHandler, Subscription, SubscriptionId, SubscriptionOutcome};
pub use service::{DiscoveryService, PublicationHandle, SubscriptionHandle};

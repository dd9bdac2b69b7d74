//! Actors
//!
//! An actor is a behavior plus the scheduler that serializes every access to
//! it. Nothing outside the actor's own loop ever touches the behavior; other
//! actors reach it only through far references to objects it exported.
//!
//! Each actor exports a root object when spawned, so every actor is
//! addressable from the moment it exists ([`Actor::reference_id`]).

use crate::discovery::{PublicationHandle, ServiceHandler, SubscriptionHandle};
use crate::error::{ActorError, Result};
use crate::far_ref::{FarReference, Letter, Message};
use crate::node::NodeShared;
use crate::registry::{Client, ExportRegistry, ExportedObject};
use crate::scheduler::Scheduler;
use codec::{Envelope, Passable};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};
use types::{ActorId, FarRefId, NodeId, ObjectId, TypeTag};

/// A letter arriving at one of the actor's exported objects
#[derive(Clone)]
pub struct Delivery {
    /// Exported object the letter was addressed to
    pub target: ObjectId,
    pub object: ExportedObject,
    pub envelope: Arc<Envelope>,
    /// Sending actor, when the sender attributed the letter
    pub sender: Option<ActorId>,
    /// Node the letter came from
    pub origin: NodeId,
}

impl Delivery {
    /// Downcast the target object
    pub fn object_as<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }
}

/// Actor logic; invoked only from the actor's own scheduler
pub trait Behavior: Send + 'static {
    fn receive(&mut self, ctx: &ActorContext, delivery: Delivery);

    fn on_start(&mut self, _ctx: &ActorContext) {}

    fn on_stop(&mut self, _ctx: &ActorContext) {}
}

impl<F> Behavior for F
where
    F: FnMut(&ActorContext, Delivery) + Send + 'static,
{
    fn receive(&mut self, ctx: &ActorContext, delivery: Delivery) {
        self(ctx, delivery)
    }
}

/// Root object every actor exports at spawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorRoot {
    pub actor: ActorId,
}

pub struct Actor {
    id: ActorId,
    node_id: NodeId,
    scheduler: Scheduler,
    exports: Arc<ExportRegistry>,
    behavior: Arc<Mutex<Box<dyn Behavior>>>,
    context: ActorContext,
    root: ObjectId,
}

impl std::fmt::Debug for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.id)
            .field("node_id", &self.node_id)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl Actor {
    pub(crate) fn new(
        id: ActorId,
        node_id: NodeId,
        scheduler: Scheduler,
        behavior: Box<dyn Behavior>,
        node: Weak<NodeShared>,
    ) -> Result<Arc<Self>> {
        let exports = Arc::new(ExportRegistry::new(id));
        let root: ExportedObject = Arc::new(ActorRoot { actor: id });
        let root = exports.export(&root);

        let context = ActorContext {
            actor: id,
            node_id,
            scheduler: scheduler.clone(),
            exports: Arc::clone(&exports),
            node,
        };
        let actor = Arc::new(Self {
            id,
            node_id,
            scheduler,
            exports,
            behavior: Arc::new(Mutex::new(behavior)),
            context,
            root,
        });

        let behavior = Arc::clone(&actor.behavior);
        let context = actor.context.clone();
        actor.scheduler.submit(move || behavior.lock().on_start(&context))?;
        Ok(actor)
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn exports(&self) -> &Arc<ExportRegistry> {
        &self.exports
    }

    pub fn context(&self) -> &ActorContext {
        &self.context
    }

    /// Far reference identity of the actor's root object
    pub fn reference_id(&self) -> FarRefId {
        FarRefId::new(self.node_id, self.id, self.root)
    }

    /// Export `object` from this actor
    pub fn export(&self, object: &ExportedObject) -> FarRefId {
        FarRefId::new(self.node_id, self.id, self.exports.export(object))
    }

    /// Queue a letter for `object` on the actor's scheduler
    ///
    /// Fails without queuing anything when the object is not exported or the
    /// actor has stopped. The sender is recorded as a client either way.
    pub fn accept(
        &self,
        object: ObjectId,
        envelope: Arc<Envelope>,
        sender: Option<ActorId>,
        origin: NodeId,
    ) -> Result<()> {
        self.exports.record_client(object, Client { node: origin, actor: sender });
        let target = self.exports.resolve(object).ok_or(ActorError::ObjectOffline {
            object: FarRefId::new(self.node_id, self.id, object),
        })?;

        let delivery = Delivery {
            target: object,
            object: target,
            envelope,
            sender,
            origin,
        };
        let behavior = Arc::clone(&self.behavior);
        let context = self.context.clone();
        self.scheduler.submit(move || {
            trace!(actor_id = %context.actor, object_id = %delivery.target, "Delivering letter");
            behavior.lock().receive(&context, delivery);
        })?;
        Ok(())
    }

    /// Run the stop hook, then stop the loop
    pub(crate) fn stop(&self) {
        let behavior = Arc::clone(&self.behavior);
        let context = self.context.clone();
        let scheduler = self.scheduler.clone();
        let submitted = self.scheduler.submit(move || {
            behavior.lock().on_stop(&context);
            scheduler.stop();
        });
        if submitted.is_err() {
            self.scheduler.stop();
        }
        debug!(actor_id = %self.id, "Actor stopping");
    }
}

/// Capabilities handed to a behavior
#[derive(Clone)]
pub struct ActorContext {
    actor: ActorId,
    node_id: NodeId,
    scheduler: Scheduler,
    exports: Arc<ExportRegistry>,
    node: Weak<NodeShared>,
}

impl ActorContext {
    pub fn actor_id(&self) -> ActorId {
        self.actor
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    fn node(&self) -> Result<Arc<NodeShared>> {
        self.node.upgrade().ok_or(ActorError::Offline { node: self.node_id })
    }

    /// Export `object`, returning the identity others use to reach it
    pub fn export(&self, object: &ExportedObject) -> FarRefId {
        FarRefId::new(self.node_id, self.actor, self.exports.export(object))
    }

    /// Withdraw an exported object and tell its clients
    pub fn take_offline(&self, object: ObjectId) -> Result<bool> {
        self.node()?.take_offline(self.actor, object)
    }

    /// Resolve a far reference to `id`
    pub fn far_reference(&self, id: FarRefId, type_tags: Vec<TypeTag>) -> Result<Arc<dyn FarReference>> {
        self.node()?.far_reference(id, type_tags)
    }

    /// Send `message` through `target`, attributed to this actor
    pub fn send(&self, target: &dyn FarReference, message: Message) -> Result<()> {
        let letter = Letter::seal(Some(self.actor), message, target.id().actor)?;
        target.enqueue(letter);
        Ok(())
    }

    /// Publish `service` under `topic`
    pub fn publish(&self, topic: TypeTag, service: &dyn Passable) -> Result<PublicationHandle> {
        self.node()?.publish(self.actor, topic, service)
    }

    /// Subscribe to services of `topic`; `handler` runs on this actor's loop
    pub fn subscribe(
        &self,
        topic: TypeTag,
        handler: Arc<dyn ServiceHandler>,
        permanent: bool,
    ) -> Result<SubscriptionHandle> {
        let node = self.node()?;
        Ok(node
            .discovery
            .subscribe(self.actor, self.scheduler.clone(), topic, handler, permanent)?)
    }
}

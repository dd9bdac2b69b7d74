//! Node Runtime
//!
//! One process-level participant in the group. The node owns its identity,
//! the address book, the membership transport, the transmission pool, the
//! discovery service and the actors it hosts. Membership events and inbound
//! commands are forwarded into the node's own scheduler and handled there
//! one at a time; outbound commands leave through a single ordered channel.
//!
//! # Membership
//!
//! - peer joined (not ourselves): send `Handshake` with our identity
//! - `Handshake` received: bind node to address, reconnect remote references
//!   to that node, send our open subscription topics
//! - peer left: drop the address-book entry first, then disconnect every
//!   remote reference to that node
//!
//! The address book is always updated before any reference hears about the
//! change, so a reconnected reference finds its address and a disconnected
//! one cannot.

use crate::actor::{Actor, Behavior};
use crate::discovery::{DiscoveryService, PublicationHandle, ServiceHandler, SubscriptionHandle};
use crate::error::{ActorError, Result, SchedulerError};
use crate::far_ref::{ConnectionChange, FarReference, LocalFarReference, RemoteFarReference};
use crate::scheduler::Scheduler;
use crate::transmission::{TransmissionPool, TransmissionStats};
use codec::{Envelope, Passable};
use network::{
    AddressBook, GroupTransport, NodeCommand, Outgoing, ServiceOffer, TransportAddress, TransportEvent,
};
use node_config::RuntimeConfig;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use types::{ActorId, FarRefId, NodeId, ObjectId, TypeTag};

/// State shared by the node handle, its tasks and its actors' contexts
pub(crate) struct NodeShared {
    id: NodeId,
    label: String,
    config: RuntimeConfig,
    runtime: Handle,
    scheduler: Scheduler,
    address_book: Arc<AddressBook>,
    transport: Arc<dyn GroupTransport>,
    pool: Arc<TransmissionPool>,
    pub(crate) discovery: DiscoveryService,
    outbound: mpsc::UnboundedSender<Outgoing>,
    actors: RwLock<HashMap<ActorId, Arc<Actor>>>,
    remote_refs: Mutex<HashMap<FarRefId, Arc<RemoteFarReference>>>,
    local_address: RwLock<Option<TransportAddress>>,
    event_pump: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running node; cheap to clone
#[derive(Clone)]
pub struct Node {
    shared: Arc<NodeShared>,
}

impl Node {
    /// Build a node on the current Tokio runtime
    ///
    /// The node is offline until [`go_online`](Self::go_online).
    pub fn new(config: RuntimeConfig, transport: Arc<dyn GroupTransport>) -> Result<Self> {
        let id = NodeId::new();
        let prefix = config.scheduler.name_prefix.clone();
        let label = config.node.name.clone().unwrap_or_else(|| id.to_string());

        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime {
            name: format!("{}-node-{}", prefix, label),
        })?;
        let scheduler = Scheduler::with_handle(format!("{}-node-{}", prefix, label), &runtime);
        let address_book = Arc::new(AddressBook::new());
        let pool = TransmissionPool::new(
            id,
            Arc::clone(&address_book),
            Arc::clone(&transport),
            config.transmission.clone(),
            runtime.clone(),
        );

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let discovery = DiscoveryService::new(
            id,
            Scheduler::with_handle(format!("{}-discovery-{}", prefix, label), &runtime),
            outbound.clone(),
        );
        runtime.spawn(run_outbound(Arc::clone(&transport), outbound_rx, label.clone()));

        info!(node_id = %id, group = %config.node.group, label = %label, "Node created");
        Ok(Self {
            shared: Arc::new(NodeShared {
                id,
                label,
                config,
                runtime,
                scheduler,
                address_book,
                transport,
                pool,
                discovery,
                outbound,
                actors: RwLock::new(HashMap::new()),
                remote_refs: Mutex::new(HashMap::new()),
                local_address: RwLock::new(None),
                event_pump: Mutex::new(None),
            }),
        })
    }

    pub fn id(&self) -> NodeId {
        self.shared.id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.shared.scheduler
    }

    pub fn address_book(&self) -> &Arc<AddressBook> {
        &self.shared.address_book
    }

    pub fn discovery(&self) -> &DiscoveryService {
        &self.shared.discovery
    }

    pub fn local_address(&self) -> Option<TransportAddress> {
        self.shared.local_address.read().clone()
    }

    pub fn is_online(&self) -> bool {
        self.shared.local_address.read().is_some()
    }

    pub fn transmission_stats(&self) -> TransmissionStats {
        self.shared.pool.stats()
    }

    pub fn pool(&self) -> &Arc<TransmissionPool> {
        &self.shared.pool
    }

    /// Join the group and start handling membership events
    pub async fn go_online(&self) -> Result<TransportAddress> {
        let (address, mut events) = self.shared.transport.join().await?;
        *self.shared.local_address.write() = Some(address.clone());

        let weak = Arc::downgrade(&self.shared);
        let pump = self.shared.runtime.spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(node) = weak.upgrade() else {
                    break;
                };
                let handler = Arc::clone(&node);
                if node.scheduler.submit(move || handler.handle_event(event)).is_err() {
                    break;
                }
            }
        });
        if let Some(previous) = self.shared.event_pump.lock().replace(pump) {
            previous.abort();
        }

        info!(node_id = %self.shared.id, address = %address, "Node online");
        Ok(address)
    }

    /// Leave the group; every remote reference becomes disconnected
    pub async fn go_offline(&self) -> Result<()> {
        self.shared.transport.leave().await?;
        *self.shared.local_address.write() = None;
        if let Some(pump) = self.shared.event_pump.lock().take() {
            pump.abort();
        }

        self.shared.address_book.clear();
        let references: Vec<_> = self.shared.remote_refs.lock().values().cloned().collect();
        for reference in references {
            reference.notify_connection_change(ConnectionChange::Disconnected);
        }
        info!(node_id = %self.shared.id, "Node offline");
        Ok(())
    }

    /// Go offline and stop every loop the node owns
    pub async fn shutdown(&self) -> Result<()> {
        if self.is_online() {
            self.go_offline().await?;
        }
        let actors: Vec<_> = self.shared.actors.write().drain().map(|(_, actor)| actor).collect();
        for actor in actors {
            actor.stop();
        }
        self.shared.discovery.stop();
        self.shared.scheduler.stop();
        info!(node_id = %self.shared.id, "Node shut down");
        Ok(())
    }

    /// Host a new actor on this node
    pub fn spawn_actor(&self, behavior: impl Behavior) -> Result<Arc<Actor>> {
        let id = ActorId::new();
        let scheduler = Scheduler::with_handle(
            format!("{}-actor-{}", self.shared.config.scheduler.name_prefix, id),
            &self.shared.runtime,
        );
        let actor = Actor::new(
            id,
            self.shared.id,
            scheduler,
            Box::new(behavior),
            Arc::downgrade(&self.shared),
        )?;
        self.shared.actors.write().insert(id, Arc::clone(&actor));
        debug!(node_id = %self.shared.id, actor_id = %id, "Actor spawned");
        Ok(actor)
    }

    /// Stop and forget an actor; its objects become unreachable
    pub fn dispose_actor(&self, id: ActorId) -> Result<()> {
        let actor = self
            .shared
            .actors
            .write()
            .remove(&id)
            .ok_or(ActorError::ActorNotFound { actor: id })?;
        actor.stop();
        debug!(node_id = %self.shared.id, actor_id = %id, "Actor disposed");
        Ok(())
    }

    pub fn actor(&self, id: ActorId) -> Option<Arc<Actor>> {
        self.shared.actors.read().get(&id).cloned()
    }

    pub fn actor_ids(&self) -> Vec<ActorId> {
        self.shared.actors.read().keys().copied().collect()
    }

    /// Resolve a far reference: local variant for objects hosted here,
    /// shared remote variant otherwise
    pub fn far_reference(&self, id: FarRefId, type_tags: Vec<TypeTag>) -> Result<Arc<dyn FarReference>> {
        self.shared.far_reference(id, type_tags)
    }

    /// The remote reference for `id`, created on first use
    ///
    /// Exposes the listener API. Fails for objects hosted on this node.
    pub fn remote_reference(&self, id: FarRefId, type_tags: Vec<TypeTag>) -> Result<Arc<RemoteFarReference>> {
        if id.is_hosted_on(&self.shared.id) {
            return Err(ActorError::Behavior(format!("{} is hosted on this node", id)));
        }
        Ok(self.shared.remote_reference(id, type_tags))
    }

    /// Publish `service` under `topic` on behalf of `owner`
    pub fn publish(&self, owner: ActorId, topic: TypeTag, service: &dyn Passable) -> Result<PublicationHandle> {
        self.shared.publish(owner, topic, service)
    }

    /// Subscribe `owner` to `topic`; `handler` runs on the owner's loop
    pub fn subscribe(
        &self,
        owner: ActorId,
        topic: TypeTag,
        handler: Arc<dyn ServiceHandler>,
        permanent: bool,
    ) -> Result<SubscriptionHandle> {
        let actor = self.actor(owner).ok_or(ActorError::ActorNotFound { actor: owner })?;
        Ok(self
            .shared
            .discovery
            .subscribe(owner, actor.scheduler().clone(), topic, handler, permanent)?)
    }

    /// Remote references currently tracked by this node
    pub fn remote_reference_count(&self) -> usize {
        self.shared.remote_refs.lock().len()
    }

    /// Withdraw an object exported by one of this node's actors
    pub fn take_offline(&self, actor: ActorId, object: ObjectId) -> Result<bool> {
        self.shared.take_offline(actor, object)
    }

    /// Tell `target` (or everyone, when absent) that `id` is gone
    pub fn object_taken_offline(&self, id: FarRefId, target: Option<NodeId>) {
        self.shared.object_taken_offline(id, target)
    }
}

async fn run_outbound(
    transport: Arc<dyn GroupTransport>,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
    label: String,
) {
    while let Some(outgoing) = outbound.recv().await {
        if let Err(e) = outgoing.dispatch(transport.as_ref()).await {
            debug!(
                node = %label,
                command = outgoing.command().kind(),
                error = %e,
                "Outbound command not delivered"
            );
        }
    }
    trace!(node = %label, "Outbound channel closed");
}

fn is_retired(reference: &RemoteFarReference) -> bool {
    reference.is_taken_offline() && reference.pending() == 0
}

impl NodeShared {
    fn emit(&self, outgoing: Outgoing) {
        if self.outbound.send(outgoing).is_err() {
            warn!(node_id = %self.id, "Outbound channel closed");
        }
    }

    fn unicast(&self, to: TransportAddress, command: NodeCommand) {
        self.emit(Outgoing::Unicast { to, command });
    }

    fn remote_refs_to(&self, node: NodeId) -> Vec<Arc<RemoteFarReference>> {
        self.remote_refs
            .lock()
            .values()
            .filter(|reference| reference.id().is_hosted_on(&node))
            .cloned()
            .collect()
    }

    pub(crate) fn far_reference(&self, id: FarRefId, type_tags: Vec<TypeTag>) -> Result<Arc<dyn FarReference>> {
        if id.is_hosted_on(&self.id) {
            let actor = self
                .actors
                .read()
                .get(&id.actor)
                .cloned()
                .ok_or(ActorError::ActorNotFound { actor: id.actor })?;
            return Ok(Arc::new(LocalFarReference::new(id, type_tags, actor)));
        }
        Ok(self.remote_reference(id, type_tags))
    }

    fn remote_reference(&self, id: FarRefId, type_tags: Vec<TypeTag>) -> Arc<RemoteFarReference> {
        let mut references = self.remote_refs.lock();
        if let Some(reference) = references.get(&id) {
            return Arc::clone(reference);
        }

        // references retracted after going offline are swept on insertion
        references.retain(|_, reference| !is_retired(reference));
        let connected = self.address_book.is_reachable(&id.node);
        debug!(far_ref = %id, connected, "Remote reference created");
        let reference = RemoteFarReference::new(id, type_tags, Arc::clone(&self.pool), connected);
        references.insert(id, Arc::clone(&reference));
        reference
    }

    /// Forget `id` once it is taken offline and holds no letters
    fn evict_retired(&self, id: FarRefId) {
        let mut references = self.remote_refs.lock();
        if references.get(&id).is_some_and(|reference| is_retired(reference)) {
            references.remove(&id);
            debug!(node_id = %self.id, far_ref = %id, "Remote reference evicted");
        }
    }

    pub(crate) fn publish(&self, owner: ActorId, topic: TypeTag, service: &dyn Passable) -> Result<PublicationHandle> {
        if !self.actors.read().contains_key(&owner) {
            return Err(ActorError::ActorNotFound { actor: owner });
        }
        let envelope = Envelope::seal(service, None)?;
        Ok(self.discovery.publish(owner, topic, envelope)?)
    }

    pub(crate) fn take_offline(&self, actor: ActorId, object: ObjectId) -> Result<bool> {
        let host = self
            .actors
            .read()
            .get(&actor)
            .cloned()
            .ok_or(ActorError::ActorNotFound { actor })?;
        let Some(clients) = host.exports().take_offline(object) else {
            return Ok(false);
        };

        let id = FarRefId::new(self.id, actor, object);
        let nodes: BTreeSet<NodeId> = clients
            .iter()
            .map(|client| client.node)
            .filter(|node| *node != self.id)
            .collect();
        if nodes.is_empty() {
            self.object_taken_offline(id, None);
        } else {
            for node in nodes {
                self.object_taken_offline(id, Some(node));
            }
        }
        Ok(true)
    }

    pub(crate) fn object_taken_offline(&self, id: FarRefId, target: Option<NodeId>) {
        let command = NodeCommand::ObjectTakenOffline { object: id };
        match target {
            None => self.emit(Outgoing::Broadcast(command)),
            Some(node) => match self.address_book.lookup(&node) {
                Some(address) => self.unicast(address, command),
                None => debug!(far_ref = %id, node_id = %node, "Client node unreachable; not notified"),
            },
        }
    }

    fn handle_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::PeerJoined(address) => {
                if self.local_address.read().as_ref() == Some(&address) {
                    return;
                }
                trace!(node_id = %self.id, peer = %address, "Peer joined; sending handshake");
                self.unicast(address, NodeCommand::Handshake { node_id: self.id });
            }
            TransportEvent::PeerLeft(address) => {
                let Some(node) = self.address_book.remove_address(&address) else {
                    return;
                };
                info!(node_id = %self.id, peer = %node, address = %address, "Peer left");
                for reference in self.remote_refs_to(node) {
                    reference.notify_connection_change(ConnectionChange::Disconnected);
                }
            }
            TransportEvent::Received { from, payload } => match NodeCommand::decode(&payload) {
                Ok(command) => self.handle_command(from, command),
                Err(e) => warn!(node_id = %self.id, peer = %from, error = %e, "Ignoring malformed command"),
            },
        }
    }

    fn handle_command(self: &Arc<Self>, from: TransportAddress, command: NodeCommand) {
        trace!(node_id = %self.id, peer = %from, command = command.kind(), "Command received");
        match command {
            NodeCommand::Handshake { node_id } => self.handle_handshake(from, node_id),
            NodeCommand::ProvideService(offer) => self.notify_external(offer),
            NodeCommand::RequireService { topic } => self.answer_requirements(from, vec![topic]),
            NodeCommand::InitRequireServices { topics } => self.answer_requirements(from, topics),
            NodeCommand::JoinServices { offers } => {
                for offer in offers {
                    self.notify_external(offer);
                }
            }
            NodeCommand::ObjectTakenOffline { object } => {
                let reference = self.remote_refs.lock().get(&object).cloned();
                if let Some(reference) = reference {
                    reference.notify_connection_change(ConnectionChange::TakenOffline);
                    self.evict_retired(object);
                }
            }
            NodeCommand::DeliverMessage {
                sender,
                sender_actor,
                target,
                envelope,
            } => self.deliver(from, sender, sender_actor, target, envelope),
        }
    }

    fn handle_handshake(self: &Arc<Self>, from: TransportAddress, node_id: NodeId) {
        if node_id == self.id {
            return;
        }
        let previous = self.address_book.insert(node_id, from.clone());
        if previous.is_none() {
            info!(node_id = %self.id, peer = %node_id, address = %from, "Handshake completed");
        }
        for reference in self.remote_refs_to(node_id) {
            reference.notify_connection_change(ConnectionChange::Reconnected);
        }

        let shared = Arc::clone(self);
        let submitted = self.discovery.with_open_topics(move |topics| {
            if !topics.is_empty() {
                shared.unicast(from, NodeCommand::InitRequireServices { topics });
            }
        });
        if let Err(e) = submitted {
            warn!(node_id = %self.id, error = %e, "Discovery service not running");
        }
    }

    fn notify_external(&self, offer: ServiceOffer) {
        if offer.publication.node == self.id {
            return;
        }
        if let Err(e) = self.discovery.notify_external_publication(offer) {
            warn!(node_id = %self.id, error = %e, "Discovery service not running");
        }
    }

    fn answer_requirements(self: &Arc<Self>, from: TransportAddress, topics: Vec<TypeTag>) {
        let shared = Arc::clone(self);
        let submitted = self.discovery.answer_requirements(topics, move |offers| {
            if !offers.is_empty() {
                shared.unicast(from, NodeCommand::JoinServices { offers });
            }
        });
        if let Err(e) = submitted {
            warn!(node_id = %self.id, error = %e, "Discovery service not running");
        }
    }

    fn deliver(
        &self,
        from: TransportAddress,
        sender: NodeId,
        sender_actor: Option<ActorId>,
        target: FarRefId,
        envelope: Envelope,
    ) {
        if !target.is_hosted_on(&self.id) {
            warn!(node_id = %self.id, far_ref = %target, "Letter for another node dropped");
            return;
        }

        let actor = self.actors.read().get(&target.actor).cloned();
        let outcome = match actor {
            Some(actor) => actor.accept(target.object, Arc::new(envelope), sender_actor, sender),
            None => Err(ActorError::ActorNotFound { actor: target.actor }),
        };
        if let Err(e) = outcome {
            debug!(far_ref = %target, error = %e, "Target unavailable; telling sender");
            self.unicast(from, NodeCommand::ObjectTakenOffline { object: target });
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.shared.id)
            .field("label", &self.shared.label)
            .field("online", &self.is_online())
            .finish()
    }
}

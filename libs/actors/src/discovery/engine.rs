//! Discovery matching engine
//!
//! Pure bookkeeping: local publications, open subscriptions and the rules
//! that pair them. Every mutating operation returns the notifications it
//! produced; delivering them is the caller's job.
//!
//! Matching rules:
//! - `offer.topic <: subscription.topic`, never the other way around
//! - a subscription never matches a publication of its own owner
//! - a subscription hears about a given publication at most once
//! - a non-permanent subscription is removed after its first notification

use crate::scheduler::Scheduler;
use network::ServiceOffer;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use types::{ActorId, PublicationId, TypeTag};

/// Receives services matching a subscription; runs on the subscriber's scheduler
pub trait ServiceHandler: Send + Sync + 'static {
    fn service_found(&self, offer: ServiceOffer);
}

impl<F> ServiceHandler for F
where
    F: Fn(ServiceOffer) + Send + Sync + 'static,
{
    fn service_found(&self, offer: ServiceOffer) {
        self(offer)
    }
}

/// Node-local subscription identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

pub struct Subscription {
    pub id: SubscriptionId,
    pub owner: ActorId,
    pub owner_scheduler: Scheduler,
    pub topic: TypeTag,
    pub handler: Arc<dyn ServiceHandler>,
    pub permanent: bool,
    seen: HashSet<PublicationId>,
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        owner: ActorId,
        owner_scheduler: Scheduler,
        topic: TypeTag,
        handler: Arc<dyn ServiceHandler>,
        permanent: bool,
    ) -> Self {
        Self {
            id,
            owner,
            owner_scheduler,
            topic,
            handler,
            permanent,
            seen: HashSet::new(),
        }
    }

    fn matches(&self, offer: &ServiceOffer) -> bool {
        self.owner != offer.owner
            && offer.topic.is_subtype_of(&self.topic)
            && !self.seen.contains(&offer.publication)
    }

    fn notify(&mut self, offer: &ServiceOffer) -> Notification {
        self.seen.insert(offer.publication);
        Notification {
            subscription: self.id,
            scheduler: self.owner_scheduler.clone(),
            handler: Arc::clone(&self.handler),
            offer: offer.clone(),
        }
    }
}

/// A handler invocation waiting to be submitted
pub struct Notification {
    pub subscription: SubscriptionId,
    scheduler: Scheduler,
    handler: Arc<dyn ServiceHandler>,
    pub offer: ServiceOffer,
}

impl Notification {
    /// Run the handler as a task on the subscriber's scheduler
    pub fn deliver(self) {
        let Notification {
            subscription,
            scheduler,
            handler,
            offer,
        } = self;
        let publication = offer.publication;
        if let Err(e) = scheduler.submit(move || handler.service_found(offer)) {
            warn!(%subscription, %publication, error = %e, "Subscriber no longer running");
        }
    }
}

/// Result of registering a subscription
pub struct SubscriptionOutcome {
    pub notifications: Vec<Notification>,
    /// Whether the subscription stays open (and should be announced)
    pub stored: bool,
}

#[derive(Default)]
pub struct DiscoveryEngine {
    publications: BTreeMap<PublicationId, ServiceOffer>,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
}

impl DiscoveryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a local publication and notify matching local subscriptions
    pub fn add_publication(&mut self, offer: ServiceOffer) -> Vec<Notification> {
        let notifications = self.match_subscriptions(&offer);
        debug!(
            publication = %offer.publication,
            topic = %offer.topic,
            notified = notifications.len(),
            "Publication added"
        );
        self.publications.insert(offer.publication, offer);
        notifications
    }

    /// Register a subscription against the local publications
    ///
    /// A non-permanent subscription that is satisfied right away fires once
    /// and is not stored.
    pub fn add_subscription(&mut self, mut subscription: Subscription) -> SubscriptionOutcome {
        let matching: Vec<&ServiceOffer> = self
            .publications
            .values()
            .filter(|offer| subscription.matches(offer))
            .collect();

        let mut notifications = Vec::new();
        if subscription.permanent {
            for offer in matching {
                notifications.push(subscription.notify(offer));
            }
        } else if let Some(offer) = matching.first() {
            notifications.push(subscription.notify(offer));
            debug!(subscription = %subscription.id, "One-shot subscription satisfied locally");
            return SubscriptionOutcome {
                notifications,
                stored: false,
            };
        }

        debug!(
            subscription = %subscription.id,
            topic = %subscription.topic,
            permanent = subscription.permanent,
            notified = notifications.len(),
            "Subscription added"
        );
        self.subscriptions.insert(subscription.id, subscription);
        SubscriptionOutcome {
            notifications,
            stored: true,
        }
    }

    /// A publication from another node became known
    pub fn notify_external_publication(&mut self, offer: &ServiceOffer) -> Vec<Notification> {
        self.match_subscriptions(offer)
    }

    /// Local publications whose topic is a subtype of `topic`
    pub fn local_publications_matching(&self, topic: &TypeTag) -> Vec<ServiceOffer> {
        self.publications
            .values()
            .filter(|offer| offer.topic.is_subtype_of(topic))
            .cloned()
            .collect()
    }

    /// Topics of all open subscriptions, deduplicated by canonical form
    pub fn all_open_subscription_topics(&self) -> Vec<TypeTag> {
        self.subscriptions
            .values()
            .map(|subscription| subscription.topic.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Remove a publication; nobody is notified
    pub fn delete_publication(&mut self, id: &PublicationId) -> bool {
        self.publications.remove(id).is_some()
    }

    /// Remove a subscription; nobody is notified
    pub fn delete_subscription(&mut self, id: &SubscriptionId) -> bool {
        self.subscriptions.remove(id).is_some()
    }

    pub fn publication_count(&self) -> usize {
        self.publications.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    fn match_subscriptions(&mut self, offer: &ServiceOffer) -> Vec<Notification> {
        let mut notifications = Vec::new();
        let mut satisfied = Vec::new();

        for (id, subscription) in self.subscriptions.iter_mut() {
            if !subscription.matches(offer) {
                continue;
            }
            notifications.push(subscription.notify(offer));
            if !subscription.permanent {
                satisfied.push(*id);
            }
        }
        for id in satisfied {
            self.subscriptions.remove(&id);
        }
        notifications
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use codec::Envelope;
    use types::NodeId;

    fn device() -> TypeTag {
        TypeTag::new("Device")
    }

    fn sensor() -> TypeTag {
        TypeTag::new("Sensor").extending(device())
    }

    fn offer(owner: ActorId, topic: TypeTag, sequence: u64) -> ServiceOffer {
        ServiceOffer {
            publication: PublicationId::new(NodeId::new(), sequence),
            owner,
            topic,
            service: Envelope::from_parts(Bytes::from_static(b"svc"), "service", None),
        }
    }

    fn subscription(id: u64, owner: ActorId, scheduler: &Scheduler, topic: TypeTag, permanent: bool) -> Subscription {
        Subscription::new(
            SubscriptionId::new(id),
            owner,
            scheduler.clone(),
            topic,
            Arc::new(|_offer: ServiceOffer| {}),
            permanent,
        )
    }

    #[tokio::test]
    async fn test_subtype_matches_only_one_way() {
        let scheduler = Scheduler::new("engine").unwrap();
        let mut engine = DiscoveryEngine::new();

        let outcome = engine.add_subscription(subscription(1, ActorId::new(), &scheduler, device(), true));
        assert!(outcome.notifications.is_empty());
        assert_eq!(engine.add_publication(offer(ActorId::new(), sensor(), 1)).len(), 1);

        let mut engine = DiscoveryEngine::new();
        engine.add_subscription(subscription(1, ActorId::new(), &scheduler, sensor(), true));
        assert!(engine.add_publication(offer(ActorId::new(), device(), 1)).is_empty());
    }

    #[tokio::test]
    async fn test_same_owner_never_matches() {
        let scheduler = Scheduler::new("engine").unwrap();
        let owner = ActorId::new();
        let mut engine = DiscoveryEngine::new();

        engine.add_publication(offer(owner, sensor(), 1));
        let outcome = engine.add_subscription(subscription(1, owner, &scheduler, device(), false));
        assert!(outcome.notifications.is_empty());
        assert!(outcome.stored);
    }

    #[tokio::test]
    async fn test_one_shot_satisfied_at_registration_is_not_stored() {
        let scheduler = Scheduler::new("engine").unwrap();
        let mut engine = DiscoveryEngine::new();
        engine.add_publication(offer(ActorId::new(), sensor(), 1));
        engine.add_publication(offer(ActorId::new(), sensor(), 2));

        let outcome = engine.add_subscription(subscription(1, ActorId::new(), &scheduler, device(), false));
        assert_eq!(outcome.notifications.len(), 1);
        assert!(!outcome.stored);
        assert_eq!(engine.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_one_shot_removed_after_first_external_match() {
        let scheduler = Scheduler::new("engine").unwrap();
        let mut engine = DiscoveryEngine::new();
        engine.add_subscription(subscription(1, ActorId::new(), &scheduler, device(), false));

        assert_eq!(engine.notify_external_publication(&offer(ActorId::new(), sensor(), 1)).len(), 1);
        assert!(engine.notify_external_publication(&offer(ActorId::new(), sensor(), 2)).is_empty());
        assert_eq!(engine.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_same_publication_notifies_once() {
        let scheduler = Scheduler::new("engine").unwrap();
        let mut engine = DiscoveryEngine::new();
        engine.add_subscription(subscription(1, ActorId::new(), &scheduler, device(), true));

        let printer = offer(ActorId::new(), sensor(), 1);
        assert_eq!(engine.notify_external_publication(&printer).len(), 1);
        assert!(engine.notify_external_publication(&printer).is_empty());
    }

    #[tokio::test]
    async fn test_open_topics_are_deduplicated_and_deletes_are_silent() {
        let scheduler = Scheduler::new("engine").unwrap();
        let mut engine = DiscoveryEngine::new();
        let reordered = TypeTag::with_supertypes("Sensor", [device()]);
        engine.add_subscription(subscription(1, ActorId::new(), &scheduler, sensor(), true));
        engine.add_subscription(subscription(2, ActorId::new(), &scheduler, reordered, true));
        engine.add_subscription(subscription(3, ActorId::new(), &scheduler, device(), true));

        assert_eq!(engine.all_open_subscription_topics().len(), 2);

        assert!(engine.delete_subscription(&SubscriptionId::new(3)));
        assert!(!engine.delete_subscription(&SubscriptionId::new(3)));
        assert_eq!(engine.all_open_subscription_topics(), vec![sensor()]);

        let published = offer(ActorId::new(), sensor(), 7);
        let id = published.publication;
        engine.add_publication(published);
        assert_eq!(engine.local_publications_matching(&device()).len(), 1);
        assert!(engine.delete_publication(&id));
        assert!(engine.local_publications_matching(&device()).is_empty());
    }
}

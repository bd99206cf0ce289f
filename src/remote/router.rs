//! Scope-keyed event fan-out
//!
//! Each subscription owns a bounded queue. Dispatch only does `try_send`, so a
//! slow subscriber never stalls the connection's inbound processing; when its
//! queue is full the event is dropped for that subscriber alone.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::remote::protocol::{EventScope, NodeEvent};

/// Handle identifying one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::Sender<NodeEvent>,
}

struct RouterInner {
    next_id: u64,
    scopes: HashMap<EventScope, Vec<Subscriber>>,
}

/// Receiving end of a subscription
pub struct Subscription {
    id: SubscriptionId,
    scope: EventScope,
    rx: mpsc::Receiver<NodeEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn scope(&self) -> &EventScope {
        &self.scope
    }

    /// Next event, or `None` once the subscription was removed
    pub async fn recv(&mut self) -> Option<NodeEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<NodeEvent> {
        self.rx.try_recv().ok()
    }
}

/// Event router of one session
pub struct EventRouter {
    node: String,
    capacity: usize,
    inner: Mutex<RouterInner>,
}

impl EventRouter {
    pub fn new(node: impl Into<String>, capacity: usize) -> Self {
        Self {
            node: node.into(),
            capacity: capacity.max(1),
            inner: Mutex::new(RouterInner {
                next_id: 1,
                scopes: HashMap::new(),
            }),
        }
    }

    /// Register a subscriber for `scope`
    pub fn subscribe(&self, scope: EventScope) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut inner = self.inner.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner
            .scopes
            .entry(scope.clone())
            .or_default()
            .push(Subscriber { id, tx });
        tracing::debug!("[{}] subscription {:?} on scope {}", self.node, id, scope);
        Subscription { id, scope, rx }
    }

    /// Register a handler invoked for every event on `scope`, in arrival order.
    ///
    /// The handler runs on its own task; it stops when the subscription is removed.
    pub fn subscribe_fn<F>(&self, scope: EventScope, mut handler: F) -> SubscriptionId
    where
        F: FnMut(NodeEvent) + Send + 'static,
    {
        let mut subscription = self.subscribe(scope);
        let id = subscription.id;
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                handler(event);
            }
        });
        id
    }

    /// Remove exactly one subscription; returns false if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        let mut removed = false;
        inner.scopes.retain(|_, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|s| s.id != id);
            removed |= subscribers.len() != before;
            !subscribers.is_empty()
        });
        removed
    }

    /// Fan an event out to the scope's subscribers in registration order.
    /// Returns how many subscribers accepted it.
    pub fn dispatch(&self, event: NodeEvent) -> usize {
        let mut inner = self.inner.lock();
        let Some(subscribers) = inner.scopes.get_mut(&event.scope) else {
            tracing::trace!(
                "[{}] no subscriber for '{}' on scope {}",
                self.node,
                event.event,
                event.scope
            );
            return 0;
        };

        let mut delivered = 0;
        subscribers.retain(|subscriber| match subscriber.tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    "[{}] subscriber {:?} is lagging, dropped '{}' on scope {}",
                    self.node,
                    subscriber.id,
                    event.event,
                    event.scope
                );
                true
            }
            // Receiver dropped without unsubscribing
            Err(TrySendError::Closed(_)) => false,
        });

        if subscribers.is_empty() {
            inner.scopes.remove(&event.scope);
        }
        delivered
    }

    /// Live subscriptions; a dropped receiver stops counting before it is pruned
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .scopes
            .values()
            .flatten()
            .filter(|subscriber| !subscriber.tx.is_closed())
            .count()
    }

    /// Drop every subscription
    pub fn clear(&self) {
        self.inner.lock().scopes.clear();
    }
}

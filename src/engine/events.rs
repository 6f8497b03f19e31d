//! Unsolicited event fan-out

use crate::protocol::EventKind;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiving end of one listener registration.
#[derive(Debug)]
pub struct Subscription<E> {
    id: SubscriptionId,
    kind: EventKind,
    receiver: mpsc::UnboundedReceiver<E>,
}

impl<E> Subscription<E> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Next event, or `None` once the listener was removed.
    pub async fn recv(&mut self) -> Option<E> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<E> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Debug)]
struct Listener<E> {
    id: SubscriptionId,
    kind: EventKind,
    tx: mpsc::UnboundedSender<E>,
}

#[derive(Debug)]
pub struct EventRegistry<E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Listener<E>>>,
}

impl<E> Default for EventRegistry<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<E: Clone> EventRegistry<E> {
    pub fn new() -> Self {
        Self::default()
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<Listener<E>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, kind: EventKind) -> Subscription<E> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, receiver) = mpsc::unbounded_channel();
        self.listeners().push(Listener { id, kind, tx });
        Subscription { id, kind, receiver }
    }

    /// Remove a listener. Its subscription sees the end of the stream.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|listener| listener.id != id);
        listeners.len() != before
    }

    /// Deliver `event` to every listener of `kind`, in registration order.
    /// Listeners whose subscription was dropped are pruned.
    pub fn broadcast(&self, kind: EventKind, event: &E) -> usize {
        let mut delivered = 0;
        self.listeners().retain(|listener| {
            if listener.kind != kind {
                return !listener.tx.is_closed();
            }
            let open = listener.tx.send(event.clone()).is_ok();
            if open {
                delivered += 1;
            }
            open
        });
        delivered
    }

    pub fn listener_counts(&self) -> BTreeMap<EventKind, usize> {
        let mut counts = BTreeMap::new();
        for listener in self.listeners().iter() {
            *counts.entry(listener.kind).or_insert(0) += 1;
        }
        counts
    }
}

//! The process-wide change bus.
//!
//! Single writer (the CRUD/transaction commit path), multiple subscribers.
//! Events are published synchronously with the commit, in commit order;
//! each subscriber owns a queue so a slow watcher never blocks the writer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use folio_core::event::ChangeEvent;

/// A live subscription to the bus.
pub struct Subscription {
    /// Identifier used to unsubscribe.
    pub id: u64,
    /// The event queue for this subscriber.
    pub events: Receiver<ChangeEvent>,
}

/// Publish/subscribe channel for committed mutations.
#[derive(Default)]
pub struct ChangeBus {
    subscribers: Mutex<Vec<(u64, Sender<ChangeEvent>)>>,
    next_id: AtomicU64,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber.
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("bus lock poisoned")
            .push((id, sender));
        Subscription { id, events: receiver }
    }

    /// Removes a subscriber.
    pub fn unsubscribe(&self, id: u64) {
        self.subscribers
            .lock()
            .expect("bus lock poisoned")
            .retain(|(sub_id, _)| *sub_id != id);
    }

    /// Delivers an event to every live subscriber, dropping closed ones.
    pub fn publish(&self, event: &ChangeEvent) {
        let mut subscribers = self.subscribers.lock().expect("bus lock poisoned");
        subscribers.retain(|(_, sender)| sender.send(event.clone()).is_ok());
    }

    /// Delivers a batch in order.
    pub fn publish_all(&self, events: &[ChangeEvent]) {
        for event in events {
            self.publish(event);
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("bus lock poisoned").len()
    }
}

impl std::fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

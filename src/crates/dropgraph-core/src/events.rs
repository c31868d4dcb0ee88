//! Synchronous subscriber dispatch for drop state transitions.
//!
//! Event delivery happens on the thread that caused the transition, not on a
//! dedicated dispatch thread — handlers that need to do real work must
//! themselves hand off to an executor (this is what [`crate::engine::Engine`]
//! does for app firing). Subscriber lists are copy-on-write under a short
//! lock, matching the "short lock, long-lived reads" shape used for the
//! session's drop table.

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::ids::{Oid, Uid};
use crate::status::{DropStatus, ExecStatus};

/// Topics a drop can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Status,
    ExecStatus,
    ProducerFinished,
}

/// An event delivered to subscribers, carrying enough identity for a handler
/// that is watching many drops at once (e.g. the engine's per-app latch).
#[derive(Debug, Clone)]
pub struct DropEvent {
    pub oid: Oid,
    pub uid: Uid,
    pub topic: Topic,
    pub new_status: Option<DropStatus>,
    pub new_exec_status: Option<ExecStatus>,
}

pub type EventCallback = Arc<dyn Fn(&DropEvent) + Send + Sync>;

#[derive(Clone)]
struct Subscription {
    id: u64,
    topic: Topic,
    callback: EventCallback,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}

/// Per-drop subscriber list. Additive; `(callback, topic)` pairs are
/// deduplicated by `Arc` pointer identity, matching "subscription is
/// additive; de-duplication by `(callback, topic)` pair" in the drop
/// contract.
#[derive(Debug, Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
}

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `callback` to `topic`. Returns the subscription id (stable,
    /// usable for unsubscribing on session destroy). A second call with a
    /// clone of the same `Arc` and the same topic is a no-op.
    pub fn subscribe(&self, topic: Topic, callback: EventCallback) -> u64 {
        let mut subs = self.subscriptions.write();
        if let Some(existing) = subs
            .iter()
            .find(|s| s.topic == topic && Arc::ptr_eq(&s.callback, &callback))
        {
            return existing.id;
        }
        let id = NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed);
        subs.push(Subscription { id, topic, callback });
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscriptions.write().retain(|s| s.id != id);
    }

    pub fn unsubscribe_all(&self) {
        self.subscriptions.write().clear();
    }

    /// Deliver `event` synchronously to every subscriber of its topic.
    /// Snapshotting the list before calling out avoids holding the lock
    /// across arbitrary user callbacks (which may themselves subscribe).
    pub fn emit(&self, event: &DropEvent) {
        let callbacks: Vec<EventCallback> = {
            let subs = self.subscriptions.read();
            subs.iter()
                .filter(|s| s.topic == event.topic)
                .map(|s| s.callback.clone())
                .collect()
        };
        for cb in callbacks {
            cb(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(topic: Topic) -> DropEvent {
        DropEvent {
            oid: Oid::new("A"),
            uid: Uid::generate(),
            topic,
            new_status: Some(DropStatus::Completed),
            new_exec_status: None,
        }
    }

    #[test]
    fn dedupes_same_callback_and_topic() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let cb: EventCallback = Arc::new(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        let id1 = bus.subscribe(Topic::Status, cb.clone());
        let id2 = bus.subscribe(Topic::Status, cb.clone());
        assert_eq!(id1, id2);
        bus.emit(&event(Topic::Status));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn only_matching_topic_is_delivered() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        bus.subscribe(
            Topic::ExecStatus,
            Arc::new(move |_| {
                calls2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        bus.emit(&event(Topic::Status));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let id = bus.subscribe(
            Topic::Status,
            Arc::new(move |_| {
                calls2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        bus.unsubscribe(id);
        bus.emit(&event(Topic::Status));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}

//! Queue observability: snapshots and subscriber fan-out.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;

use crate::domain::{RequestId, SubscriberId};
use crate::queue::lock;

/// Point-in-time view of the queue, published on every state change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    /// Increases by one on every state change.
    pub version: u64,
    pub pending_count: usize,
    pub running_count: usize,
    /// Requests waiting out a retry delay (they hold no slot).
    pub backing_off_count: usize,
    /// Pending requests in the order they will run. Filled whenever the
    /// queue has a subscriber or watch receiver, and by `RequestQueue::snapshot`.
    pub pending: Vec<PendingView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingView {
    pub id: RequestId,
    pub priority: i32,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

pub type SubscriberFn = dyn Fn(&QueueSnapshot) + Send + Sync;

/// One registered callback and the newest snapshot it has been handed.
pub(crate) struct SubscriberEntry {
    id: SubscriberId,
    callback: Box<SubscriberFn>,
    /// `version + 1` of the last delivered snapshot; 0 before the first.
    delivered: AtomicU64,
}

impl SubscriberEntry {
    /// Run the callback unless it already saw `snapshot` or something newer.
    /// A panic is logged and swallowed.
    pub fn deliver(&self, snapshot: &QueueSnapshot) {
        let mark = snapshot.version.saturating_add(1);
        if self.delivered.fetch_max(mark, Ordering::AcqRel) >= mark {
            return;
        }
        if catch_unwind(AssertUnwindSafe(|| (self.callback)(snapshot))).is_err() {
            tracing::warn!(
                subscriber = %self.id,
                version = snapshot.version,
                "queue subscriber panicked"
            );
        }
    }
}

/// Registered subscriber callbacks.
///
/// Callbacks run synchronously on the thread that changed the queue, never
/// under the queue lock, so a callback may query or even feed the queue.
/// Each subscriber sees versions in increasing order, even when a callback
/// triggers nested notifications.
#[derive(Default)]
pub(crate) struct Subscribers {
    entries: Mutex<Vec<Arc<SubscriberEntry>>>,
}

impl Subscribers {
    pub fn add<F>(&self, id: SubscriberId, callback: F) -> Arc<SubscriberEntry>
    where
        F: Fn(&QueueSnapshot) + Send + Sync + 'static,
    {
        let entry = Arc::new(SubscriberEntry {
            id,
            callback: Box::new(callback),
            delivered: AtomicU64::new(0),
        });
        lock(&self.entries).push(Arc::clone(&entry));
        entry
    }

    pub fn remove(&self, id: SubscriberId) -> bool {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Deliver `snapshot` to every subscriber that has not seen a newer one.
    pub fn notify(&self, snapshot: &QueueSnapshot) {
        let targets: Vec<_> = lock(&self.entries).iter().cloned().collect();
        for entry in targets {
            entry.deliver(snapshot);
        }
    }
}

/// Handle returned by `RequestQueue::subscribe`.
///
/// Dropping it keeps the callback registered; call `unsubscribe` to stop
/// notifications.
#[must_use = "keep the subscription to be able to unsubscribe"]
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriberId, subscribers: Weak<Subscribers>) -> Self {
        Self { id, subscribers }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Remove the callback. Returns false if it was already gone (or the
    /// queue no longer exists).
    pub fn unsubscribe(self) -> bool {
        self.subscribers
            .upgrade()
            .is_some_and(|subscribers| subscribers.remove(self.id))
    }
}

impl std::fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use ulid::Ulid;

    fn snapshot(version: u64) -> QueueSnapshot {
        QueueSnapshot {
            version,
            ..QueueSnapshot::default()
        }
    }

    fn counter(subscribers: &Subscribers) -> (SubscriberId, Arc<AtomicUsize>) {
        let id = SubscriberId::from_ulid(Ulid::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let _ = subscribers.add(id, move |_: &QueueSnapshot| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (id, hits)
    }

    #[test]
    fn stale_snapshots_are_skipped() {
        let subscribers = Subscribers::default();
        let (_, hits) = counter(&subscribers);

        subscribers.notify(&snapshot(2));
        subscribers.notify(&snapshot(1));
        subscribers.notify(&snapshot(2));
        subscribers.notify(&snapshot(3));

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn first_delivery_may_be_version_zero() {
        let subscribers = Subscribers::default();
        let (_, hits) = counter(&subscribers);

        subscribers.notify(&snapshot(0));
        subscribers.notify(&snapshot(0));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn each_subscriber_keeps_its_own_high_water_mark() {
        let subscribers = Subscribers::default();
        let seen: Arc<Mutex<Vec<u64>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let early = subscribers.add(SubscriberId::from_ulid(Ulid::new()), |_: &QueueSnapshot| {});
        let _ = subscribers.add(SubscriberId::from_ulid(Ulid::new()), move |s: &QueueSnapshot| {
            sink.lock().unwrap().push(s.version);
        });

        // one subscriber already got v3 directly; the other must still get v2
        early.deliver(&snapshot(3));
        subscribers.notify(&snapshot(2));
        subscribers.notify(&snapshot(3));
        subscribers.notify(&snapshot(1));

        assert_eq!(*seen.lock().unwrap(), vec![2, 3]);
    }

    #[test]
    fn panicking_subscriber_does_not_starve_the_rest() {
        let subscribers = Subscribers::default();
        let _ = subscribers.add(
            SubscriberId::from_ulid(Ulid::new()),
            |snapshot: &QueueSnapshot| {
                if snapshot.version > 0 {
                    panic!("subscriber bug")
                }
            },
        );
        let (_, hits) = counter(&subscribers);

        subscribers.notify(&snapshot(1));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent_per_handle() {
        let subscribers = Arc::new(Subscribers::default());
        let (id, hits) = counter(&subscribers);

        assert!(Subscription::new(id, Arc::downgrade(&subscribers)).unsubscribe());
        assert!(!Subscription::new(id, Arc::downgrade(&subscribers)).unsubscribe());

        subscribers.notify(&snapshot(1));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn snapshot_serializes_counts_and_order() {
        let view = PendingView {
            id: RequestId::from_ulid(Ulid::new()),
            priority: 2,
            retry_count: 1,
            label: None,
        };
        let snapshot = QueueSnapshot {
            version: 4,
            pending_count: 1,
            running_count: 3,
            backing_off_count: 0,
            pending: vec![view],
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["running_count"], 3);
        assert_eq!(json["pending"][0]["priority"], 2);
        assert!(json["pending"][0].get("label").is_none());
    }
}

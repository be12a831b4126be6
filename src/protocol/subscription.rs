//! Event fan-out: one reader task decodes incoming events and dispatches
//! them to subscribers through bounded, per-subscriber queues. A slow
//! subscriber must never stall the reader, so a full queue drops its oldest
//! entry and counts the drop, rather than blocking the dispatcher.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// One decoded CDP event, ready for a collector to interpret.
#[derive(Debug, Clone)]
pub struct Event {
    pub method: String,
    pub params: serde_json::Value,
    pub session_id: Option<String>,
}

/// Which events a subscriber wants, by session tag.
#[derive(Debug, Clone)]
pub enum SessionFilter {
    /// Only events the peer tagged with this exact session id.
    Tag(String),
    /// Every event for this method, regardless of session tag.
    Any,
}

impl SessionFilter {
    fn matches(&self, session_id: Option<&str>) -> bool {
        match self {
            SessionFilter::Any => true,
            SessionFilter::Tag(want) => session_id == Some(want.as_str()),
        }
    }
}

const DEFAULT_CAPACITY: usize = 256;

struct Inner {
    capacity: usize,
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: std::sync::atomic::AtomicBool,
}

/// The receiving half of one subscription. Dropped entries are never
/// replayed; call [`EventStream::dropped_count`] to read the cumulative
/// drop counter for the session overview.
pub struct EventStream {
    inner: Arc<Inner>,
}

impl EventStream {
    /// Wait for the next event, or `None` once the client has disconnected
    /// and the queue has drained.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            {
                let mut q = self.inner.queue.lock().expect("queue poisoned");
                if let Some(ev) = q.pop_front() {
                    return Some(ev);
                }
                if self.inner.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

struct Subscriber {
    filter: SessionFilter,
    inner: Arc<Inner>,
}

/// Registry of live subscriptions, keyed by CDP method name (e.g.
/// `"Network.requestWillBeSent"`).
#[derive(Default)]
pub struct SubscriptionRegistry {
    by_method: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `method`, optionally scoped to one session tag.
    pub fn subscribe(&self, method: &str, filter: SessionFilter) -> EventStream {
        let inner = Arc::new(Inner {
            capacity: DEFAULT_CAPACITY,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: std::sync::atomic::AtomicBool::new(false),
        });
        self.by_method
            .lock()
            .expect("registry poisoned")
            .entry(method.to_owned())
            .or_default()
            .push(Subscriber {
                filter,
                inner: Arc::clone(&inner),
            });
        EventStream { inner }
    }

    /// Deliver an event to every matching subscriber, dropping the oldest
    /// queued entry (and counting it) for any subscriber whose queue is full.
    pub fn dispatch(&self, event: Event) {
        let by_method = self.by_method.lock().expect("registry poisoned");
        let Some(subs) = by_method.get(event.method.as_str()) else {
            return;
        };
        for sub in subs {
            if !sub.filter.matches(event.session_id.as_deref()) {
                continue;
            }
            let mut q = sub.inner.queue.lock().expect("queue poisoned");
            if q.len() >= sub.inner.capacity {
                q.pop_front();
                sub.inner.dropped.fetch_add(1, Ordering::Relaxed);
            }
            q.push_back(event.clone());
            drop(q);
            sub.inner.notify.notify_one();
        }
    }

    /// Mark every subscriber's queue closed and wake any waiting readers,
    /// called once when the underlying connection is lost.
    pub fn close_all(&self) {
        let by_method = self.by_method.lock().expect("registry poisoned");
        for subs in by_method.values() {
            for sub in subs {
                sub.inner.closed.store(true, Ordering::Release);
                sub.inner.notify.notify_waiters();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(method: &str, session_id: Option<&str>) -> Event {
        Event {
            method: method.to_owned(),
            params: serde_json::json!({}),
            session_id: session_id.map(str::to_owned),
        }
    }

    #[tokio::test]
    async fn tagged_subscriber_ignores_events_for_other_sessions() {
        let registry = SubscriptionRegistry::new();
        let mut stream = registry.subscribe("Network.requestWillBeSent", SessionFilter::Tag("S1".into()));
        registry.dispatch(event("Network.requestWillBeSent", Some("S2")));
        registry.dispatch(event("Network.requestWillBeSent", Some("S1")));
        let got = stream.recv().await.unwrap();
        assert_eq!(got.session_id.as_deref(), Some("S1"));
    }

    #[tokio::test]
    async fn any_subscriber_receives_all_sessions() {
        let registry = SubscriptionRegistry::new();
        let mut stream = registry.subscribe("Target.targetCreated", SessionFilter::Any);
        registry.dispatch(event("Target.targetCreated", None));
        registry.dispatch(event("Target.targetCreated", Some("S7")));
        assert!(stream.recv().await.is_some());
        assert!(stream.recv().await.is_some());
    }

    #[tokio::test]
    async fn full_queue_drops_oldest_and_counts_it() {
        let registry = SubscriptionRegistry::new();
        let mut stream = registry.subscribe("Log.entryAdded", SessionFilter::Any);
        for i in 0..(DEFAULT_CAPACITY + 5) {
            let mut e = event("Log.entryAdded", None);
            e.params = serde_json::json!({"i": i});
            registry.dispatch(e);
        }
        assert_eq!(stream.dropped_count(), 5);
        let first = stream.recv().await.unwrap();
        assert_eq!(first.params["i"], 5);
    }

    #[tokio::test]
    async fn close_all_ends_pending_recv_with_none() {
        let registry = SubscriptionRegistry::new();
        let mut stream = registry.subscribe("Target.targetDestroyed", SessionFilter::Any);
        registry.close_all();
        assert!(stream.recv().await.is_none());
    }
}

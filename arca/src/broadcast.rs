//! Non-blocking event fan-out.
//!
//! The broadcaster owns one bounded queue per subscriber session. Publishing
//! never blocks: when a session's queue is full the oldest event in that
//! queue is dropped and the per-session drop counter incremented. Per-session
//! delivery order matches publish order (modulo those drops); no ordering is
//! guaranteed across sessions.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::event::{Event, EventKind};

/// Default per-session queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

struct SessionQueue {
    inner: Mutex<VecDeque<Event>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
    capacity: usize,
}

impl SessionQueue {
    fn push(&self, event: Event) -> bool {
        let mut queue = self.inner.lock().expect("session queue lock poisoned");
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        if queue.len() == self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
        true
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.inner
            .lock()
            .expect("session queue lock poisoned")
            .clear();
        // notify_one stores a permit even with no waiter registered, so a
        // consumer that checks the closed flag and then awaits cannot miss
        // the shutdown.
        self.notify.notify_one();
        self.notify.notify_waiters();
    }
}

/// Consumer handle for one session's event queue.
///
/// Held by the transport task that writes events out (an SSE writer or the
/// native messaging notifier). Dropping the handle does not unsubscribe;
/// call [`Broadcaster::unsubscribe`] for that.
pub struct Subscription {
    queue: Arc<SessionQueue>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

impl Subscription {
    /// Receives the next event, waiting if the queue is empty.
    ///
    /// Returns `None` once the session is unsubscribed and the queue is
    /// drained.
    pub async fn recv(&self) -> Option<Event> {
        loop {
            {
                let mut queue = self.queue.inner.lock().expect("session queue lock poisoned");
                if let Some(event) = queue.pop_front() {
                    return Some(event);
                }
                if self.queue.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.queue.notify.notified().await;
        }
    }

    /// Non-blocking receive.
    #[must_use]
    pub fn try_recv(&self) -> Option<Event> {
        self.queue
            .inner
            .lock()
            .expect("session queue lock poisoned")
            .pop_front()
    }

    fn new(queue: Arc<SessionQueue>) -> Self {
        Self { queue }
    }
}

struct SessionEntry {
    queue: Arc<SessionQueue>,
    filter: Option<HashSet<EventKind>>,
}

/// Session registry with non-blocking publish.
pub struct Broadcaster {
    sessions: DashMap<String, SessionEntry>,
    capacity: usize,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("sessions", &self.sessions.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    /// Creates a broadcaster with the default queue capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Creates a broadcaster with an explicit per-session queue capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Registers a session and returns its consumer handle.
    ///
    /// A `None` filter delivers every event kind. Re-subscribing an existing
    /// session id replaces (and closes) the previous queue.
    pub fn subscribe(
        &self,
        session_id: impl Into<String>,
        filter: Option<HashSet<EventKind>>,
    ) -> Subscription {
        let session_id = session_id.into();
        let queue = Arc::new(SessionQueue {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            capacity: self.capacity,
        });
        let previous = self.sessions.insert(
            session_id,
            SessionEntry {
                queue: Arc::clone(&queue),
                filter,
            },
        );
        if let Some(previous) = previous {
            previous.queue.close();
        }
        Subscription::new(queue)
    }

    /// Removes a session, closing and draining its queue. In-flight
    /// publishers observe the closed flag and skip the session.
    pub fn unsubscribe(&self, session_id: &str) {
        if let Some((_, entry)) = self.sessions.remove(session_id) {
            entry.queue.close();
        }
    }

    /// Publishes an event to every matching session without blocking.
    ///
    /// Returns the number of sessions the event was enqueued for.
    pub fn publish(&self, event: &Event) -> usize {
        let mut delivered = 0;
        for entry in &self.sessions {
            if let Some(filter) = &entry.filter {
                if !filter.contains(&event.kind) {
                    continue;
                }
            }
            if entry.queue.push(event.clone()) {
                delivered += 1;
            }
        }
        if delivered > 0 {
            tracing::trace!(event = %event.id, kind = %event.kind, delivered, "published event");
        }
        delivered
    }

    /// Events dropped so far for a session due to backpressure.
    #[must_use]
    pub fn dropped(&self, session_id: &str) -> u64 {
        self.sessions
            .get(session_id)
            .map_or(0, |entry| entry.queue.dropped.load(Ordering::Relaxed))
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn event(kind: EventKind) -> Event {
        Event::new(kind, None, Map::new())
    }

    #[tokio::test]
    async fn test_fan_out_to_all_sessions() {
        let broadcaster = Broadcaster::new();
        let a = broadcaster.subscribe("a", None);
        let b = broadcaster.subscribe("b", None);

        let ev = event(EventKind::BalanceChanged);
        assert_eq!(broadcaster.publish(&ev), 2);

        let got_a = a.recv().await.unwrap();
        let got_b = b.recv().await.unwrap();
        assert_eq!(got_a.id, ev.id);
        assert_eq!(got_b.id, ev.id);
    }

    #[tokio::test]
    async fn test_filter_excludes_other_kinds() {
        let broadcaster = Broadcaster::new();
        let filter: HashSet<EventKind> = [EventKind::TransactionConfirmed].into_iter().collect();
        let sub = broadcaster.subscribe("s", Some(filter));

        assert_eq!(broadcaster.publish(&event(EventKind::BlockNew)), 0);
        assert_eq!(broadcaster.publish(&event(EventKind::TransactionConfirmed)), 1);
        assert_eq!(
            sub.recv().await.unwrap().kind,
            EventKind::TransactionConfirmed
        );
    }

    #[tokio::test]
    async fn test_per_session_order_is_preserved() {
        let broadcaster = Broadcaster::new();
        let sub = broadcaster.subscribe("s", None);

        let first = event(EventKind::TransactionProcessing);
        let second = event(EventKind::TransactionConfirmed);
        broadcaster.publish(&first);
        broadcaster.publish(&second);

        assert_eq!(sub.recv().await.unwrap().id, first.id);
        assert_eq!(sub.recv().await.unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest() {
        let broadcaster = Broadcaster::with_capacity(2);
        let sub = broadcaster.subscribe("s", None);

        let e1 = event(EventKind::BlockNew);
        let e2 = event(EventKind::BlockNew);
        let e3 = event(EventKind::BlockNew);
        broadcaster.publish(&e1);
        broadcaster.publish(&e2);
        broadcaster.publish(&e3);

        assert_eq!(broadcaster.dropped("s"), 1);
        assert_eq!(sub.recv().await.unwrap().id, e2.id);
        assert_eq!(sub.recv().await.unwrap().id, e3.id);
    }

    #[tokio::test]
    async fn test_unsubscribed_session_is_skipped() {
        let broadcaster = Broadcaster::new();
        let sub = broadcaster.subscribe("s", None);
        broadcaster.unsubscribe("s");

        assert_eq!(broadcaster.publish(&event(EventKind::BlockNew)), 0);
        assert!(sub.recv().await.is_none());
        assert_eq!(broadcaster.session_count(), 0);
    }
}

//! Subscription lists for slot and node notifications.
//!
//! Every notification the engine raises (`ValueChanged`,
//! `ConnectionStateChanged`, `Destroyed`) is an [`Event`]: an ordered list of
//! subscribers, each identified by a [`SubscriberId`] so it can be removed
//! again.
//!
//! # Fault Isolation
//!
//! Subscribers run user code. A subscriber that panics is caught at the
//! dispatch boundary, logged, and skipped; the remaining subscribers are still
//! invoked in order. The state that triggered the event is never rolled back.
//!
//! The subscriber list is snapshotted before dispatch, so a callback may
//! subscribe or unsubscribe (on this or any other event) without deadlocking.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;

/// Unique identifier for a subscriber.
///
/// Uses an atomic counter to ensure uniqueness across threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

type Callback<A> = Arc<dyn Fn(A) + Send + Sync>;

/// An ordered, fault-isolated list of subscribers receiving an `A`.
pub struct Event<A: Copy> {
    subscribers: RwLock<Vec<(SubscriberId, Callback<A>)>>,
}

impl<A: Copy> Event<A> {
    /// Create an event with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Register a callback. Callbacks run in subscription order.
    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        let id = SubscriberId::new();
        self.subscribers.write().push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    /// Whether anyone is listening.
    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Drop every subscriber.
    pub fn clear(&self) {
        self.subscribers.write().clear();
    }

    /// Invoke every subscriber with `arg`.
    ///
    /// `source` names the emitter in fault logs.
    pub fn emit(&self, source: &str, arg: A) {
        let snapshot: SmallVec<[Callback<A>; 4]> = {
            let subscribers = self.subscribers.read();
            if subscribers.is_empty() {
                return;
            }
            subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };

        for callback in snapshot {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(arg))) {
                tracing::error!(
                    source,
                    fault = panic_message(payload.as_ref()),
                    "subscriber panicked during propagation; continuing with remaining subscribers"
                );
            }
        }
    }
}

impl<A: Copy> Default for Event<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Copy> std::fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("subscribers", &self.len())
            .finish()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Typed publish/subscribe registries and ordered per-container delivery.
//!
//! [`Listeners`] keeps its callbacks in an [`ArcSwap`] snapshot: emitting
//! iterates whatever list was current when emission started, so callbacks may
//! subscribe or unsubscribe (even themselves) without deadlocking or skipping
//! anyone registered earlier.
//!
//! [`EventQueue`] serializes delivery for one container. Events are pushed
//! while the container's state lock is held, so queue order is mutation
//! order; one thread at a time drains the queue after the lock is released.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A registry of callbacks for events of type `E`.
pub struct Listeners<E> {
    next_id: AtomicU64,
    slots: ArcSwap<Vec<(SubscriptionId, Callback<E>)>>,
}

impl<E> core::fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            slots: ArcSwap::from_pointee(Vec::new()),
        }
    }
}

impl<E> Listeners<E> {
    /// Register a callback.
    pub fn subscribe(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let callback: Callback<E> = Arc::new(callback);
        self.slots.rcu(|cur| {
            let mut next = Vec::clone(cur);
            next.push((id, Arc::clone(&callback)));
            next
        });
        id
    }

    /// Remove a callback. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut found = false;
        self.slots.rcu(|cur| {
            found = cur.iter().any(|(sid, _)| *sid == id);
            cur.iter()
                .filter(|(sid, _)| *sid != id)
                .cloned()
                .collect::<Vec<_>>()
        });
        found
    }

    /// Call every callback registered when emission starts.
    pub fn emit(&self, event: &E) {
        let snapshot = self.slots.load_full();
        for (_, callback) in snapshot.iter() {
            callback(event);
        }
    }

    /// Drop every callback.
    pub fn clear(&self) {
        self.slots.store(Arc::new(Vec::new()));
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.slots.load().len()
    }

    /// Whether no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// FIFO of pending events for one container, drained by one thread at a time.
pub(crate) struct EventQueue<E> {
    pending: Mutex<VecDeque<E>>,
    draining: AtomicBool,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        }
    }
}

impl<E> EventQueue<E> {
    pub(crate) fn push(&self, event: E) {
        self.pending.lock().push_back(event);
    }

    /// Deliver queued events in order.
    ///
    /// If another thread (or an outer frame on this thread) is already
    /// draining, this returns immediately and that drainer delivers the events.
    pub(crate) fn drain(&self, mut deliver: impl FnMut(E)) {
        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                return;
            }
            loop {
                let next = self.pending.lock().pop_front();
                match next {
                    Some(event) => deliver(event),
                    None => break,
                }
            }
            self.draining.store(false, Ordering::Release);
            // An event pushed between the last pop and the release above has
            // no drainer yet.
            if self.pending.lock().is_empty() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn subscribe_emit_unsubscribe() {
        let listeners = Listeners::<u32>::default();
        let sum = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&sum);
        let id = listeners.subscribe(move |v| {
            s.fetch_add(*v as usize, Ordering::Relaxed);
        });
        listeners.emit(&3);
        listeners.emit(&4);
        assert_eq!(sum.load(Ordering::Relaxed), 7);
        assert!(listeners.unsubscribe(id));
        assert!(!listeners.unsubscribe(id));
        listeners.emit(&100);
        assert_eq!(sum.load(Ordering::Relaxed), 7);
        assert!(listeners.is_empty());
    }

    #[test]
    fn callback_may_subscribe_during_emit() {
        let listeners = Arc::new(Listeners::<()>::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let (l, c) = (Arc::clone(&listeners), Arc::clone(&calls));
        listeners.subscribe(move |()| {
            c.fetch_add(1, Ordering::Relaxed);
            let c2 = Arc::clone(&c);
            l.subscribe(move |()| {
                c2.fetch_add(1, Ordering::Relaxed);
            });
        });
        listeners.emit(&());
        // The callback added during emission is not part of that snapshot.
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(listeners.len(), 2);
    }

    #[test]
    fn queue_delivers_in_push_order_and_tolerates_reentry() {
        let queue = EventQueue::<u32>::default();
        queue.push(1);
        queue.push(2);
        let mut seen = Vec::new();
        queue.drain(|e| {
            if e == 1 {
                queue.push(3);
                // Nested drain defers to the outer drainer.
                queue.drain(|_| unreachable!("outer frame is draining"));
            }
            seen.push(e);
        });
        assert_eq!(seen, vec![1, 2, 3]);
    }
}

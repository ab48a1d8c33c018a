// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Topic-keyed in-process pub/sub used to correlate LSP responses,
//! diagnostics, and lifecycle events with their waiters.
//!
//! Topics are plain strings (`request.<id>`, `diagnostics.<uri>`,
//! `initialized`). Listeners run on their own task so `emit` never blocks
//! on listener bodies; a panicking listener is logged and cannot take down
//! the dispatcher or its siblings.

use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

/// Payload delivered to listeners alongside the topic name.
pub type Payload = Value;

/// A subscriber callback. Wrapped in `Arc` so removal can compare by
/// identity (`Arc::ptr_eq`).
pub type Listener = Arc<dyn Fn(&str, Payload) + Send + Sync>;

struct Entry {
    listener: Listener,
    once: bool,
}

#[derive(Default)]
struct Inner {
    topics: Mutex<HashMap<String, Vec<Entry>>>,
    max_listeners: AtomicUsize,
    events_fired: AtomicU64,
    subscribers: AtomicI64,
}

/// Snapshot of dispatcher counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Number of listener invocations since creation.
    pub events_fired: u64,
    /// Current number of registered listeners.
    pub subscribers: i64,
}

/// Cheaply cloneable dispatcher handle. All clones share the same
/// listener table.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Creates an empty dispatcher with no listener cap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for a topic. Alias for [`Self::add_listener`].
    pub fn on(&self, topic: &str, listener: Listener) {
        self.add_listener(topic, listener);
    }

    /// Appends a listener to a topic, respecting the advisory cap set via
    /// [`Self::set_max_listeners`].
    pub fn add_listener(&self, topic: &str, listener: Listener) {
        self.insert(topic, listener, false);
    }

    /// Registers a listener that fires at most once. The entry is removed
    /// from the table before its body runs.
    pub fn once(&self, topic: &str, listener: Listener) {
        self.insert(topic, listener, true);
    }

    fn insert(&self, topic: &str, listener: Listener, once: bool) {
        let max = self.inner.max_listeners.load(Ordering::Relaxed);
        let mut topics = lock(&self.inner.topics);
        let entries = topics.entry(topic.to_string()).or_default();

        if max > 0 && entries.len() >= max {
            warn!("listener cap ({max}) reached on topic {topic}, dropping registration");
            return;
        }

        entries.push(Entry { listener, once });
        self.inner.subscribers.fetch_add(1, Ordering::Relaxed);
    }

    /// Delivers a payload to every listener currently registered for the
    /// topic. One-shot listeners are unregistered before their bodies run.
    /// Each listener is invoked on a fresh task; listeners registered
    /// during an emit do not observe that emit.
    pub fn emit(&self, topic: &str, payload: Payload) {
        let snapshot: Vec<Entry> = {
            let mut topics = lock(&self.inner.topics);
            let Some(entries) = topics.get_mut(topic) else {
                return;
            };

            let snapshot = entries
                .iter()
                .map(|e| Entry {
                    listener: e.listener.clone(),
                    once: e.once,
                })
                .collect();

            entries.retain(|e| !e.once);
            if entries.is_empty() {
                topics.remove(topic);
            }
            snapshot
        };

        for entry in snapshot {
            if entry.once {
                self.inner.subscribers.fetch_sub(1, Ordering::Relaxed);
            }
            self.inner.events_fired.fetch_add(1, Ordering::Relaxed);

            let topic = topic.to_string();
            let payload = payload.clone();
            tokio::spawn(async move {
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    (entry.listener)(&topic, payload);
                }));
                if let Err(panic) = result {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(ToString::to_string)
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    error!("listener for {topic} panicked: {msg}");
                }
            });
        }
    }

    /// Removes a listener by identity. Returns whether a removal occurred.
    pub fn remove_listener(&self, topic: &str, listener: &Listener) -> bool {
        let mut topics = lock(&self.inner.topics);
        let Some(entries) = topics.get_mut(topic) else {
            return false;
        };

        let Some(idx) = entries
            .iter()
            .position(|e| Arc::ptr_eq(&e.listener, listener))
        else {
            return false;
        };

        entries.remove(idx);
        if entries.is_empty() {
            topics.remove(topic);
        }
        self.inner.subscribers.fetch_sub(1, Ordering::Relaxed);
        true
    }

    /// Purges all listeners for a topic. Returns whether anything was
    /// removed.
    pub fn remove_all_listeners(&self, topic: &str) -> bool {
        let mut topics = lock(&self.inner.topics);
        match topics.remove(topic) {
            Some(entries) if !entries.is_empty() => {
                self.inner
                    .subscribers
                    .fetch_sub(entries.len() as i64, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// Number of listeners registered for a topic.
    #[must_use]
    pub fn listener_count(&self, topic: &str) -> usize {
        lock(&self.inner.topics).get(topic).map_or(0, Vec::len)
    }

    /// Topics with at least one registered listener.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        lock(&self.inner.topics).keys().cloned().collect()
    }

    /// Number of topics with registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner.topics).len()
    }

    /// Returns true when no topic has listeners.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sets the advisory per-topic listener cap. `0` disables the cap.
    pub fn set_max_listeners(&self, n: usize) {
        self.inner.max_listeners.store(n, Ordering::Relaxed);
    }

    /// Returns a snapshot of the fired/subscriber counters.
    #[must_use]
    pub fn stats(&self) -> Stats {
        Stats {
            events_fired: self.inner.events_fired.load(Ordering::Relaxed),
            subscribers: self.inner.subscribers.load(Ordering::Relaxed),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // The table mutex is only held for structural mutation; a poisoned
    // lock still holds a structurally valid map.
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

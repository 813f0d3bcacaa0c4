//! A single ordered timer wheel servicing every transaction.
//!
//! Entries are kept in a BTreeMap ordered by deadline; one engine task
//! polls due entries and dispatches them. This replaces per-transaction
//! sleep tasks with one wakeup source.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
struct WheelKey {
    deadline: Instant,
    id: u64,
}

/// Ordered collection of pending timer entries.
pub(crate) struct TimerWheel<T> {
    entries: RwLock<BTreeMap<WheelKey, T>>,
    deadlines: RwLock<HashMap<u64, Instant>>,
    next_id: AtomicU64,
}

impl<T> TimerWheel<T> {
    pub fn new() -> Self {
        TimerWheel {
            entries: RwLock::new(BTreeMap::new()),
            deadlines: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("Lock failed").len()
    }

    /// Schedule `value` to fire after `delay`. Returns a handle usable
    /// with [`TimerWheel::cancel`].
    pub fn schedule(&self, delay: Duration, value: T) -> u64 {
        self.schedule_at(Instant::now() + delay, value)
    }

    pub fn schedule_at(&self, deadline: Instant, value: T) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .write()
            .expect("Lock failed")
            .insert(WheelKey { deadline, id }, value);
        self.deadlines
            .write()
            .expect("Lock failed")
            .insert(id, deadline);
        id
    }

    /// Remove a pending entry, returning it when it had not fired.
    pub fn cancel(&self, id: u64) -> Option<T> {
        let deadline = self.deadlines.write().expect("Lock failed").remove(&id)?;
        self.entries
            .write()
            .expect("Lock failed")
            .remove(&WheelKey { deadline, id })
    }

    /// All entries due at `now`, in deadline order.
    pub fn poll(&self, now: Instant) -> Vec<T> {
        let mut fired = Vec::new();
        let due: Vec<WheelKey> = {
            let entries = self.entries.read().expect("Lock failed");
            entries
                .keys()
                .take_while(|key| key.deadline <= now)
                .copied()
                .collect()
        };
        if due.is_empty() {
            return fired;
        }

        let mut entries = self.entries.write().expect("Lock failed");
        let mut deadlines = self.deadlines.write().expect("Lock failed");
        fired.reserve(due.len());
        for key in due {
            if let Some(value) = entries.remove(&key) {
                fired.push(value);
            }
            deadlines.remove(&key.id);
        }
        fired
    }
}

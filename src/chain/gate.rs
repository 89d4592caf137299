//! Recently-seen block cache
//!
//! Bounded set of block ids with FIFO eviction. A block id that is still in
//! the cache is not checked again, whatever the outcome of its first check.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

struct Inner {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

pub struct RecentCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl RecentCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                seen: HashSet::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
            capacity,
        }
    }

    /// Record `key`. Returns false when it was already present.
    pub fn admit(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.seen.contains(key) {
            return false;
        }
        inner.seen.insert(key.to_string());
        inner.order.push_back(key.to_string());

        // Keep only the most recent entries
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Fixed-capacity recent-event log.

use std::collections::VecDeque;

/// Ring buffer that evicts its oldest element once full.
#[derive(Debug, Clone)]
pub struct RecentRing<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RecentRing<T> {
    /// A zero capacity is bumped to one so `push` always keeps the newest item.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `item`, returning the evicted oldest element if the ring was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

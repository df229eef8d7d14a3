//! Bounded FIFO set of recently processed identifiers

use std::collections::{HashSet, VecDeque};

/// Default number of identifiers remembered per run
pub const DEFAULT_SEEN_CAPACITY: usize = 5000;

/// In-process dedup layer. Oldest identifiers are evicted first once full.
#[derive(Debug)]
pub struct SeenSet {
    capacity: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl SeenSet {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.members.contains(identifier)
    }

    /// Insert an identifier. Returns `false` if it was already present.
    pub fn insert(&mut self, identifier: &str) -> bool {
        if self.members.contains(identifier) {
            return false;
        }

        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }

        self.order.push_back(identifier.to_string());
        self.members.insert(identifier.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for SeenSet {
    fn default() -> Self {
        Self::new(DEFAULT_SEEN_CAPACITY)
    }
}

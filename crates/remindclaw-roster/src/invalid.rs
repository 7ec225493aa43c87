//! Bounded, deduplicated log of invalid contacts and failed deliveries.

use std::collections::{HashSet, VecDeque};

use remindclaw_core::types::InvalidContactRecord;

/// Default number of records kept before the oldest are evicted.
pub const DEFAULT_INVALID_CAPACITY: usize = 5000;

#[derive(Debug)]
pub struct InvalidContactLog {
    entries: VecDeque<InvalidContactRecord>,
    seen: HashSet<InvalidContactRecord>,
    capacity: usize,
}

impl InvalidContactLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            seen: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record once. Returns `false` for a duplicate.
    pub fn record(&mut self, record: InvalidContactRecord) -> bool {
        if !self.seen.insert(record.clone()) {
            return false;
        }
        self.entries.push_back(record);
        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    pub fn seen(&self) -> &HashSet<InvalidContactRecord> {
        &self.seen
    }

    pub fn list(&self) -> Vec<InvalidContactRecord> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.seen.clear();
    }
}

impl Default for InvalidContactLog {
    fn default() -> Self {
        Self::new(DEFAULT_INVALID_CAPACITY)
    }
}

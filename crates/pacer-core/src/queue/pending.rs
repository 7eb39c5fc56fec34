//! Pending order: priority desc, then enqueue order asc.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::domain::RequestId;

/// Entry in the pending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingEntry {
    pub priority: i32,
    pub seq: u64,
    pub id: RequestId,
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then earlier enqueue.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.seq.cmp(&other.seq))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Requests waiting for a slot, always sorted.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    entries: BTreeSet<PendingEntry>,
}

impl PendingQueue {
    pub fn insert(&mut self, entry: PendingEntry) {
        self.entries.insert(entry);
    }

    pub fn pop_front(&mut self) -> Option<PendingEntry> {
        self.entries.pop_first()
    }

    /// 0-based index of `id`, if pending.
    pub fn position(&self, id: RequestId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

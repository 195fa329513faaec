//! Index-addressed reorder buffer for the dispatcher's fan-in.
//!
//! Completions arrive in any order; `push` hands back the longest run of
//! consecutive items starting at the next expected index.

use std::collections::BTreeMap;

use tracing::warn;

#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: u64,
    pending: BTreeMap<u64, T>,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self { next: 0, pending: BTreeMap::new() }
    }

    /// Accept the item for `index` and return everything now deliverable.
    ///
    /// Indices below the cursor or already buffered are dropped.
    pub fn push(&mut self, index: u64, item: T) -> Vec<T> {
        if index < self.next || self.pending.contains_key(&index) {
            warn!(index, next = self.next, "Dropping duplicate completion");
            return Vec::new();
        }
        self.pending.insert(index, item);

        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.next) {
            ready.push(item);
            self.next += 1;
        }
        ready
    }

    /// Next index the buffer is waiting for.
    pub fn next_index(&self) -> u64 {
        self.next
    }

    /// Completed items held back behind a gap.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

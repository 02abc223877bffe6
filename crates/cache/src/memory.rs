//! In-memory frame store
//!
//! Used when no persistence path is configured. Entries live in an
//! ordered deque and are lost on restart; the recovery cursor then comes
//! from the cursor file alone.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::store::EvictionStats;

struct MemEntry {
    seq: u64,
    received_at_nanos: i64,
    body: Bytes,
}

/// Ordered deque of retained frames, head = oldest
pub(crate) struct MemoryStore {
    entries: RwLock<VecDeque<MemEntry>>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
        }
    }

    pub(crate) fn append(&self, seq: u64, received_at_nanos: i64, body: Bytes) {
        self.entries.write().push_back(MemEntry {
            seq,
            received_at_nanos,
            body,
        });
    }

    /// Pop head entries while `should_evict` approves
    pub(crate) fn evict_heads(
        &self,
        mut should_evict: impl FnMut(Option<(i64, u32)>, u64) -> bool,
        remaining: &mut u64,
    ) -> (EvictionStats, Option<u64>) {
        let mut entries = self.entries.write();
        let mut stats = EvictionStats::default();

        while let Some(head) = entries.front() {
            let header = Some((head.received_at_nanos, head.body.len() as u32));
            if !should_evict(header, *remaining) {
                break;
            }
            let freed = head.body.len() as u64;
            entries.pop_front();
            stats.evicted += 1;
            stats.bytes_freed += freed;
            *remaining = remaining.saturating_sub(freed);
        }

        let new_lo = entries.front().map(|e| e.seq);
        (stats, new_lo)
    }

    pub(crate) fn read_batch(&self, from: u64, to: u64, max: usize) -> Vec<(u64, Bytes)> {
        let entries = self.entries.read();
        let start = entries.partition_point(|e| e.seq < from);

        entries
            .iter()
            .skip(start)
            .take_while(|e| e.seq <= to)
            .take(max)
            .map(|e| (e.seq, e.body.clone()))
            .collect()
    }
}

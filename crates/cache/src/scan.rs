//! Snapshot range scan
//!
//! A `CacheScan` walks `[cursor, tail-at-creation]` in ascending order,
//! fetching a bounded batch per storage read so no storage transaction is
//! held while the caller is suspended between entries. Appends that land
//! after the scan was created are never part of it; the caller switches to
//! the live feed at the boundary.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;
use crate::store::{SCAN_BATCH, SequenceCache};

/// Finite, non-restartable scan over retained frames
pub struct CacheScan {
    cache: Arc<SequenceCache>,
    next_seq: u64,
    end_seq: u64,
    buffered: VecDeque<(u64, Bytes)>,
    done: bool,
}

impl CacheScan {
    pub(crate) fn new(cache: Arc<SequenceCache>, cursor: u64, tail: Option<u64>) -> Self {
        let (end_seq, done) = match tail {
            Some(hi) if cursor <= hi => (hi, false),
            _ => (0, true),
        };
        Self {
            cache,
            next_seq: cursor,
            end_seq,
            buffered: VecDeque::new(),
            done,
        }
    }

    /// Highest sequence this scan will yield, if it yields anything
    pub fn end_seq(&self) -> Option<u64> {
        if self.done && self.buffered.is_empty() {
            None
        } else {
            Some(self.end_seq)
        }
    }

    /// Next retained frame at or after the cursor, or `None` when the
    /// snapshot is exhausted
    pub fn next_entry(&mut self) -> Result<Option<(u64, Bytes)>> {
        loop {
            if let Some(entry) = self.buffered.pop_front() {
                return Ok(Some(entry));
            }
            if self.done {
                return Ok(None);
            }

            let batch = self
                .cache
                .read_batch(self.next_seq, self.end_seq, SCAN_BATCH)?;

            match batch.last().map(|&(seq, _)| seq) {
                Some(last_seq) => {
                    self.next_seq = last_seq + 1;
                    if last_seq >= self.end_seq {
                        self.done = true;
                    }
                    self.buffered.extend(batch);
                }
                None => {
                    self.done = true;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "scan_test.rs"]
mod tests;

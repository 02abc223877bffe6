//! Sequence cache facade and durable backend
//!
//! `SequenceCache` owns admission ordering, byte accounting, and the
//! cached `(seq_lo, seq_hi)` bounds; the backends only move bytes. Bounds
//! live outside the store so `bounds()` never takes a storage transaction.
//!
//! The durable backend is an LMDB environment with a single `frames`
//! database. LMDB commits are synchronous, so an acknowledged append is on
//! disk before the dispatcher broadcasts the frame.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use heed::byteorder::BigEndian;
use heed::types::{Bytes as LmdbBytes, U64};
use heed::{Database, Env, EnvOpenOptions};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::entry::{decode_header, decode_value, encode_value, to_unix_nanos};
use crate::error::{CacheError, Result};
use crate::memory::MemoryStore;
use crate::scan::CacheScan;

/// Default GC period between eviction passes
pub const DEFAULT_GC_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Default retention window (7 days)
const DEFAULT_PERSIST_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default LMDB map size (virtual reservation, grows sparsely)
const DEFAULT_MAP_SIZE: usize = 64 * 1024 * 1024 * 1024;

/// Appends between opportunistic size-eviction sweeps
const APPEND_SWEEP_THRESHOLD: u64 = 8192;

/// Entries fetched per read transaction during a scan
pub(crate) const SCAN_BATCH: usize = 256;

/// Cache tuning knobs
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long an entry is retained before time eviction
    pub persist_duration: Duration,

    /// Total body-byte budget; 0 disables size eviction
    pub max_bytes: u64,

    /// Period of the background eviction task
    pub gc_period: Duration,

    /// LMDB map size (durable backend only)
    pub map_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            persist_duration: DEFAULT_PERSIST_DURATION,
            max_bytes: 0,
            gc_period: DEFAULT_GC_PERIOD,
            map_size: DEFAULT_MAP_SIZE,
        }
    }
}

/// Result of one eviction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionStats {
    /// Entries removed
    pub evicted: u64,
    /// Body bytes freed
    pub bytes_freed: u64,
}

/// Cached window bounds, guarded by the admission lock
struct CacheState {
    bounds: Option<(u64, u64)>,
}

/// Durable, bounded, ordered store of `(seq → frame body)`
pub struct SequenceCache {
    backend: Backend,
    state: Mutex<CacheState>,
    bytes_used: AtomicU64,
    appends_since_sweep: AtomicU64,
    config: CacheConfig,
}

enum Backend {
    Durable(DurableStore),
    Memory(MemoryStore),
}

impl SequenceCache {
    /// Open a durable cache backed by an LMDB environment at `path`
    ///
    /// Recovers the surviving window and byte total from the store. Any
    /// contiguous range that survived a crash is a valid window; corrupt
    /// values are counted as zero bytes and skipped on read.
    pub fn durable(path: impl AsRef<Path>, config: CacheConfig) -> Result<Self> {
        let store = DurableStore::open(path.as_ref(), config.map_size)?;
        let (bounds, bytes_used) = store.recover()?;

        if let Some((lo, hi)) = bounds {
            info!(
                seq_lo = lo,
                seq_hi = hi,
                bytes = bytes_used,
                "recovered cache window"
            );
        } else {
            info!("cache store is empty");
        }

        Ok(Self {
            backend: Backend::Durable(store),
            state: Mutex::new(CacheState { bounds }),
            bytes_used: AtomicU64::new(bytes_used),
            appends_since_sweep: AtomicU64::new(0),
            config,
        })
    }

    /// Create an in-memory cache; all entries are lost on restart
    pub fn memory(config: CacheConfig) -> Self {
        Self {
            backend: Backend::Memory(MemoryStore::new()),
            state: Mutex::new(CacheState { bounds: None }),
            bytes_used: AtomicU64::new(0),
            appends_since_sweep: AtomicU64::new(0),
            config,
        }
    }

    /// Current retained window, or `None` when empty
    pub fn bounds(&self) -> Option<(u64, u64)> {
        self.state.lock().bounds
    }

    /// Total body bytes currently retained
    pub fn bytes_used(&self) -> u64 {
        self.bytes_used.load(Ordering::Relaxed)
    }

    /// Admit a frame body at the tail of the log
    ///
    /// Requires `seq` strictly greater than the current tail. The entry is
    /// durable (durable backend) before this returns.
    pub fn append(&self, seq: u64, body: &Bytes, received_at: SystemTime) -> Result<()> {
        let nanos = to_unix_nanos(received_at);

        {
            let mut state = self.state.lock();

            if let Some((lo, hi)) = state.bounds {
                if seq <= hi {
                    if seq >= lo {
                        return Err(CacheError::DuplicateSeq { seq, tail: hi });
                    }
                    return Err(CacheError::NonMonotonicSeq { seq, tail: hi });
                }
            }

            match &self.backend {
                Backend::Durable(store) => {
                    let value = encode_value(nanos, body);
                    store.append(seq, &value)?;
                }
                Backend::Memory(store) => store.append(seq, nanos, body.clone()),
            }

            state.bounds = match state.bounds {
                Some((lo, _)) => Some((lo, seq)),
                None => Some((seq, seq)),
            };
            self.bytes_used
                .fetch_add(body.len() as u64, Ordering::Relaxed);
        }

        // A heavy burst can blow past the byte budget long before the next
        // GC tick; sweep opportunistically.
        if self.config.max_bytes > 0
            && self.appends_since_sweep.fetch_add(1, Ordering::Relaxed) + 1 >= APPEND_SWEEP_THRESHOLD
        {
            self.appends_since_sweep.store(0, Ordering::Relaxed);
            self.evict_once(SystemTime::now())?;
        }

        Ok(())
    }

    /// Run one eviction pass: age first, then bytes, strictly oldest-first
    pub fn evict_once(&self, now: SystemTime) -> Result<EvictionStats> {
        let mut state = self.state.lock();

        let cutoff_nanos = now
            .checked_sub(self.config.persist_duration)
            .map(to_unix_nanos);
        let max_bytes = self.config.max_bytes;
        let mut remaining = self.bytes_used.load(Ordering::Relaxed);

        let should_evict = move |header: Option<(i64, u32)>, remaining: u64| -> bool {
            let Some((received_at, _)) = header else {
                // Corrupt head: unreadable, unreplayable, evict it.
                return true;
            };
            if let Some(cutoff) = cutoff_nanos {
                if received_at < cutoff {
                    return true;
                }
            }
            max_bytes > 0 && remaining > max_bytes
        };

        let (stats, new_lo) = match &self.backend {
            Backend::Durable(store) => store.evict_heads(should_evict, &mut remaining)?,
            Backend::Memory(store) => store.evict_heads(should_evict, &mut remaining),
        };

        if stats.evicted > 0 {
            self.bytes_used
                .fetch_sub(stats.bytes_freed, Ordering::Relaxed);
            state.bounds = match (new_lo, state.bounds) {
                (Some(lo), Some((_, hi))) => Some((lo, hi)),
                _ => None,
            };
            debug!(
                evicted = stats.evicted,
                bytes_freed = stats.bytes_freed,
                seq_lo = ?state.bounds.map(|(lo, _)| lo),
                "evicted cache head"
            );
        }

        Ok(stats)
    }

    /// Start a snapshot scan at `cursor`
    ///
    /// The scan ends at the tail as of this call; frames admitted later do
    /// not appear in it. The scan is finite and non-restartable.
    pub fn scan_from(self: &Arc<Self>, cursor: u64) -> CacheScan {
        CacheScan::new(Arc::clone(self), cursor, self.bounds().map(|(_, hi)| hi))
    }

    /// Background eviction loop; returns when cancelled
    pub async fn run_gc(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.gc_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval fires once immediately; the first real pass waits a period
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.evict_once(SystemTime::now()) {
                        warn!(error = %e, "cache eviction pass failed");
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        debug!("cache gc task stopped");
    }

    /// Flush and release the backing store
    pub fn close(&self) -> Result<()> {
        if let Backend::Durable(store) = &self.backend {
            store.sync()?;
        }
        info!(bounds = ?self.bounds(), "cache closed");
        Ok(())
    }

    /// Fetch up to `max` entries in `[from, to]`, skipping corrupt values
    pub(crate) fn read_batch(&self, from: u64, to: u64, max: usize) -> Result<Vec<(u64, Bytes)>> {
        match &self.backend {
            Backend::Durable(store) => store.read_batch(from, to, max),
            Backend::Memory(store) => Ok(store.read_batch(from, to, max)),
        }
    }
}

type FrameDb = Database<U64<BigEndian>, LmdbBytes>;

/// LMDB-backed frame store
struct DurableStore {
    env: Env,
    db: FrameDb,
}

impl DurableStore {
    fn open(path: &Path, map_size: usize) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let env = unsafe { EnvOpenOptions::new().map_size(map_size).max_dbs(1).open(path)? };

        let db = {
            let mut wtxn = env.write_txn()?;
            let db = env.create_database(&mut wtxn, Some("frames"))?;
            wtxn.commit()?;
            db
        };

        Ok(Self { env, db })
    }

    /// Walk the whole store once to rebuild bounds and the byte total
    fn recover(&self) -> Result<(Option<(u64, u64)>, u64)> {
        let rtxn = self.env.read_txn()?;

        let mut bounds: Option<(u64, u64)> = None;
        let mut bytes_used = 0u64;
        let mut corrupt = 0u64;

        for item in self.db.iter(&rtxn)? {
            let (seq, raw) = item?;
            bounds = match bounds {
                Some((lo, _)) => Some((lo, seq)),
                None => Some((seq, seq)),
            };
            match decode_header(raw) {
                Some((_, size)) => bytes_used += size as u64,
                None => corrupt += 1,
            }
        }

        if corrupt > 0 {
            warn!(corrupt, "cache store contains unreadable entries");
        }

        Ok((bounds, bytes_used))
    }

    fn append(&self, seq: u64, value: &[u8]) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.db.put(&mut wtxn, &seq, value)?;
        wtxn.commit()?;
        Ok(())
    }

    /// Delete head entries while `should_evict` approves, in one txn
    ///
    /// `remaining` is decremented by the freed bytes as the pass proceeds
    /// so a byte-budget predicate sees the shrinking total. Returns the
    /// pass stats and the new lowest key, if any survive.
    fn evict_heads(
        &self,
        mut should_evict: impl FnMut(Option<(i64, u32)>, u64) -> bool,
        remaining: &mut u64,
    ) -> Result<(EvictionStats, Option<u64>)> {
        let mut wtxn = self.env.write_txn()?;
        let mut stats = EvictionStats::default();
        let mut new_lo = None;

        loop {
            let Some((seq, raw)) = self.db.first(&wtxn)? else {
                break;
            };
            let header = decode_header(raw);

            if !should_evict(header, *remaining) {
                new_lo = Some(seq);
                break;
            }

            let freed = header.map(|(_, size)| size as u64).unwrap_or(0);
            self.db.delete(&mut wtxn, &seq)?;
            stats.evicted += 1;
            stats.bytes_freed += freed;
            *remaining = remaining.saturating_sub(freed);
        }

        wtxn.commit()?;
        Ok((stats, new_lo))
    }

    fn read_batch(&self, from: u64, to: u64, max: usize) -> Result<Vec<(u64, Bytes)>> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::with_capacity(max.min(SCAN_BATCH));

        for item in self.db.range(&rtxn, &(from..=to))? {
            let (seq, raw) = item?;
            match decode_value(raw) {
                Some((_, body)) => out.push((seq, body)),
                None => warn!(seq, "skipping corrupt cache entry"),
            }
            if out.len() >= max {
                break;
            }
        }

        Ok(out)
    }

    fn sync(&self) -> Result<()> {
        self.env.force_sync()?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;

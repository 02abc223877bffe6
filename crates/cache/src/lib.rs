//! Manifold Cache - Durable bounded sequence cache
//!
//! The cache is an ordered log of recent firehose frames keyed by sequence
//! number. It is the replay source for subscribers that attach with a
//! cursor: frames are admitted at the tail, scanned from any retained
//! cursor, and evicted strictly from the head under two policies (age and
//! total bytes).
//!
//! # Architecture
//!
//! ```text
//! Dispatcher.admit()
//!     │
//!     ▼
//! SequenceCache.append()  ──►  backend (LMDB or in-memory deque)
//!     │
//!     ├── bounds()        O(1), cached outside the store
//!     ├── scan_from(c)    batched snapshot scan for replay
//!     └── run_gc()        background head eviction
//! ```
//!
//! # Guarantees
//!
//! - Appends are strictly monotonic in `seq`; duplicates and regressions
//!   are rejected before touching the store.
//! - Eviction only ever removes the lowest retained `seq`, so a surviving
//!   range is always a valid contiguous window, clean shutdown or not.
//! - A scan observes the tail as of its creation; frames admitted after
//!   that are the live feed's responsibility.

mod entry;
mod error;
mod memory;
mod scan;
mod store;

pub use error::{CacheError, Result};
pub use scan::CacheScan;
pub use store::{CacheConfig, EvictionStats, SequenceCache, DEFAULT_GC_PERIOD};

//! Tests for snapshot scans

use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;

use super::*;
use crate::store::{CacheConfig, SequenceCache};

fn filled_cache(seqs: std::ops::RangeInclusive<u64>) -> Arc<SequenceCache> {
    let cache = Arc::new(SequenceCache::memory(CacheConfig::default()));
    let now = SystemTime::now();
    for seq in seqs {
        cache
            .append(seq, &Bytes::from(format!("frame-{seq}")), now)
            .unwrap();
    }
    cache
}

fn collect(scan: &mut CacheScan) -> Vec<u64> {
    let mut seqs = Vec::new();
    while let Some((seq, _)) = scan.next_entry().unwrap() {
        seqs.push(seq);
    }
    seqs
}

#[test]
fn test_scan_full_range() {
    let cache = filled_cache(1..=50);
    let mut scan = cache.scan_from(1);

    assert_eq!(scan.end_seq(), Some(50));
    assert_eq!(collect(&mut scan), (1..=50).collect::<Vec<_>>());
}

#[test]
fn test_scan_from_middle() {
    let cache = filled_cache(1..=50);
    let mut scan = cache.scan_from(30);

    assert_eq!(collect(&mut scan), (30..=50).collect::<Vec<_>>());
}

#[test]
fn test_scan_from_exact_head() {
    let cache = filled_cache(10..=20);
    let mut scan = cache.scan_from(10);

    // Attaching at seq_lo delivers exactly that frame and all later.
    assert_eq!(collect(&mut scan), (10..=20).collect::<Vec<_>>());
}

#[test]
fn test_scan_past_tail_is_empty() {
    let cache = filled_cache(1..=10);
    let mut scan = cache.scan_from(11);

    assert_eq!(scan.end_seq(), None);
    assert_eq!(scan.next_entry().unwrap(), None);
}

#[test]
fn test_scan_on_empty_cache() {
    let cache = Arc::new(SequenceCache::memory(CacheConfig::default()));
    let mut scan = cache.scan_from(1);

    assert_eq!(scan.next_entry().unwrap(), None);
}

#[test]
fn test_scan_is_snapshot_at_creation() {
    let cache = filled_cache(1..=10);
    let mut scan = cache.scan_from(1);

    // Appends racing the scan are the live feed's business, not the scan's.
    cache
        .append(11, &Bytes::from_static(b"late"), SystemTime::now())
        .unwrap();

    assert_eq!(collect(&mut scan), (1..=10).collect::<Vec<_>>());
}

#[test]
fn test_scan_exhausted_stays_exhausted() {
    let cache = filled_cache(1..=3);
    let mut scan = cache.scan_from(1);

    assert_eq!(collect(&mut scan), vec![1, 2, 3]);
    assert_eq!(scan.next_entry().unwrap(), None);
    assert_eq!(scan.next_entry().unwrap(), None);
}

#[test]
fn test_scan_spans_multiple_batches() {
    // More entries than one scan batch fetch.
    let cache = filled_cache(1..=700);
    let mut scan = cache.scan_from(1);

    let seqs = collect(&mut scan);
    assert_eq!(seqs.len(), 700);
    assert_eq!(seqs.first(), Some(&1));
    assert_eq!(seqs.last(), Some(&700));
}

#[test]
fn test_scan_with_upstream_gaps() {
    // The upstream owns seq assignment; the cache serves whatever range
    // it was given, gaps included.
    let cache = Arc::new(SequenceCache::memory(CacheConfig::default()));
    let now = SystemTime::now();
    for seq in [1u64, 2, 5, 9] {
        cache.append(seq, &Bytes::from_static(b"x"), now).unwrap();
    }

    let mut scan = cache.scan_from(2);
    assert_eq!(collect(&mut scan), vec![2, 5, 9]);
}

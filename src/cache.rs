//! Bounded, time-expiring result cache.
//!
//! Maps a [`QueryFingerprint`] to a previously computed match list. The
//! cache is an explicitly constructed object shared by all concurrent
//! requests (wrap it in an `Arc`); there is no process-wide instance.
//!
//! # Policy
//!
//! - **TTL**: an entry older than `ttl` is treated as absent by
//!   [`lookup`](ResultCache::lookup) and purged lazily when touched.
//! - **Capacity**: when `max_entries` live entries exist and a new key is
//!   stored, the oldest-inserted entry is evicted first.
//! - **Replacement**: storing an existing key is delete + insert, so the
//!   replaced key moves to the back of the insertion order.
//!
//! # Concurrency
//!
//! Entries are immutable `Arc<[SearchMatch]>` values. Only the key map and
//! the insertion-order queue sit behind a mutex, and the lock is never held
//! across I/O. A reader that received a hit owns a clone of the `Arc`, so a
//! concurrent eviction drops only the cache's reference and never the
//! reader's data.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::fingerprint::QueryFingerprint;
use crate::models::SearchMatch;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default maximum number of entries.
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

struct CacheEntry {
    matches: Arc<[SearchMatch]>,
    created_at: Instant,
    /// Insertion sequence number, used to detect stale order records.
    seq: u64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<QueryFingerprint, CacheEntry>,
    /// Insertion order. Records whose `seq` no longer matches the live entry
    /// are stale and skipped.
    order: VecDeque<(u64, QueryFingerprint)>,
    next_seq: u64,
}

impl CacheInner {
    fn is_live_record(&self, seq: u64, fp: &QueryFingerprint) -> bool {
        self.entries.get(fp).is_some_and(|e| e.seq == seq)
    }

    /// Drop expired entries from the front of the insertion order.
    fn purge_expired_front(&mut self, now: Instant, ttl: Duration) {
        while let Some(&(seq, fp)) = self.order.front() {
            if !self.is_live_record(seq, &fp) {
                self.order.pop_front();
                continue;
            }
            let expired = self
                .entries
                .get(&fp)
                .is_some_and(|e| now.saturating_duration_since(e.created_at) > ttl);
            if !expired {
                break;
            }
            self.order.pop_front();
            self.entries.remove(&fp);
        }
    }

    /// Remove the oldest-inserted entry. Returns false if the cache is empty.
    fn evict_oldest(&mut self) -> bool {
        while let Some((seq, fp)) = self.order.pop_front() {
            if self.is_live_record(seq, &fp) {
                self.entries.remove(&fp);
                return true;
            }
        }
        false
    }

    /// Rebuild the order queue once stale records dominate it.
    fn compact_order(&mut self) {
        if self.order.len() <= self.entries.len() * 2 + 64 {
            return;
        }
        let entries = &self.entries;
        self.order
            .retain(|(seq, fp)| entries.get(fp).is_some_and(|e| e.seq == *seq));
    }
}

/// Shared result cache keyed by query fingerprint.
pub struct ResultCache {
    ttl: Duration,
    max_entries: usize,
    inner: Mutex<CacheInner>,
}

impl ResultCache {
    /// Create a cache. `max_entries` is raised to at least 1.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Look up a fingerprint. Expired entries count as misses.
    pub fn lookup(&self, fp: &QueryFingerprint) -> Option<Arc<[SearchMatch]>> {
        self.lookup_at(fp, Instant::now())
    }

    /// Insert or replace the match list stored under `fp`.
    pub fn store(&self, fp: QueryFingerprint, matches: impl Into<Arc<[SearchMatch]>>) {
        self.store_at(fp, matches.into(), Instant::now());
    }

    /// Drop every entry. Returns the number of entries removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let removed = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();
        removed
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup_at(&self, fp: &QueryFingerprint, now: Instant) -> Option<Arc<[SearchMatch]>> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get(fp)?;
        if now.saturating_duration_since(entry.created_at) > self.ttl {
            // its order record goes stale and is skipped later
            inner.entries.remove(fp);
            return None;
        }
        Some(Arc::clone(&entry.matches))
    }

    fn store_at(&self, fp: QueryFingerprint, matches: Arc<[SearchMatch]>, now: Instant) {
        let mut inner = self.inner.lock();
        inner.entries.remove(&fp);

        if inner.entries.len() >= self.max_entries {
            inner.purge_expired_front(now, self.ttl);
        }
        while inner.entries.len() >= self.max_entries {
            if !inner.evict_oldest() {
                break;
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            fp,
            CacheEntry {
                matches,
                created_at: now,
                seq,
            },
        );
        inner.order.push_back((seq, fp));
        inner.compact_order();
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }
}

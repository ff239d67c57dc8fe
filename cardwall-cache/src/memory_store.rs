//! In-process fragment store.
//!
//! A plain map behind an async lock, standing in for the shared
//! memcached dictionary in tests and single-node deployments. Entries
//! expire by wall clock and are swept lazily when a read lands on them;
//! an optional capacity bound evicts the oldest entry first.

use std::collections::HashMap;
use std::sync::RwLock as StdRwLock;
use std::time::Duration;

use async_trait::async_trait;
use cardwall_core::CardwallResult;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::key::{CacheKey, Fragment};
use crate::store::{expiry_for, CacheStats, CacheStore};

#[derive(Debug)]
struct StoredEntry {
    payload: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
    /// Insertion order, for oldest-first eviction.
    seq: u64,
}

impl StoredEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, StoredEntry>,
    next_seq: u64,
}

/// In-memory [`CacheStore`] backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<Entries>,
    capacity: Option<usize>,
    stats: StdRwLock<CacheStats>,
}

impl MemoryStore {
    /// Create an unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that holds at most `capacity` entries, evicting
    /// the oldest on overflow.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    fn record_hit(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.hits += 1;
        }
    }

    fn record_miss(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.misses += 1;
        }
    }

    fn record_removed(&self, count: u64, freed: usize) {
        if let Ok(mut stats) = self.stats.write() {
            stats.entry_count = stats.entry_count.saturating_sub(count);
            stats.payload_bytes = stats.payload_bytes.saturating_sub(freed as u64);
        }
    }

    fn record_eviction(&self, freed: usize) {
        if let Ok(mut stats) = self.stats.write() {
            stats.evictions += 1;
            stats.entry_count = stats.entry_count.saturating_sub(1);
            stats.payload_bytes = stats.payload_bytes.saturating_sub(freed as u64);
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> CardwallResult<Option<Vec<u8>>> {
        let rendered = key.rendered();
        let now = Utc::now();
        {
            let entries = self.entries.read().await;
            match entries.map.get(&rendered) {
                Some(entry) if !entry.is_expired(now) => {
                    self.record_hit();
                    return Ok(Some(entry.payload.clone()));
                }
                // Expired, fall through and sweep under the write lock.
                Some(_) => {}
                None => {
                    self.record_miss();
                    return Ok(None);
                }
            }
        }

        let mut entries = self.entries.write().await;
        let still_expired = entries
            .map
            .get(&rendered)
            .is_some_and(|entry| entry.is_expired(now));
        if still_expired {
            if let Some(removed) = entries.map.remove(&rendered) {
                self.record_removed(1, removed.payload.len());
            }
        }
        self.record_miss();
        Ok(None)
    }

    async fn put(&self, key: &CacheKey, value: &[u8], ttl: Option<Duration>) -> CardwallResult<()> {
        let rendered = key.rendered();
        let expires_at = expiry_for(ttl);
        let mut entries = self.entries.write().await;

        let replaced_len = entries.map.get(&rendered).map(|entry| entry.payload.len());
        if replaced_len.is_none() {
            if let Some(capacity) = self.capacity {
                while entries.map.len() >= capacity.max(1) {
                    let oldest = entries
                        .map
                        .iter()
                        .min_by_key(|(_, entry)| entry.seq)
                        .map(|(key, _)| key.clone());
                    let Some(oldest) = oldest else { break };
                    if let Some(evicted) = entries.map.remove(&oldest) {
                        self.record_eviction(evicted.payload.len());
                    }
                }
            }
        }

        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.map.insert(
            rendered,
            StoredEntry {
                payload: value.to_vec(),
                expires_at,
                seq,
            },
        );

        if let Ok(mut stats) = self.stats.write() {
            match replaced_len {
                Some(old_len) => {
                    stats.payload_bytes = stats.payload_bytes.saturating_sub(old_len as u64);
                }
                None => stats.entry_count += 1,
            }
            stats.payload_bytes += value.len() as u64;
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> CardwallResult<bool> {
        let rendered = key.rendered();
        let mut entries = self.entries.write().await;
        match entries.map.remove(&rendered) {
            Some(removed) => {
                self.record_removed(1, removed.payload.len());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_fragment(&self, fragment: Fragment) -> CardwallResult<u64> {
        let prefix = fragment.prefix();
        let mut entries = self.entries.write().await;
        let doomed: Vec<String> = entries
            .map
            .keys()
            .filter(|key| key.starts_with(prefix.as_str()))
            .cloned()
            .collect();

        let mut deleted = 0u64;
        let mut freed = 0usize;
        for key in &doomed {
            if let Some(removed) = entries.map.remove(key) {
                deleted += 1;
                freed += removed.payload.len();
            }
        }
        self.record_removed(deleted, freed);
        Ok(deleted)
    }

    async fn stats(&self) -> CardwallResult<CacheStats> {
        Ok(self
            .stats
            .read()
            .map(|stats| stats.clone())
            .unwrap_or_default())
    }
}

// ============================================================================
// TESTS
// ============================================================================

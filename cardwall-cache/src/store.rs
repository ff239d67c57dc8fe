//! Cache store trait and usage statistics.
//!
//! This module defines the contract every fragment store backend
//! implements. Backends hold opaque bytes under rendered cache keys; they
//! never interpret payloads and never decide freshness. Staleness is
//! handled entirely by key composition, so the only per-entry policy a
//! backend carries is an optional TTL bound.

use std::time::Duration;

use async_trait::async_trait;
use cardwall_core::CardwallResult;
use chrono::{DateTime, Utc};

use crate::key::{CacheKey, Fragment};

/// Pluggable fragment store backend.
///
/// Implementations must be thread-safe and support concurrent access.
/// A shared-dictionary backend (memcached in production, LMDB or an
/// in-process map here) may evict or lose any entry at any time; callers
/// treat every read as fallible and every write as best-effort.
///
/// # Error Contract
///
/// `Err` means the backend itself failed (unavailable, I/O, corrupt
/// environment). A missing entry is `Ok(None)`, never an error. The
/// facade degrades backend errors on the read path to misses.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get the payload stored under `key`, if present and not expired.
    async fn get(&self, key: &CacheKey) -> CardwallResult<Option<Vec<u8>>>;

    /// Store `value` under `key`.
    ///
    /// `ttl` bounds the entry's lifetime; `None` keeps it until evicted
    /// or overwritten.
    async fn put(&self, key: &CacheKey, value: &[u8], ttl: Option<Duration>) -> CardwallResult<()>;

    /// Delete the entry under `key`. Returns whether an entry existed.
    async fn delete(&self, key: &CacheKey) -> CardwallResult<bool>;

    /// Delete every entry in a fragment namespace. Returns the count
    /// removed.
    ///
    /// Bulk invalidation is an administrative escape hatch, used when a
    /// fragment's rendering code changes shape or corruption is
    /// suspected. Routine invalidation never scans; it lets keys rotate.
    async fn delete_fragment(&self, fragment: Fragment) -> CardwallResult<u64>;

    /// Get usage statistics.
    async fn stats(&self) -> CardwallResult<CacheStats>;
}

/// Statistics about store usage.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of reads that found a live entry.
    pub hits: u64,
    /// Number of reads that found nothing, an expired entry, or hit a
    /// backend error degraded to a miss.
    pub misses: u64,
    /// Number of entries currently stored, expired entries included
    /// until they are swept.
    pub entry_count: u64,
    /// Approximate payload bytes currently stored.
    pub payload_bytes: u64,
    /// Number of entries dropped to stay within capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Wall-clock expiry for an optional TTL.
///
/// TTLs too large for the calendar mean no bound.
pub(crate) fn expiry_for(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    let delta = chrono::Duration::from_std(ttl?).ok()?;
    Utc::now().checked_add_signed(delta)
}

//! Fragment cache facade.
//!
//! The surface rendering code talks to. Reads and writes degrade rather
//! than fail: a store outage means fragments are computed fresh every
//! time, never an error surfaced to a request. Staleness is handled by
//! key rotation, so the facade's only freshness policy is an optional
//! TTL bound per fragment namespace.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cardwall_core::CardwallResult;

use crate::key::{CacheKey, Fragment};
use crate::store::{CacheStats, CacheStore};

/// Configuration for the fragment cache.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// TTL applied when a fragment has no override. `None` keeps entries
    /// until the store evicts them or their key rotates away.
    pub default_ttl: Option<Duration>,
    /// Per-fragment TTL overrides.
    pub fragment_ttls: HashMap<Fragment, Duration>,
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set the TTL for one fragment namespace.
    pub fn with_fragment_ttl(mut self, fragment: Fragment, ttl: Duration) -> Self {
        self.fragment_ttls.insert(fragment, ttl);
        self
    }

    /// TTL to apply for a fragment.
    pub fn ttl_for(&self, fragment: Fragment) -> Option<Duration> {
        self.fragment_ttls
            .get(&fragment)
            .copied()
            .or(self.default_ttl)
    }
}

/// Result of a cached read, carrying whether the store served it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentRead<T> {
    value: T,
    was_hit: bool,
}

impl<T> FragmentRead<T> {
    /// A read served from the store.
    pub fn hit(value: T) -> Self {
        Self {
            value,
            was_hit: true,
        }
    }

    /// A read that had to be computed.
    pub fn computed(value: T) -> Self {
        Self {
            value,
            was_hit: false,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn was_hit(&self) -> bool {
        self.was_hit
    }
}

/// Fragment cache over a pluggable store.
///
/// # Example
///
/// ```ignore
/// let cache = FragmentCache::with_defaults(Arc::new(MemoryStore::new()));
///
/// let html = cache
///     .render_cached(Fragment::CardDiv, &key, || async {
///         Ok(render_card_div(&card, &viewer))
///     })
///     .await?;
/// ```
pub struct FragmentCache<S>
where
    S: CacheStore,
{
    store: Arc<S>,
    config: CacheConfig,
}

impl<S> FragmentCache<S>
where
    S: CacheStore,
{
    /// Create a new fragment cache.
    pub fn new(store: Arc<S>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    /// Create a new fragment cache with default configuration.
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, CacheConfig::default())
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the payload under `key`. Store failures read as misses.
    pub async fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        match self.store.get(key).await {
            Ok(cached) => cached,
            Err(error) => {
                tracing::warn!(key = %key, %error, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store `value` under `key`, best effort. A failed write is dropped
    /// and logged; the caller already holds the value it needs.
    pub async fn add(&self, key: &CacheKey, value: &[u8], ttl: Option<Duration>) {
        if let Err(error) = self.store.put(key, value, ttl).await {
            tracing::warn!(key = %key, %error, "cache write failed, entry dropped");
        }
    }

    /// Delete the entry under `key`. Returns whether an entry was removed.
    pub async fn delete(&self, key: &CacheKey) -> bool {
        match self.store.delete(key).await {
            Ok(deleted) => deleted,
            Err(error) => {
                tracing::warn!(key = %key, %error, "cache delete failed");
                false
            }
        }
    }

    /// Alias for [`delete`](Self::delete), for call sites that read
    /// better as invalidation.
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        self.delete(key).await
    }

    /// Drop every entry in a fragment namespace. Returns the count
    /// removed, 0 when the store is unavailable.
    pub async fn purge_fragment(&self, fragment: Fragment) -> u64 {
        match self.store.delete_fragment(fragment).await {
            Ok(deleted) => deleted,
            Err(error) => {
                tracing::warn!(%fragment, %error, "fragment purge failed");
                0
            }
        }
    }

    /// Store usage statistics, empty when the store is unavailable.
    pub async fn stats(&self) -> CacheStats {
        match self.store.stats().await {
            Ok(stats) => stats,
            Err(error) => {
                tracing::warn!(%error, "cache stats unavailable");
                CacheStats::default()
            }
        }
    }

    /// Get the payload under `key`, computing and storing it on a miss.
    ///
    /// `compute` runs at most once per call and only when the store has
    /// nothing live under `key`. Its errors propagate; store errors do
    /// not, on either side of the compute.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Option<Duration>,
        compute: F,
    ) -> CardwallResult<FragmentRead<Vec<u8>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CardwallResult<Vec<u8>>>,
    {
        if let Some(cached) = self.get(key).await {
            return Ok(FragmentRead::hit(cached));
        }
        let computed = compute().await?;
        self.add(key, &computed, ttl).await;
        Ok(FragmentRead::computed(computed))
    }

    /// Serve a rendered fragment, computing it on a miss.
    ///
    /// The consumer contract: build the key, try the store, render on a
    /// miss and store the result. Cached payloads that fail UTF-8
    /// decoding are treated as corrupt, recomputed and overwritten. The
    /// TTL comes from the config's per-fragment policy.
    pub async fn render_cached<F, Fut>(
        &self,
        fragment: Fragment,
        key: &CacheKey,
        render: F,
    ) -> CardwallResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CardwallResult<String>>,
    {
        if let Some(cached) = self.get(key).await {
            match String::from_utf8(cached) {
                Ok(html) => return Ok(html),
                Err(_) => {
                    tracing::warn!(key = %key, "cached fragment is not UTF-8, recomputing");
                }
            }
        }
        let rendered = render().await?;
        self.add(key, rendered.as_bytes(), self.config.ttl_for(fragment))
            .await;
        Ok(rendered)
    }
}

// ============================================================================
// TESTS
// ============================================================================

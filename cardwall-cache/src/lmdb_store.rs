//! LMDB-backed fragment store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a
//! memory-mapped store for rendered fragments that survives process
//! restarts. Suits single-host deployments where a separate cache
//! daemon is not worth running.
//!
//! # Value Layout
//!
//! Every value is `[expires_at_millis: 8 bytes LE][payload]`, with 0
//! standing for "no expiry". Expired entries read as misses and stay on
//! disk until [`LmdbStore::purge_expired`] sweeps them.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Reads use read transactions, writes
//! use write transactions, and hit/miss counters are process-lifetime
//! values behind a lock.

use std::path::Path;
use std::sync::RwLock as StdRwLock;
use std::time::Duration;

use async_trait::async_trait;
use cardwall_core::{CardwallError, CardwallResult, StoreError};
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use crate::key::{CacheKey, Fragment};
use crate::store::{expiry_for, CacheStats, CacheStore};

const EXPIRY_PREFIX_LEN: usize = 8;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for CardwallError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::Io(io) => CardwallError::Store(StoreError::Io {
                reason: io.to_string(),
            }),
            other => CardwallError::Store(StoreError::Backend {
                reason: other.to_string(),
            }),
        }
    }
}

/// LMDB-backed [`CacheStore`].
///
/// Rendered keys stay well under LMDB's key size limit: tokens that
/// could grow without bound (params, separator-bearing input) are
/// digested before they reach a key.
pub struct LmdbStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    /// Process-lifetime counters; entry counts are read live from LMDB.
    counters: StdRwLock<CacheStats>,
}

impl LmdbStore {
    /// Create a new LMDB store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment cannot be opened.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            counters: StdRwLock::new(CacheStats::default()),
        })
    }

    /// Delete every expired entry. Returns the count removed.
    pub fn purge_expired(&self) -> Result<u64, LmdbStoreError> {
        let now_millis = Utc::now().timestamp_millis();
        let doomed = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
            let iter = self
                .db
                .iter(&rtxn)
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

            let mut doomed = Vec::new();
            for result in iter {
                let Ok((key, value)) = result else { continue };
                if expires_at(value).is_some_and(|at| now_millis >= at) {
                    doomed.push(key.to_vec());
                }
            }
            doomed
        };

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut purged = 0u64;
        for key in &doomed {
            if self.db.delete(&mut wtxn, key).unwrap_or(false) {
                purged += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(purged)
    }

    fn record_hit(&self) {
        if let Ok(mut counters) = self.counters.write() {
            counters.hits += 1;
        }
    }

    fn record_miss(&self) {
        if let Ok(mut counters) = self.counters.write() {
            counters.misses += 1;
        }
    }

    /// Collect every stored key starting with `prefix`.
    fn collect_keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, LmdbStoreError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut keys = Vec::new();
        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        for result in iter {
            match result {
                Ok((key, _)) if key.starts_with(prefix) => keys.push(key.to_vec()),
                _ => continue,
            }
        }

        Ok(keys)
    }
}

/// Expiry millis from a stored value, `None` when unbounded.
fn expires_at(value: &[u8]) -> Option<i64> {
    let prefix: [u8; EXPIRY_PREFIX_LEN] = value.get(..EXPIRY_PREFIX_LEN)?.try_into().ok()?;
    let millis = i64::from_le_bytes(prefix);
    (millis != 0).then_some(millis)
}

#[async_trait]
impl CacheStore for LmdbStore {
    async fn get(&self, key: &CacheKey) -> CardwallResult<Option<Vec<u8>>> {
        let rendered = key.rendered();

        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        match self.db.get(&rtxn, rendered.as_bytes()) {
            Ok(Some(bytes)) => {
                if bytes.len() < EXPIRY_PREFIX_LEN {
                    return Err(StoreError::CorruptEntry {
                        key: rendered,
                        reason: format!("value of {} bytes lacks expiry prefix", bytes.len()),
                    }
                    .into());
                }
                let now_millis = Utc::now().timestamp_millis();
                if expires_at(bytes).is_some_and(|at| now_millis >= at) {
                    self.record_miss();
                    return Ok(None);
                }
                self.record_hit();
                Ok(Some(bytes[EXPIRY_PREFIX_LEN..].to_vec()))
            }
            Ok(None) => {
                self.record_miss();
                Ok(None)
            }
            Err(e) => {
                self.record_miss();
                Err(LmdbStoreError::Transaction(e.to_string()).into())
            }
        }
    }

    async fn put(&self, key: &CacheKey, value: &[u8], ttl: Option<Duration>) -> CardwallResult<()> {
        let rendered = key.rendered();
        let expiry_millis = expiry_for(ttl).map_or(0, |at| at.timestamp_millis());

        let mut full_bytes = Vec::with_capacity(EXPIRY_PREFIX_LEN + value.len());
        full_bytes.extend_from_slice(&expiry_millis.to_le_bytes());
        full_bytes.extend_from_slice(value);

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, rendered.as_bytes(), &full_bytes)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> CardwallResult<bool> {
        let rendered = key.rendered();

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let deleted = self
            .db
            .delete(&mut wtxn, rendered.as_bytes())
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(deleted)
    }

    async fn delete_fragment(&self, fragment: Fragment) -> CardwallResult<u64> {
        let prefix = fragment.prefix();
        let doomed = self.collect_keys_with_prefix(prefix.as_bytes())?;

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut deleted = 0u64;
        for key in &doomed {
            if self.db.delete(&mut wtxn, key).unwrap_or(false) {
                deleted += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(deleted)
    }

    async fn stats(&self) -> CardwallResult<CacheStats> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        let entry_count = self
            .db
            .len(&rtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut stats = self
            .counters
            .read()
            .map(|counters| counters.clone())
            .unwrap_or_default();
        stats.entry_count = entry_count;
        // payload_bytes stays 0: LMDB doesn't meter per-entry bytes.
        Ok(stats)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbStore::new(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    fn key_in(fragment: Fragment, token: &str) -> CacheKey {
        fragment
            .key()
            .token(token)
            .build()
            .expect("key should build")
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (store, _temp_dir) = create_test_store();
        let key = key_in(Fragment::CardDiv, "Card-101-3");

        store
            .put(&key, b"<div>rendered</div>", None)
            .await
            .expect("put should succeed");

        let cached = store.get(&key).await.expect("get should succeed");
        assert_eq!(cached.as_deref(), Some(b"<div>rendered</div>".as_slice()));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (store, _temp_dir) = create_test_store();
        let key = key_in(Fragment::CardDiv, "Card-999-1");

        assert!(store.get(&key).await.expect("get should succeed").is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_miss() {
        let (store, _temp_dir) = create_test_store();
        let key = key_in(Fragment::Feed, "page-1");

        store
            .put(&key, b"atom", Some(Duration::ZERO))
            .await
            .expect("put should succeed");

        assert!(store.get(&key).await.expect("get should succeed").is_none());

        // Still on disk until a sweep removes it.
        let stats = store.stats().await.expect("stats should succeed");
        assert_eq!(stats.entry_count, 1);

        let purged = store.purge_expired().expect("purge should succeed");
        assert_eq!(purged, 1);

        let stats = store.stats().await.expect("stats should succeed");
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test]
    async fn test_purge_spares_live_entries() {
        let (store, _temp_dir) = create_test_store();
        let doomed = key_in(Fragment::Feed, "page-1");
        let live = key_in(Fragment::Feed, "page-2");
        let unbounded = key_in(Fragment::Feed, "page-3");

        store
            .put(&doomed, b"a", Some(Duration::ZERO))
            .await
            .expect("put should succeed");
        store
            .put(&live, b"b", Some(Duration::from_secs(3600)))
            .await
            .expect("put should succeed");
        store
            .put(&unbounded, b"c", None)
            .await
            .expect("put should succeed");

        assert_eq!(store.purge_expired().expect("purge should succeed"), 1);
        assert!(store.get(&live).await.expect("get").is_some());
        assert!(store.get(&unbounded).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _temp_dir) = create_test_store();
        let key = key_in(Fragment::Tags, "Project-1");

        store.put(&key, b"tags", None).await.expect("put");
        assert!(store.delete(&key).await.expect("delete should succeed"));
        assert!(!store.delete(&key).await.expect("delete should succeed"));
        assert!(store.get(&key).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_delete_fragment_spares_other_namespaces() {
        let (store, _temp_dir) = create_test_store();
        let div_a = key_in(Fragment::CardDiv, "Card-1-1");
        let div_b = key_in(Fragment::CardDiv, "Card-2-1");
        let popup = key_in(Fragment::CardPopup, "Card-1-1");

        store.put(&div_a, b"a", None).await.expect("put");
        store.put(&div_b, b"b", None).await.expect("put");
        store.put(&popup, b"p", None).await.expect("put");

        let deleted = store
            .delete_fragment(Fragment::CardDiv)
            .await
            .expect("delete_fragment should succeed");
        assert_eq!(deleted, 2);

        assert!(store.get(&div_a).await.expect("get").is_none());
        assert!(store.get(&popup).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let key = key_in(Fragment::ColorLegend, "Project-3");

        {
            let store =
                LmdbStore::new(temp_dir.path(), 10).expect("store creation should succeed");
            store
                .put(&key, b"legend", None)
                .await
                .expect("put should succeed");
        }

        let reopened = LmdbStore::new(temp_dir.path(), 10).expect("store creation should succeed");
        let cached = reopened.get(&key).await.expect("get should succeed");
        assert_eq!(cached.as_deref(), Some(b"legend".as_slice()));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_reported() {
        let (store, _temp_dir) = create_test_store();
        let key = key_in(Fragment::CardDiv, "Card-101-3");

        // Plant a value shorter than the expiry prefix.
        let mut wtxn = store.env.write_txn().expect("write txn");
        store
            .db
            .put(&mut wtxn, key.rendered().as_bytes(), b"xyz")
            .expect("raw put");
        wtxn.commit().expect("commit");

        let err = store.get(&key).await.expect_err("get should fail");
        assert!(matches!(
            err,
            CardwallError::Store(StoreError::CorruptEntry { .. })
        ));
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let (store, _temp_dir) = create_test_store();
        let key = key_in(Fragment::Filters, "abc");

        let _ = store.get(&key).await;
        store.put(&key, b"options", None).await.expect("put");
        let _ = store.get(&key).await;
        let _ = store.get(&key).await;

        let stats = store.stats().await.expect("stats should succeed");
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_overwrite_returns_latest() {
        let (store, _temp_dir) = create_test_store();
        let key = key_in(Fragment::PropertyEditor, "Card-5-2");

        store.put(&key, b"first", None).await.expect("put");
        store.put(&key, b"second", None).await.expect("put");

        let cached = store.get(&key).await.expect("get should succeed");
        assert_eq!(cached.as_deref(), Some(b"second".as_slice()));
    }
}

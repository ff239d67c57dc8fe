//! Cardwall Cache - fragment keys, fingerprints and invalidation.
//!
//! Rendered page fragments are cached under keys that encode everything
//! the fragment's bytes depend on. When state changes, dependent keys
//! change with it; nothing overwrites a cache entry in place, stale
//! entries simply stop being asked for and age out of the store.
//!
//! # Design Philosophy
//!
//! Invalidation-by-deletion couples every write to a list of keys someone
//! remembered to clear. This module inverts that: writes bump counters
//! and timestamps, keys are composed from those counters at read time,
//! and the rules for what a write touches live in one inspectable table
//! ([`InvalidationRules`]) instead of scattered callbacks.
//!
//! # Example
//!
//! ```ignore
//! let mut keys = key_factory.request();
//! let key = keys.card_div(&card, &viewer).await?;
//!
//! let html = cache
//!     .render_cached(Fragment::CardDiv, &key, || async {
//!         Ok(render_card_div(&card, &viewer))
//!     })
//!     .await?;
//! ```

pub mod directory;
pub mod facade;
pub mod fingerprint;
pub mod invalidate;
pub mod journal;
pub mod key;
pub mod keys;
pub mod lmdb_store;
pub mod memory_store;
pub mod segment;
pub mod store;

pub use directory::{MemoryDirectory, RowSpec, TableRow};
pub use facade::{CacheConfig, FragmentCache, FragmentRead};
pub use fingerprint::{count_fingerprint, fingerprint, ScopeSelector, ScopeStats, StatsSource};
pub use invalidate::{
    ChangeMask, InvalidationRules, Invalidator, LinkRule, MutationEvent, MutationKind,
    MutationSink, ReferenceIndex, ReferenceSource, Touch, TouchRule,
};
pub use journal::{InMemoryStalenessJournal, StalenessJournal};
pub use key::{CacheKey, CacheKeyBuilder, Fragment, KEY_SEPARATOR};
pub use keys::{KeyFactory, RequestKeys};
pub use lmdb_store::{LmdbStore, LmdbStoreError};
pub use memory_store::MemoryStore;
pub use segment::{
    AllOfKindSegment, CachingStampSegment, EntityVersionSegment, KeySegment, OwnedScopeSegment,
    ParamsDigestSegment, StructureSegment, ViewerSegment,
};
pub use store::{CacheStats, CacheStore};

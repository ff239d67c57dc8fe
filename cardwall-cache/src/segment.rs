//! Key segments: pure state-to-token functions.
//!
//! Each segment wraps one facet of mutable domain state and renders a short
//! token that changes exactly when that facet changes. Segments are cheap,
//! constructed fresh on every request, and composed into a [`CacheKey`]
//! by the key builders.
//!
//! [`CacheKey`]: crate::key::CacheKey

use cardwall_core::{short_digest_bytes, EntityId, EntityKind, KeyError, Revision, Versioned, Viewer};
use serde::Serialize;

use crate::fingerprint::{fingerprint, ScopeStats, NEVER_TOKEN};

/// A composable unit of a cache key.
///
/// `token()` is referentially transparent: two calls with no intervening
/// domain mutation yield the same string. Tokens are separator-safe by
/// construction, every character is alphanumeric, `_` or `-`; free-form
/// input is digested before it reaches a token.
pub trait KeySegment {
    fn token(&self) -> String;
}

/// `{class}-{id}-{version}`. Changes iff the entity's own row was mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityVersionSegment {
    kind: EntityKind,
    id: EntityId,
    version: Revision,
}

impl EntityVersionSegment {
    /// Build the segment for a persisted entity.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::NotPersisted`] when the entity has no assigned
    /// id or saved version. An unsaved record has no stable identity, and
    /// a key built from one could silently alias another entity's cache
    /// entry, so construction fails loudly instead.
    pub fn for_entity<E: Versioned>(entity: &E) -> Result<Self, KeyError> {
        if !entity.is_persisted() {
            return Err(KeyError::NotPersisted {
                kind: entity.kind(),
            });
        }
        Ok(Self {
            kind: entity.kind(),
            id: entity.entity_id(),
            version: entity.version(),
        })
    }
}

impl KeySegment for EntityVersionSegment {
    fn token(&self) -> String {
        format!("{}-{}-{}", self.kind.as_str(), self.id, self.version)
    }
}

/// `{class}-{id}-{version}-{stamp}`: the caching stamp.
///
/// The stamp is the entity's staleness counter, bumped by invalidation
/// triggers when something the entity's rendering depends on changes
/// without touching the entity's own version (a renamed tree parent, a
/// created or destroyed link). Version and stamp together capture "this
/// entity's renderable state right now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachingStampSegment {
    base: EntityVersionSegment,
    stamp: Revision,
}

impl CachingStampSegment {
    /// # Errors
    ///
    /// Returns [`KeyError::NotPersisted`] for unsaved entities, same as
    /// [`EntityVersionSegment::for_entity`].
    pub fn for_entity<E: Versioned>(entity: &E, stamp: Revision) -> Result<Self, KeyError> {
        Ok(Self {
            base: EntityVersionSegment::for_entity(entity)?,
            stamp,
        })
    }
}

impl KeySegment for CachingStampSegment {
    fn token(&self) -> String {
        format!("{}-{}", self.base.token(), self.stamp)
    }
}

/// `{user_id|anon}-{rank}`: who is looking.
///
/// Fragments whose markup differs by privilege (edit affordances, admin
/// links) carry this segment so viewers at different ranks never share an
/// entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewerSegment {
    user: Option<EntityId>,
    rank: u8,
}

impl ViewerSegment {
    pub fn for_viewer(viewer: &Viewer) -> Self {
        Self {
            user: viewer.user_id,
            rank: viewer.role.rank(),
        }
    }
}

impl KeySegment for ViewerSegment {
    fn token(&self) -> String {
        match self.user {
            Some(id) => format!("{}-{}", id, self.rank),
            None => format!("anon-{}", self.rank),
        }
    }
}

/// `{fingerprint}-{structure_revision}`: the shape of a project's metadata.
///
/// Combines a scope fingerprint over the structural table with the
/// project-wide structure revision counter, so the token moves when a row
/// in scope changes or when any structural mutation elsewhere in the
/// project bumps the revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureSegment {
    fingerprint: String,
    revision: Revision,
}

impl StructureSegment {
    pub fn new(stats: &ScopeStats, revision: Revision) -> Self {
        Self {
            fingerprint: fingerprint(stats),
            revision,
        }
    }
}

impl KeySegment for StructureSegment {
    fn token(&self) -> String {
        format!("{}-{}", self.fingerprint, self.revision)
    }
}

/// Whole-table fingerprint, e.g. "all users".
///
/// Recomputed on every request; the token must never be memoized across
/// requests because nothing else invalidates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllOfKindSegment {
    fingerprint: String,
}

impl AllOfKindSegment {
    pub fn new(stats: &ScopeStats) -> Self {
        Self {
            fingerprint: fingerprint(stats),
        }
    }
}

impl KeySegment for AllOfKindSegment {
    fn token(&self) -> String {
        self.fingerprint.clone()
    }
}

/// `{count}-{latest_micros|never}`: count and recency of an owned scope.
///
/// Used where the raw aggregates are wanted in the key for debuggability
/// instead of a digest, e.g. "this project's tags" or a murmur feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnedScopeSegment {
    rows: u64,
    latest_micros: Option<i64>,
}

impl OwnedScopeSegment {
    pub fn new(stats: &ScopeStats) -> Self {
        Self {
            rows: stats.rows,
            latest_micros: stats.latest_micros(),
        }
    }
}

impl KeySegment for OwnedScopeSegment {
    fn token(&self) -> String {
        match self.latest_micros {
            Some(micros) => format!("{}-{}", self.rows, micros),
            None => format!("{}-{}", self.rows, NEVER_TOKEN),
        }
    }
}

/// Digest of an arbitrary request parameter bag.
///
/// Parameters are serialized with the RFC 8785 canonicalization scheme
/// before digesting, so logically equal bags produce equal tokens no
/// matter how the caller assembled them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamsDigestSegment {
    digest: String,
}

impl ParamsDigestSegment {
    /// # Errors
    ///
    /// Returns [`KeyError::ParamsNotSerializable`] when the parameter bag
    /// cannot be represented as canonical JSON.
    pub fn new<P: Serialize + ?Sized>(params: &P) -> Result<Self, KeyError> {
        let canonical = serde_json_canonicalizer::to_vec(&params)
            .map_err(|e| KeyError::ParamsNotSerializable {
                reason: e.to_string(),
            })?;
        Ok(Self {
            digest: short_digest_bytes(&canonical),
        })
    }
}

impl KeySegment for ParamsDigestSegment {
    fn token(&self) -> String {
        self.digest.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardwall_core::{Card, EntityKind, ProjectRole, Timestamp};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn at(micros: i64) -> Timestamp {
        Utc.timestamp_micros(micros).single().expect("timestamp should be valid")
    }

    fn card(id: i64, version: i64) -> Card {
        Card {
            id,
            project_id: 1,
            number: 42,
            name: "Fix signup flow".to_string(),
            card_type_name: "Story".to_string(),
            version,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_entity_version_token_format() {
        let segment = EntityVersionSegment::for_entity(&card(101, 3))
            .expect("persisted card should build a segment");
        assert_eq!(segment.token(), "Card-101-3");
        assert_eq!(segment.token(), segment.token());
    }

    #[test]
    fn test_entity_version_rejects_unsaved() {
        let err = EntityVersionSegment::for_entity(&card(0, 0))
            .expect_err("unsaved card must not produce a key segment");
        assert_eq!(err, KeyError::NotPersisted { kind: EntityKind::Card });

        assert!(EntityVersionSegment::for_entity(&card(101, 0)).is_err());
    }

    #[test]
    fn test_caching_stamp_token() {
        let stamped = CachingStampSegment::for_entity(&card(101, 3), 7)
            .expect("persisted card should build a segment");
        assert_eq!(stamped.token(), "Card-101-3-7");

        // A never-bumped entity carries stamp zero.
        let unstamped = CachingStampSegment::for_entity(&card(101, 3), 0)
            .expect("persisted card should build a segment");
        assert_eq!(unstamped.token(), "Card-101-3-0");
    }

    #[test]
    fn test_caching_stamp_moves_without_version_change() {
        let before = CachingStampSegment::for_entity(&card(101, 3), 0).expect("segment");
        let after = CachingStampSegment::for_entity(&card(101, 3), 1).expect("segment");
        assert_ne!(before.token(), after.token());
    }

    #[test]
    fn test_viewer_token() {
        let member = ViewerSegment::for_viewer(&Viewer::member(9, ProjectRole::Member));
        assert_eq!(member.token(), "9-2");

        let admin = ViewerSegment::for_viewer(&Viewer::member(9, ProjectRole::ProjectAdmin));
        assert_eq!(admin.token(), "9-3");

        let anon = ViewerSegment::for_viewer(&Viewer::anonymous());
        assert_eq!(anon.token(), "anon-0");
    }

    #[test]
    fn test_structure_token_combines_fingerprint_and_revision() {
        let stats = ScopeStats::new(4, Some(at(1_700_000_000_000_000)));
        let s1 = StructureSegment::new(&stats, 2);
        let s2 = StructureSegment::new(&stats, 3);

        assert!(s1.token().ends_with("-2"));
        assert_ne!(s1.token(), s2.token());
        assert_eq!(
            s1.token().trim_end_matches("-2"),
            s2.token().trim_end_matches("-3")
        );
    }

    #[test]
    fn test_all_of_kind_token_is_the_fingerprint() {
        let stats = ScopeStats::new(250, Some(at(1_700_000_000_000_000)));
        let segment = AllOfKindSegment::new(&stats);
        assert_eq!(segment.token(), fingerprint(&stats));
    }

    #[test]
    fn test_owned_scope_token() {
        let populated = OwnedScopeSegment::new(&ScopeStats::new(17, Some(at(1_724_601_600_000_000))));
        assert_eq!(populated.token(), "17-1724601600000000");

        let empty = OwnedScopeSegment::new(&ScopeStats::empty());
        assert_eq!(empty.token(), "0-never");
    }

    #[test]
    fn test_params_digest_canonicalizes() {
        #[derive(Serialize)]
        struct FeedParams {
            page: u32,
            format: &'static str,
        }

        let from_struct = ParamsDigestSegment::new(&FeedParams { page: 2, format: "atom" })
            .expect("params should serialize");
        let from_value = ParamsDigestSegment::new(&json!({"format": "atom", "page": 2}))
            .expect("params should serialize");
        assert_eq!(from_struct.token(), from_value.token());

        let other = ParamsDigestSegment::new(&json!({"format": "atom", "page": 3}))
            .expect("params should serialize");
        assert_ne!(from_struct.token(), other.token());
    }

    #[test]
    fn test_tokens_are_separator_safe() {
        let tokens = [
            EntityVersionSegment::for_entity(&card(101, 3)).expect("segment").token(),
            CachingStampSegment::for_entity(&card(101, 3), 9).expect("segment").token(),
            ViewerSegment::for_viewer(&Viewer::anonymous()).token(),
            StructureSegment::new(&ScopeStats::empty(), 0).token(),
            AllOfKindSegment::new(&ScopeStats::empty()).token(),
            OwnedScopeSegment::new(&ScopeStats::empty()).token(),
            ParamsDigestSegment::new(&json!({"q": "a|b|c"})).expect("segment").token(),
        ];
        for token in tokens {
            assert!(!token.contains('|'), "token {:?} contains the separator", token);
            assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
        }
    }
}

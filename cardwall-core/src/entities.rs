//! Core entity structures
//!
//! Pure data with no behavior beyond identity helpers. These structs carry
//! only the fields the cache layer reads when composing keys: identity,
//! project scoping, version counters and recency timestamps, plus the
//! display fields tests render into fragments.

use crate::{EntityId, EntityKind, ProjectId, Revision, Timestamp};
use serde::{Deserialize, Serialize};

/// Reference to an entity by type and ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.kind.as_str(), self.id)
    }
}

/// Behavior shared by entities that carry a monotonically increasing
/// version counter.
///
/// The invariant the cache depends on: `version()` strictly increases on
/// every persisted mutation, never decreases, and is never reused for a
/// different state of the same id. Unsaved records report `is_persisted()
/// == false` and must never be cached.
pub trait Versioned {
    fn kind(&self) -> EntityKind;
    fn entity_id(&self) -> EntityId;
    fn version(&self) -> Revision;

    fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind(), self.entity_id())
    }

    /// Persisted rows have both an assigned id and at least one saved
    /// version. Fresh in-memory records have neither.
    fn is_persisted(&self) -> bool {
        self.entity_id() >= 1 && self.version() >= 1
    }
}

/// Card - the unit of work being tracked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: EntityId,
    pub project_id: ProjectId,
    /// User-visible card number, unique per project ("#42").
    pub number: i64,
    pub name: String,
    pub card_type_name: String,
    pub version: Revision,
    pub updated_at: Timestamp,
}

impl Versioned for Card {
    fn kind(&self) -> EntityKind {
        EntityKind::Card
    }

    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn version(&self) -> Revision {
        self.version
    }
}

/// Page - a wiki page belonging to a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: EntityId,
    pub project_id: ProjectId,
    pub name: String,
    pub version: Revision,
    pub updated_at: Timestamp,
}

impl Versioned for Page {
    fn kind(&self) -> EntityKind {
        EntityKind::Page
    }

    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn version(&self) -> Revision {
        self.version
    }
}

/// Project - the tenant scope for cards, pages, murmurs and structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    /// URL-safe identifier ("team_alpha").
    pub identifier: String,
    pub name: String,
    pub created_at: Timestamp,
}

/// User - a member of the installation.
///
/// Users are not versioned; fragments that embed user names key off the
/// whole-table user fingerprint instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: EntityId,
    pub login: String,
    pub display_name: String,
    pub site_admin: bool,
    pub updated_at: Timestamp,
}

/// Murmur - a short chat message, optionally attached to a card.
/// Murmurs are append-only: rows are never edited after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Murmur {
    pub id: EntityId,
    pub project_id: ProjectId,
    pub author_id: EntityId,
    pub body: String,
    pub created_at: Timestamp,
}

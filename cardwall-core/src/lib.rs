//! Cardwall Core - Domain Types
//!
//! Pure data structures with no behavior beyond identity helpers. All other
//! crates depend on this. This crate contains the entity model the cache
//! layer keys against plus the shared error taxonomy.

pub mod entities;
pub mod enums;
pub mod error;
pub mod identity;
pub mod viewer;

pub use entities::{Card, EntityRef, Murmur, Page, Project, User, Versioned};
pub use enums::{EntityKind, LinkKind, ProjectRole};
pub use error::{CardwallError, CardwallResult, KeyError, SourceError, StoreError};
pub use identity::{short_digest, short_digest_bytes, EntityId, ProjectId, Revision, Timestamp};
pub use viewer::Viewer;

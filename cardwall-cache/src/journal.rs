//! Staleness journal: the durable counters behind caching stamps.
//!
//! Two counter families live here. Per-entity staleness counters feed the
//! caching stamp segment; they are bumped by invalidation triggers when an
//! entity's rendering goes stale for reasons outside its own row. The
//! per-project structure revision feeds the structure segment; it advances
//! on any structural mutation in the project.
//!
//! In production both are plain integer columns owned by the persistence
//! layer and merely read here. The in-memory implementation is the
//! in-process stand-in and backs every test.

use std::collections::HashMap;

use async_trait::async_trait;
use cardwall_core::{CardwallResult, EntityRef, ProjectId, Revision};

/// Read and advance staleness counters.
///
/// Counters default to zero: an entity that was never bumped reads 0, a
/// project with no structural mutations reads revision 0. `bump` returns
/// the new value so triggers can log what they did.
#[async_trait]
pub trait StalenessJournal: Send + Sync {
    /// Current staleness counter for an entity.
    async fn stamp(&self, entity: EntityRef) -> CardwallResult<Revision>;

    /// Advance an entity's staleness counter, returning the new value.
    async fn bump(&self, entity: EntityRef) -> CardwallResult<Revision>;

    /// Current structure revision for a project.
    async fn structure_revision(&self, project: ProjectId) -> CardwallResult<Revision>;

    /// Advance a project's structure revision, returning the new value.
    async fn bump_structure(&self, project: ProjectId) -> CardwallResult<Revision>;
}

/// In-memory staleness journal.
///
/// Uses tokio::sync::RwLock for safe async access.
#[derive(Debug, Default)]
pub struct InMemoryStalenessJournal {
    stamps: tokio::sync::RwLock<HashMap<EntityRef, Revision>>,
    structure: tokio::sync::RwLock<HashMap<ProjectId, Revision>>,
}

impl InMemoryStalenessJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StalenessJournal for InMemoryStalenessJournal {
    async fn stamp(&self, entity: EntityRef) -> CardwallResult<Revision> {
        let stamps = self.stamps.read().await;
        Ok(stamps.get(&entity).copied().unwrap_or(0))
    }

    async fn bump(&self, entity: EntityRef) -> CardwallResult<Revision> {
        let mut stamps = self.stamps.write().await;
        let counter = stamps.entry(entity).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn structure_revision(&self, project: ProjectId) -> CardwallResult<Revision> {
        let structure = self.structure.read().await;
        Ok(structure.get(&project).copied().unwrap_or(0))
    }

    async fn bump_structure(&self, project: ProjectId) -> CardwallResult<Revision> {
        let mut structure = self.structure.write().await;
        let counter = structure.entry(project).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

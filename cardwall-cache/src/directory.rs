//! In-memory domain table directory.
//!
//! Plays the part of the persistence layer for tests and single-process
//! use: it holds rows, serves scope aggregates, and publishes a
//! [`MutationEvent`] for every write the way the production write path
//! does. Production deployments implement [`StatsSource`] and
//! [`ReferenceSource`] against the real database; everything downstream
//! of those traits behaves identically against this directory.
//!
//! Timestamps come from a monotonic wall clock: consecutive writes always
//! get strictly increasing `updated_at` values, so two mutations of a
//! scope never collapse into one fingerprint granule.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cardwall_core::{
    CardwallResult, EntityId, EntityKind, EntityRef, LinkKind, ProjectId, SourceError, Timestamp,
};
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::fingerprint::{ScopeSelector, ScopeStats, StatsSource};
use crate::invalidate::{
    MutationEvent, MutationKind, MutationSink, ReferenceIndex, ReferenceSource,
};

/// One stored row. Only the fields scope aggregates read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub id: EntityId,
    pub project: Option<ProjectId>,
    pub owner: Option<EntityRef>,
    /// Opaque labels a selector condition can match against.
    pub facets: Vec<String>,
    pub updated_at: Timestamp,
}

/// Description of a row to insert.
#[derive(Debug, Clone)]
pub struct RowSpec {
    kind: EntityKind,
    id: EntityId,
    project: Option<ProjectId>,
    owner: Option<EntityRef>,
    facets: Vec<String>,
    at: Option<Timestamp>,
}

impl RowSpec {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self {
            kind,
            id,
            project: None,
            owner: None,
            facets: Vec::new(),
            at: None,
        }
    }

    pub fn in_project(mut self, project: ProjectId) -> Self {
        self.project = Some(project);
        self
    }

    pub fn owned_by(mut self, owner: EntityRef) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_facet(mut self, facet: impl Into<String>) -> Self {
        self.facets.push(facet.into());
        self
    }

    /// Pin the row's `updated_at` instead of taking it from the clock.
    pub fn at(mut self, at: Timestamp) -> Self {
        self.at = Some(at);
        self
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind, self.id)
    }
}

/// In-memory directory of domain tables.
pub struct MemoryDirectory {
    tables: RwLock<HashMap<EntityKind, HashMap<EntityId, TableRow>>>,
    references: Arc<ReferenceIndex>,
    sinks: Vec<Arc<dyn MutationSink>>,
    last_tick: Mutex<Timestamp>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            references: Arc::new(ReferenceIndex::new()),
            sinks: Vec::new(),
            last_tick: Mutex::new(Timestamp::UNIX_EPOCH),
        }
    }

    /// The reverse reference index this directory maintains. Hand it to
    /// the invalidator so both see the same edges.
    pub fn references(&self) -> Arc<ReferenceIndex> {
        Arc::clone(&self.references)
    }

    /// Register an observer for every subsequent write.
    pub fn register_sink(&mut self, sink: Arc<dyn MutationSink>) {
        self.sinks.push(sink);
    }

    /// Strictly increasing wall-clock timestamp.
    async fn next_timestamp(&self) -> Timestamp {
        let mut last = self.last_tick.lock().await;
        let now = Utc::now();
        let next = if now > *last {
            now
        } else {
            *last + chrono::Duration::microseconds(1)
        };
        *last = next;
        next
    }

    async fn publish(&self, event: MutationEvent) -> CardwallResult<()> {
        for sink in &self.sinks {
            sink.observe(&event).await?;
        }
        Ok(())
    }

    async fn project_of(&self, entity: EntityRef) -> Option<ProjectId> {
        let tables = self.tables.read().await;
        tables
            .get(&entity.kind)
            .and_then(|rows| rows.get(&entity.id))
            .and_then(|row| row.project)
    }

    /// Look up one stored row.
    pub async fn row(&self, entity: EntityRef) -> Option<TableRow> {
        let tables = self.tables.read().await;
        tables
            .get(&entity.kind)
            .and_then(|rows| rows.get(&entity.id))
            .cloned()
    }

    /// Insert a row and publish the mutation. Inserting over an existing
    /// id replaces the row and publishes an update instead.
    pub async fn insert(&self, spec: RowSpec) -> CardwallResult<EntityRef> {
        let entity = spec.entity_ref();
        let updated_at = match spec.at {
            Some(at) => at,
            None => self.next_timestamp().await,
        };
        let row = TableRow {
            id: spec.id,
            project: spec.project,
            owner: spec.owner,
            facets: spec.facets,
            updated_at,
        };

        let replaced = {
            let mut tables = self.tables.write().await;
            tables
                .entry(spec.kind)
                .or_default()
                .insert(spec.id, row)
                .is_some()
        };

        let change = if replaced {
            MutationKind::Updated
        } else {
            MutationKind::Created
        };
        self.publish(MutationEvent::entity(change, entity, spec.project))
            .await?;
        Ok(entity)
    }

    /// Advance a row's `updated_at` and publish the update.
    pub async fn touch(&self, entity: EntityRef) -> CardwallResult<()> {
        let updated_at = self.next_timestamp().await;
        let project = {
            let mut tables = self.tables.write().await;
            let row = tables
                .get_mut(&entity.kind)
                .and_then(|rows| rows.get_mut(&entity.id))
                .ok_or(SourceError::MissingRow { entity })?;
            row.updated_at = updated_at;
            row.project
        };
        self.publish(MutationEvent::entity(MutationKind::Updated, entity, project))
            .await
    }

    /// Remove a row, drop its reference edges, and publish the mutation.
    /// Returns whether the row existed.
    pub async fn remove(&self, entity: EntityRef) -> CardwallResult<bool> {
        let removed = {
            let mut tables = self.tables.write().await;
            tables
                .get_mut(&entity.kind)
                .and_then(|rows| rows.remove(&entity.id))
        };
        let Some(row) = removed else {
            return Ok(false);
        };

        self.references.forget_entity(entity).await;
        self.publish(MutationEvent::entity(
            MutationKind::Destroyed,
            entity,
            row.project,
        ))
        .await?;
        Ok(true)
    }

    /// Create a link between two entities and publish it.
    pub async fn link(
        &self,
        link: LinkKind,
        from: EntityRef,
        to: EntityRef,
    ) -> CardwallResult<()> {
        let project = match self.project_of(from).await {
            Some(project) => Some(project),
            None => self.project_of(to).await,
        };
        self.publish(MutationEvent::link(
            MutationKind::Created,
            link,
            from,
            to,
            project,
        ))
        .await
    }

    /// Destroy a link between two entities and publish it.
    pub async fn unlink(
        &self,
        link: LinkKind,
        from: EntityRef,
        to: EntityRef,
    ) -> CardwallResult<()> {
        let project = match self.project_of(from).await {
            Some(project) => Some(project),
            None => self.project_of(to).await,
        };
        self.publish(MutationEvent::link(
            MutationKind::Destroyed,
            link,
            from,
            to,
            project,
        ))
        .await
    }

    /// Record that `referrer`'s rendering displays `value`.
    ///
    /// The write that created the reference (a property edit, say) fires
    /// its own update event through [`touch`](Self::touch); this only
    /// maintains the reverse edge.
    pub async fn reference(&self, referrer: EntityRef, value: EntityRef) {
        self.references.record(referrer, value).await;
    }

    /// Drop a recorded reference edge.
    pub async fn unreference(&self, referrer: EntityRef, value: EntityRef) {
        self.references.forget(referrer, value).await;
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatsSource for MemoryDirectory {
    async fn scope_stats(&self, selector: &ScopeSelector) -> CardwallResult<ScopeStats> {
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(&selector.kind) else {
            return Ok(ScopeStats::empty());
        };

        let mut count = 0u64;
        let mut latest: Option<Timestamp> = None;
        for row in rows.values() {
            if selector.project.is_some() && row.project != selector.project {
                continue;
            }
            if let Some(owner) = selector.owner {
                if row.owner != Some(owner) {
                    continue;
                }
            }
            if let Some(condition) = &selector.condition {
                if !row.facets.iter().any(|facet| facet == condition) {
                    continue;
                }
            }
            count += 1;
            if latest.map_or(true, |t| row.updated_at > t) {
                latest = Some(row.updated_at);
            }
        }
        Ok(ScopeStats::new(count, latest))
    }
}

#[async_trait]
impl ReferenceSource for MemoryDirectory {
    async fn referencing(&self, entity: EntityRef) -> CardwallResult<Vec<EntityRef>> {
        self.references.referencing(entity).await
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invalidate::Invalidator;
    use crate::journal::{InMemoryStalenessJournal, StalenessJournal};

    struct RecordingSink {
        events: Mutex<Vec<MutationEvent>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        async fn events(&self) -> Vec<MutationEvent> {
            self.events.lock().await.clone()
        }
    }

    #[async_trait]
    impl MutationSink for RecordingSink {
        async fn observe(&self, event: &MutationEvent) -> CardwallResult<()> {
            self.events.lock().await.push(*event);
            Ok(())
        }
    }

    fn card(id: i64) -> EntityRef {
        EntityRef::new(EntityKind::Card, id)
    }

    #[tokio::test]
    async fn test_insert_and_scope_stats() {
        let directory = MemoryDirectory::new();
        directory
            .insert(RowSpec::new(EntityKind::Murmur, 1).in_project(1))
            .await
            .expect("insert should succeed");
        directory
            .insert(RowSpec::new(EntityKind::Murmur, 2).in_project(1))
            .await
            .expect("insert should succeed");
        directory
            .insert(RowSpec::new(EntityKind::Murmur, 3).in_project(2))
            .await
            .expect("insert should succeed");

        let project_scope = directory
            .scope_stats(&ScopeSelector::project_table(EntityKind::Murmur, 1))
            .await
            .expect("stats should succeed");
        assert_eq!(project_scope.rows, 2);
        assert!(project_scope.latest.is_some());

        let whole_table = directory
            .scope_stats(&ScopeSelector::table(EntityKind::Murmur))
            .await
            .expect("stats should succeed");
        assert_eq!(whole_table.rows, 3);
    }

    #[tokio::test]
    async fn test_unknown_kind_scope_is_empty() {
        let directory = MemoryDirectory::new();
        let stats = directory
            .scope_stats(&ScopeSelector::table(EntityKind::Tab))
            .await
            .expect("stats should succeed");
        assert_eq!(stats, ScopeStats::empty());
    }

    #[tokio::test]
    async fn test_owner_and_condition_narrowing() {
        let directory = MemoryDirectory::new();
        let parent = card(42);
        directory
            .insert(
                RowSpec::new(EntityKind::Card, 1)
                    .in_project(1)
                    .owned_by(parent)
                    .with_facet("open"),
            )
            .await
            .expect("insert should succeed");
        directory
            .insert(
                RowSpec::new(EntityKind::Card, 2)
                    .in_project(1)
                    .owned_by(parent)
                    .with_facet("closed"),
            )
            .await
            .expect("insert should succeed");
        directory
            .insert(RowSpec::new(EntityKind::Card, 3).in_project(1))
            .await
            .expect("insert should succeed");

        let owned = directory
            .scope_stats(
                &ScopeSelector::project_table(EntityKind::Card, 1).owned_by(parent),
            )
            .await
            .expect("stats should succeed");
        assert_eq!(owned.rows, 2);

        let open = directory
            .scope_stats(
                &ScopeSelector::project_table(EntityKind::Card, 1)
                    .owned_by(parent)
                    .matching("open"),
            )
            .await
            .expect("stats should succeed");
        assert_eq!(open.rows, 1);
    }

    #[tokio::test]
    async fn test_clock_is_strictly_increasing() {
        let directory = MemoryDirectory::new();
        let first = directory
            .insert(RowSpec::new(EntityKind::Murmur, 1).in_project(1))
            .await
            .expect("insert should succeed");
        let second = directory
            .insert(RowSpec::new(EntityKind::Murmur, 2).in_project(1))
            .await
            .expect("insert should succeed");

        let first_row = directory.row(first).await.expect("row should exist");
        let second_row = directory.row(second).await.expect("row should exist");
        assert!(second_row.updated_at > first_row.updated_at);
    }

    #[tokio::test]
    async fn test_touch_advances_updated_at_and_publishes() {
        let sink = Arc::new(RecordingSink::new());
        let mut directory = MemoryDirectory::new();
        directory.register_sink(sink.clone());

        let entity = directory
            .insert(RowSpec::new(EntityKind::Card, 1).in_project(1))
            .await
            .expect("insert should succeed");
        let before = directory.row(entity).await.expect("row").updated_at;

        directory.touch(entity).await.expect("touch should succeed");
        let after = directory.row(entity).await.expect("row").updated_at;
        assert!(after > before);

        let events = sink.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            MutationEvent::entity(MutationKind::Updated, entity, Some(1))
        );
    }

    #[tokio::test]
    async fn test_touch_missing_row_fails() {
        let directory = MemoryDirectory::new();
        let err = directory
            .touch(card(99))
            .await
            .expect_err("touch should fail");
        assert!(err.to_string().contains("Card-99"));
    }

    #[tokio::test]
    async fn test_remove_publishes_once_and_forgets_references() {
        let sink = Arc::new(RecordingSink::new());
        let mut directory = MemoryDirectory::new();
        directory.register_sink(sink.clone());

        let parent = directory
            .insert(RowSpec::new(EntityKind::Card, 42).in_project(1))
            .await
            .expect("insert should succeed");
        directory.reference(card(101), parent).await;

        assert!(directory.remove(parent).await.expect("remove should succeed"));
        assert!(!directory.remove(parent).await.expect("remove should succeed"));

        let events = sink.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            MutationEvent::entity(MutationKind::Destroyed, parent, Some(1))
        );
        assert!(directory
            .referencing(parent)
            .await
            .expect("referencing")
            .is_empty());
    }

    #[tokio::test]
    async fn test_link_events_carry_project() {
        let sink = Arc::new(RecordingSink::new());
        let mut directory = MemoryDirectory::new();
        directory.register_sink(sink.clone());

        let parent = directory
            .insert(RowSpec::new(EntityKind::Card, 42).in_project(7))
            .await
            .expect("insert should succeed");
        let child = directory
            .insert(RowSpec::new(EntityKind::Card, 101).in_project(7))
            .await
            .expect("insert should succeed");

        directory
            .link(LinkKind::TreeMembership, parent, child)
            .await
            .expect("link should succeed");
        directory
            .unlink(LinkKind::TreeMembership, parent, child)
            .await
            .expect("unlink should succeed");

        let events = sink.events().await;
        assert_eq!(
            events[2],
            MutationEvent::link(
                MutationKind::Created,
                LinkKind::TreeMembership,
                parent,
                child,
                Some(7),
            )
        );
        assert_eq!(
            events[3],
            MutationEvent::link(
                MutationKind::Destroyed,
                LinkKind::TreeMembership,
                parent,
                child,
                Some(7),
            )
        );
    }

    #[tokio::test]
    async fn test_write_path_drives_invalidator() {
        let journal = Arc::new(InMemoryStalenessJournal::new());
        let mut directory = MemoryDirectory::new();
        let invalidator = Arc::new(Invalidator::new(
            Arc::clone(&journal),
            directory.references(),
        ));
        directory.register_sink(invalidator);

        let parent = directory
            .insert(RowSpec::new(EntityKind::Card, 42).in_project(1))
            .await
            .expect("insert should succeed");
        let child = directory
            .insert(RowSpec::new(EntityKind::Card, 101).in_project(1))
            .await
            .expect("insert should succeed");
        directory.reference(child, parent).await;

        directory.touch(parent).await.expect("touch should succeed");

        assert_eq!(journal.stamp(child).await.expect("stamp"), 1);
        assert_eq!(journal.stamp(parent).await.expect("stamp"), 0);
    }
}

//! Per-fragment key builders.
//!
//! [`KeyFactory`] is the long-lived handle wiring a statistics source and
//! the staleness journal together; [`RequestKeys`] is the per-request view
//! that actually builds keys. Each fragment method composes its segments
//! in one fixed order, so equal inputs always render the same key and a
//! key is never assembled ad hoc at a call site.
//!
//! Aggregate and counter lookups are memoized for the life of one
//! `RequestKeys` value. Within a request every key sees one consistent
//! snapshot; the next request starts blank and reads fresh values, which
//! is what keeps whole-scope fingerprints honest.

use std::collections::HashMap;
use std::sync::Arc;

use cardwall_core::{
    Card, CardwallResult, EntityKind, EntityRef, Project, ProjectId, Revision, Versioned, Viewer,
};
use serde::Serialize;

use crate::fingerprint::{ScopeSelector, ScopeStats, StatsSource};
use crate::journal::StalenessJournal;
use crate::key::{CacheKey, Fragment};
use crate::segment::{
    AllOfKindSegment, CachingStampSegment, OwnedScopeSegment, ParamsDigestSegment,
    StructureSegment, ViewerSegment,
};

/// Long-lived factory for per-request key builders.
pub struct KeyFactory<S, J>
where
    S: StatsSource,
    J: StalenessJournal,
{
    stats: Arc<S>,
    journal: Arc<J>,
}

impl<S, J> KeyFactory<S, J>
where
    S: StatsSource,
    J: StalenessJournal,
{
    pub fn new(stats: Arc<S>, journal: Arc<J>) -> Self {
        Self { stats, journal }
    }

    /// Start a request-scoped builder with an empty memo.
    pub fn request(&self) -> RequestKeys<S, J> {
        RequestKeys {
            stats: Arc::clone(&self.stats),
            journal: Arc::clone(&self.journal),
            scope_memo: HashMap::new(),
            stamp_memo: HashMap::new(),
            structure_memo: HashMap::new(),
        }
    }
}

/// Request-scoped key builder.
///
/// Holds the request-local memo, so building the same card's div key for
/// fifty cards on a wall costs one structure lookup, not fifty. Drop it
/// when the request ends; memoized aggregates must not outlive it.
pub struct RequestKeys<S, J>
where
    S: StatsSource,
    J: StalenessJournal,
{
    stats: Arc<S>,
    journal: Arc<J>,
    scope_memo: HashMap<ScopeSelector, ScopeStats>,
    stamp_memo: HashMap<EntityRef, Revision>,
    structure_memo: HashMap<ProjectId, Revision>,
}

impl<S, J> RequestKeys<S, J>
where
    S: StatsSource,
    J: StalenessJournal,
{
    async fn stats_for(&mut self, selector: ScopeSelector) -> CardwallResult<ScopeStats> {
        if let Some(stats) = self.scope_memo.get(&selector) {
            return Ok(*stats);
        }
        let stats = self.stats.scope_stats(&selector).await?;
        self.scope_memo.insert(selector, stats);
        Ok(stats)
    }

    async fn stamp_for(&mut self, entity: EntityRef) -> CardwallResult<Revision> {
        if let Some(stamp) = self.stamp_memo.get(&entity) {
            return Ok(*stamp);
        }
        let stamp = self.journal.stamp(entity).await?;
        self.stamp_memo.insert(entity, stamp);
        Ok(stamp)
    }

    async fn structure_revision_for(&mut self, project: ProjectId) -> CardwallResult<Revision> {
        if let Some(revision) = self.structure_memo.get(&project) {
            return Ok(*revision);
        }
        let revision = self.journal.structure_revision(project).await?;
        self.structure_memo.insert(project, revision);
        Ok(revision)
    }

    /// Structure segment over a project's property schema.
    async fn schema_structure(&mut self, project: ProjectId) -> CardwallResult<StructureSegment> {
        let stats = self
            .stats_for(ScopeSelector::project_table(
                EntityKind::PropertyDefinition,
                project,
            ))
            .await?;
        let revision = self.structure_revision_for(project).await?;
        Ok(StructureSegment::new(&stats, revision))
    }

    async fn card_stamp(&mut self, card: &Card) -> CardwallResult<CachingStampSegment> {
        let stamp = self.stamp_for(card.entity_ref()).await?;
        Ok(CachingStampSegment::for_entity(card, stamp)?)
    }

    /// Key for a card's div on the wall: card stamp, schema structure,
    /// viewer.
    pub async fn card_div(&mut self, card: &Card, viewer: &Viewer) -> CardwallResult<CacheKey> {
        let stamp = self.card_stamp(card).await?;
        let structure = self.schema_structure(card.project_id).await?;
        Ok(Fragment::CardDiv
            .key()
            .segment(&stamp)
            .segment(&structure)
            .segment(&ViewerSegment::for_viewer(viewer))
            .build()?)
    }

    /// Key for a card's hover popup. Same composition as the div, its own
    /// namespace.
    pub async fn card_popup(&mut self, card: &Card, viewer: &Viewer) -> CardwallResult<CacheKey> {
        let stamp = self.card_stamp(card).await?;
        let structure = self.schema_structure(card.project_id).await?;
        Ok(Fragment::CardPopup
            .key()
            .segment(&stamp)
            .segment(&structure)
            .segment(&ViewerSegment::for_viewer(viewer))
            .build()?)
    }

    /// Key for a card's available transitions: transition-table structure,
    /// card stamp, viewer.
    pub async fn transitions(&mut self, card: &Card, viewer: &Viewer) -> CardwallResult<CacheKey> {
        let transition_stats = self
            .stats_for(ScopeSelector::project_table(
                EntityKind::Transition,
                card.project_id,
            ))
            .await?;
        let revision = self.structure_revision_for(card.project_id).await?;
        let structure = StructureSegment::new(&transition_stats, revision);
        let stamp = self.card_stamp(card).await?;
        Ok(Fragment::Transitions
            .key()
            .segment(&structure)
            .segment(&stamp)
            .segment(&ViewerSegment::for_viewer(viewer))
            .build()?)
    }

    /// Key for a project's murmur feed page: raw murmur scope aggregates,
    /// request params digest.
    pub async fn feed<P>(&mut self, project: &Project, params: &P) -> CardwallResult<CacheKey>
    where
        P: Serialize + ?Sized,
    {
        let murmurs = self
            .stats_for(ScopeSelector::project_table(EntityKind::Murmur, project.id))
            .await?;
        Ok(Fragment::Feed
            .key()
            .segment(&OwnedScopeSegment::new(&murmurs))
            .segment(&ParamsDigestSegment::new(params)?)
            .build()?)
    }

    /// Key for the filter widget: schema structure, params digest, viewer.
    pub async fn filters<P>(
        &mut self,
        project: &Project,
        viewer: &Viewer,
        params: &P,
    ) -> CardwallResult<CacheKey>
    where
        P: Serialize + ?Sized,
    {
        let structure = self.schema_structure(project.id).await?;
        Ok(Fragment::Filters
            .key()
            .segment(&structure)
            .segment(&ParamsDigestSegment::new(params)?)
            .segment(&ViewerSegment::for_viewer(viewer))
            .build()?)
    }

    /// Key for the color legend: card-type scope structure. Card types
    /// carry the wall's colors, so their scope plus the structure revision
    /// covers every rename and recolor.
    pub async fn color_legend(&mut self, project: &Project) -> CardwallResult<CacheKey> {
        let card_types = self
            .stats_for(ScopeSelector::project_table(
                EntityKind::CardType,
                project.id,
            ))
            .await?;
        let revision = self.structure_revision_for(project.id).await?;
        Ok(Fragment::ColorLegend
            .key()
            .segment(&StructureSegment::new(&card_types, revision))
            .build()?)
    }

    /// Key for the property editor panel: schema structure, viewer.
    pub async fn property_editor(
        &mut self,
        project: &Project,
        viewer: &Viewer,
    ) -> CardwallResult<CacheKey> {
        let structure = self.schema_structure(project.id).await?;
        Ok(Fragment::PropertyEditor
            .key()
            .segment(&structure)
            .segment(&ViewerSegment::for_viewer(viewer))
            .build()?)
    }

    /// Key for a project's tag cloud: whole tag scope fingerprint.
    pub async fn tags(&mut self, project: &Project) -> CardwallResult<CacheKey> {
        let tags = self
            .stats_for(ScopeSelector::project_table(EntityKind::Tag, project.id))
            .await?;
        Ok(Fragment::Tags
            .key()
            .segment(&AllOfKindSegment::new(&tags))
            .build()?)
    }
}

// ============================================================================
// TESTS
// ============================================================================

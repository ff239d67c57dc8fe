//! Invalidation triggers: mutation events, the rules table, and the
//! invalidator that applies them.
//!
//! The persistence write path publishes a [`MutationEvent`] for every
//! create, update and destroy. The [`Invalidator`] is registered once as a
//! passive observer; it consults the [`InvalidationRules`] table and bumps
//! staleness counters so that dependent cache keys simply never recur.
//! Controller code never calls any of this explicitly.
//!
//! The rules table is a plain, inspectable value: which entity kinds touch
//! what, under which changes, is data rather than scattered callbacks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bitflags::bitflags;
use cardwall_core::{CardwallResult, EntityKind, EntityRef, LinkKind, ProjectId};
use once_cell::sync::Lazy;

use crate::journal::StalenessJournal;

/// What happened to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Created,
    Updated,
    Destroyed,
}

impl MutationKind {
    /// The mask bit this mutation kind matches.
    pub fn mask(self) -> ChangeMask {
        match self {
            MutationKind::Created => ChangeMask::CREATED,
            MutationKind::Updated => ChangeMask::UPDATED,
            MutationKind::Destroyed => ChangeMask::DESTROYED,
        }
    }
}

bitflags! {
    /// Which mutation kinds a rule reacts to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChangeMask: u8 {
        /// Row inserted
        const CREATED = 0b0000_0001;
        /// Row updated in place
        const UPDATED = 0b0000_0010;
        /// Row deleted
        const DESTROYED = 0b0000_0100;
    }
}

/// A mutation observed on the persistence write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationEvent {
    /// A row of a domain table changed.
    Entity {
        change: MutationKind,
        entity: EntityRef,
        project: Option<ProjectId>,
    },
    /// A join/link record between two entities was created or destroyed.
    Link {
        change: MutationKind,
        link: LinkKind,
        from: EntityRef,
        to: EntityRef,
        project: Option<ProjectId>,
    },
}

impl MutationEvent {
    pub fn entity(change: MutationKind, entity: EntityRef, project: Option<ProjectId>) -> Self {
        Self::Entity {
            change,
            entity,
            project,
        }
    }

    pub fn link(
        change: MutationKind,
        link: LinkKind,
        from: EntityRef,
        to: EntityRef,
        project: Option<ProjectId>,
    ) -> Self {
        Self::Link {
            change,
            link,
            from,
            to,
            project,
        }
    }

    pub fn project(&self) -> Option<ProjectId> {
        match self {
            Self::Entity { project, .. } | Self::Link { project, .. } => *project,
        }
    }
}

/// What a matched rule touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Touch {
    /// Bump the staleness counter of every entity whose rendering
    /// references the mutated entity as a value.
    ReferencingEntities,
    /// Bump the staleness counters of both ends of a link.
    LinkEnds,
    /// Bump the owning project's structure revision.
    StructureRevision,
}

/// Rule matched against entity mutation events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchRule {
    pub on: EntityKind,
    pub changes: ChangeMask,
    pub touch: Touch,
}

impl TouchRule {
    pub fn new(on: EntityKind, changes: ChangeMask, touch: Touch) -> Self {
        Self { on, changes, touch }
    }

    pub fn matches(&self, kind: EntityKind, change: MutationKind) -> bool {
        self.on == kind && self.changes.contains(change.mask())
    }
}

/// Rule matched against link mutation events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRule {
    pub on: LinkKind,
    pub changes: ChangeMask,
    pub touch: Touch,
}

impl LinkRule {
    pub fn new(on: LinkKind, changes: ChangeMask, touch: Touch) -> Self {
        Self { on, changes, touch }
    }

    pub fn matches(&self, link: LinkKind, change: MutationKind) -> bool {
        self.on == link && self.changes.contains(change.mask())
    }
}

/// The dependency table between entity kinds and their cache-affecting
/// relationships.
#[derive(Debug, Clone, Default)]
pub struct InvalidationRules {
    entity_rules: Vec<TouchRule>,
    link_rules: Vec<LinkRule>,
}

static STANDARD_RULES: Lazy<InvalidationRules> = Lazy::new(|| {
    let mut rules = InvalidationRules::empty()
        // Renaming a card, page, user or tag changes the rendering of
        // everything that displays it as a value.
        .with_entity_rule(TouchRule::new(
            EntityKind::Card,
            ChangeMask::UPDATED,
            Touch::ReferencingEntities,
        ))
        .with_entity_rule(TouchRule::new(
            EntityKind::Page,
            ChangeMask::UPDATED,
            Touch::ReferencingEntities,
        ))
        .with_entity_rule(TouchRule::new(
            EntityKind::User,
            ChangeMask::UPDATED,
            Touch::ReferencingEntities,
        ))
        .with_entity_rule(TouchRule::new(
            EntityKind::Tag,
            ChangeMask::UPDATED,
            Touch::ReferencingEntities,
        ))
        // Link churn changes the rendering of both ends.
        .with_link_rule(LinkRule::new(
            LinkKind::TreeMembership,
            ChangeMask::CREATED | ChangeMask::DESTROYED,
            Touch::LinkEnds,
        ))
        .with_link_rule(LinkRule::new(
            LinkKind::MurmurAttachment,
            ChangeMask::CREATED | ChangeMask::DESTROYED,
            Touch::LinkEnds,
        ));

    // Any mutation of a structural kind advances the project's structure
    // revision, so structure-keyed fragments roll over.
    for kind in EntityKind::all() {
        if kind.is_structural() {
            rules = rules.with_entity_rule(TouchRule::new(
                kind,
                ChangeMask::all(),
                Touch::StructureRevision,
            ));
        }
    }

    rules
});

impl InvalidationRules {
    /// The shipped rule set.
    pub fn standard() -> &'static InvalidationRules {
        &STANDARD_RULES
    }

    /// A table with no rules; build custom sets from here in tests.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_entity_rule(mut self, rule: TouchRule) -> Self {
        self.entity_rules.push(rule);
        self
    }

    pub fn with_link_rule(mut self, rule: LinkRule) -> Self {
        self.link_rules.push(rule);
        self
    }

    pub fn entity_rules(&self) -> &[TouchRule] {
        &self.entity_rules
    }

    pub fn link_rules(&self) -> &[LinkRule] {
        &self.link_rules
    }

    /// Touches to apply for an entity mutation, in declaration order.
    pub fn entity_touches(&self, kind: EntityKind, change: MutationKind) -> Vec<Touch> {
        self.entity_rules
            .iter()
            .filter(|rule| rule.matches(kind, change))
            .map(|rule| rule.touch)
            .collect()
    }

    /// Touches to apply for a link mutation, in declaration order.
    pub fn link_touches(&self, link: LinkKind, change: MutationKind) -> Vec<Touch> {
        self.link_rules
            .iter()
            .filter(|rule| rule.matches(link, change))
            .map(|rule| rule.touch)
            .collect()
    }
}

/// Reverse value-reference lookup.
///
/// `referencing(x)` answers "whose rendering displays x as a value":
/// tree children of a card, cards whose relationship property points at a
/// card, cards carrying a tag. The production implementation queries the
/// relevant join tables; [`ReferenceIndex`] is the in-process stand-in.
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    async fn referencing(&self, entity: EntityRef) -> CardwallResult<Vec<EntityRef>>;
}

/// In-memory reverse reference index.
#[derive(Debug, Default)]
pub struct ReferenceIndex {
    referrers: tokio::sync::RwLock<HashMap<EntityRef, HashSet<EntityRef>>>,
}

impl ReferenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `referrer`'s rendering depends on `value`.
    pub async fn record(&self, referrer: EntityRef, value: EntityRef) {
        let mut referrers = self.referrers.write().await;
        referrers.entry(value).or_default().insert(referrer);
    }

    /// Drop one dependency edge.
    pub async fn forget(&self, referrer: EntityRef, value: EntityRef) {
        let mut referrers = self.referrers.write().await;
        if let Some(set) = referrers.get_mut(&value) {
            set.remove(&referrer);
            if set.is_empty() {
                referrers.remove(&value);
            }
        }
    }

    /// Drop every edge involving `entity`, in both directions.
    pub async fn forget_entity(&self, entity: EntityRef) {
        let mut referrers = self.referrers.write().await;
        referrers.remove(&entity);
        for set in referrers.values_mut() {
            set.remove(&entity);
        }
        referrers.retain(|_, set| !set.is_empty());
    }
}

#[async_trait]
impl ReferenceSource for ReferenceIndex {
    async fn referencing(&self, entity: EntityRef) -> CardwallResult<Vec<EntityRef>> {
        let referrers = self.referrers.read().await;
        let mut result: Vec<EntityRef> = referrers
            .get(&entity)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        result.sort();
        Ok(result)
    }
}

/// Observer registered on the persistence write path.
#[async_trait]
pub trait MutationSink: Send + Sync {
    async fn observe(&self, event: &MutationEvent) -> CardwallResult<()>;
}

/// Applies the rules table to observed mutations.
///
/// Wired once into the write path; per event it is stateless. The
/// staleness counters it bumps are the only durable state this subsystem
/// introduces, and the next fingerprint or stamp read picks them up.
pub struct Invalidator<J, R>
where
    J: StalenessJournal,
    R: ReferenceSource,
{
    journal: Arc<J>,
    references: Arc<R>,
    rules: InvalidationRules,
}

impl<J, R> Invalidator<J, R>
where
    J: StalenessJournal,
    R: ReferenceSource,
{
    /// Create an invalidator with the standard rules.
    pub fn new(journal: Arc<J>, references: Arc<R>) -> Self {
        Self::with_rules(journal, references, InvalidationRules::standard().clone())
    }

    pub fn with_rules(journal: Arc<J>, references: Arc<R>, rules: InvalidationRules) -> Self {
        Self {
            journal,
            references,
            rules,
        }
    }

    pub fn rules(&self) -> &InvalidationRules {
        &self.rules
    }

    async fn touch_referencing(&self, entity: EntityRef) -> CardwallResult<()> {
        let referrers = self.references.referencing(entity).await?;
        for referrer in &referrers {
            let stamp = self.journal.bump(*referrer).await?;
            tracing::debug!(entity = %entity, referrer = %referrer, stamp, "bumped referencing entity");
        }
        Ok(())
    }

    async fn touch_structure(&self, project: Option<ProjectId>) -> CardwallResult<()> {
        match project {
            Some(project) => {
                let revision = self.journal.bump_structure(project).await?;
                tracing::debug!(project, revision, "bumped structure revision");
            }
            None => {
                tracing::warn!("structural mutation without a project scope, nothing to bump");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<J, R> MutationSink for Invalidator<J, R>
where
    J: StalenessJournal,
    R: ReferenceSource,
{
    async fn observe(&self, event: &MutationEvent) -> CardwallResult<()> {
        match *event {
            MutationEvent::Entity {
                change,
                entity,
                project,
            } => {
                for touch in self.rules.entity_touches(entity.kind, change) {
                    match touch {
                        Touch::ReferencingEntities => self.touch_referencing(entity).await?,
                        Touch::StructureRevision => self.touch_structure(project).await?,
                        // An entity event has no link ends to bump.
                        Touch::LinkEnds => {}
                    }
                }
            }
            MutationEvent::Link {
                change,
                link,
                from,
                to,
                project,
            } => {
                for touch in self.rules.link_touches(link, change) {
                    match touch {
                        Touch::LinkEnds => {
                            let from_stamp = self.journal.bump(from).await?;
                            let to_stamp = self.journal.bump(to).await?;
                            tracing::debug!(
                                %from, from_stamp, %to, to_stamp, ?link, "bumped link ends"
                            );
                        }
                        Touch::StructureRevision => self.touch_structure(project).await?,
                        Touch::ReferencingEntities => {
                            self.touch_referencing(from).await?;
                            self.touch_referencing(to).await?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::InMemoryStalenessJournal;

    fn card(id: i64) -> EntityRef {
        EntityRef::new(EntityKind::Card, id)
    }

    fn standard_invalidator() -> (
        Arc<InMemoryStalenessJournal>,
        Arc<ReferenceIndex>,
        Invalidator<InMemoryStalenessJournal, ReferenceIndex>,
    ) {
        let journal = Arc::new(InMemoryStalenessJournal::new());
        let references = Arc::new(ReferenceIndex::new());
        let invalidator = Invalidator::new(Arc::clone(&journal), Arc::clone(&references));
        (journal, references, invalidator)
    }

    #[test]
    fn test_mutation_kind_mask() {
        assert_eq!(MutationKind::Created.mask(), ChangeMask::CREATED);
        assert_eq!(MutationKind::Updated.mask(), ChangeMask::UPDATED);
        assert_eq!(MutationKind::Destroyed.mask(), ChangeMask::DESTROYED);
        assert!(ChangeMask::all().contains(ChangeMask::DESTROYED));
    }

    #[test]
    fn test_standard_rules_table_shape() {
        let rules = InvalidationRules::standard();

        // Value-referenced kinds react to updates by touching referrers.
        assert!(rules
            .entity_rules()
            .iter()
            .any(|r| r.on == EntityKind::Card
                && r.changes == ChangeMask::UPDATED
                && r.touch == Touch::ReferencingEntities));

        // Every structural kind advances the structure revision on any change.
        for kind in EntityKind::all() {
            if kind.is_structural() {
                assert!(
                    rules
                        .entity_rules()
                        .iter()
                        .any(|r| r.on == kind
                            && r.changes == ChangeMask::all()
                            && r.touch == Touch::StructureRevision),
                    "missing structure rule for {kind:?}"
                );
            }
        }

        // Both link kinds bump both ends on create and destroy.
        for link in [LinkKind::TreeMembership, LinkKind::MurmurAttachment] {
            assert!(rules
                .link_rules()
                .iter()
                .any(|r| r.on == link
                    && r.changes.contains(ChangeMask::CREATED)
                    && r.changes.contains(ChangeMask::DESTROYED)
                    && r.touch == Touch::LinkEnds));
        }
    }

    #[tokio::test]
    async fn test_update_bumps_referencing_entities_only() {
        let (journal, references, invalidator) = standard_invalidator();
        let parent = card(42);
        let child = card(101);
        references.record(child, parent).await;

        invalidator
            .observe(&MutationEvent::entity(MutationKind::Updated, parent, Some(1)))
            .await
            .expect("observe should succeed");

        assert_eq!(journal.stamp(child).await.expect("stamp"), 1);
        // The mutated entity's own version covers it; no self-bump.
        assert_eq!(journal.stamp(parent).await.expect("stamp"), 0);
    }

    #[tokio::test]
    async fn test_create_does_not_touch_referrers() {
        let (journal, references, invalidator) = standard_invalidator();
        let parent = card(42);
        let child = card(101);
        references.record(child, parent).await;

        invalidator
            .observe(&MutationEvent::entity(MutationKind::Created, parent, Some(1)))
            .await
            .expect("observe should succeed");

        assert_eq!(journal.stamp(child).await.expect("stamp"), 0);
    }

    #[tokio::test]
    async fn test_structural_mutation_bumps_structure_revision() {
        let (journal, _references, invalidator) = standard_invalidator();
        let definition = EntityRef::new(EntityKind::PropertyDefinition, 7);

        invalidator
            .observe(&MutationEvent::entity(
                MutationKind::Created,
                definition,
                Some(3),
            ))
            .await
            .expect("observe should succeed");

        assert_eq!(journal.structure_revision(3).await.expect("revision"), 1);
        assert_eq!(journal.structure_revision(1).await.expect("revision"), 0);
    }

    #[tokio::test]
    async fn test_link_create_and_destroy_bump_both_ends() {
        let (journal, _references, invalidator) = standard_invalidator();
        let parent = card(42);
        let child = card(101);

        invalidator
            .observe(&MutationEvent::link(
                MutationKind::Created,
                LinkKind::TreeMembership,
                parent,
                child,
                Some(1),
            ))
            .await
            .expect("observe should succeed");

        assert_eq!(journal.stamp(parent).await.expect("stamp"), 1);
        assert_eq!(journal.stamp(child).await.expect("stamp"), 1);

        invalidator
            .observe(&MutationEvent::link(
                MutationKind::Destroyed,
                LinkKind::TreeMembership,
                parent,
                child,
                Some(1),
            ))
            .await
            .expect("observe should succeed");

        assert_eq!(journal.stamp(parent).await.expect("stamp"), 2);
        assert_eq!(journal.stamp(child).await.expect("stamp"), 2);
    }

    #[tokio::test]
    async fn test_unrelated_kind_is_untouched() {
        let (journal, _references, invalidator) = standard_invalidator();
        let murmur = EntityRef::new(EntityKind::Murmur, 9);

        invalidator
            .observe(&MutationEvent::entity(MutationKind::Updated, murmur, Some(1)))
            .await
            .expect("observe should succeed");

        assert_eq!(journal.stamp(murmur).await.expect("stamp"), 0);
        assert_eq!(journal.structure_revision(1).await.expect("revision"), 0);
    }

    #[tokio::test]
    async fn test_empty_rules_do_nothing() {
        let journal = Arc::new(InMemoryStalenessJournal::new());
        let references = Arc::new(ReferenceIndex::new());
        let invalidator = Invalidator::with_rules(
            Arc::clone(&journal),
            Arc::clone(&references),
            InvalidationRules::empty(),
        );
        references.record(card(101), card(42)).await;

        invalidator
            .observe(&MutationEvent::entity(MutationKind::Updated, card(42), Some(1)))
            .await
            .expect("observe should succeed");

        assert_eq!(journal.stamp(card(101)).await.expect("stamp"), 0);
    }

    #[tokio::test]
    async fn test_reference_index_forget() {
        let references = ReferenceIndex::new();
        let parent = card(42);
        let child_a = card(101);
        let child_b = card(102);

        references.record(child_a, parent).await;
        references.record(child_b, parent).await;
        assert_eq!(
            references.referencing(parent).await.expect("referencing"),
            vec![child_a, child_b]
        );

        references.forget(child_a, parent).await;
        assert_eq!(
            references.referencing(parent).await.expect("referencing"),
            vec![child_b]
        );

        references.forget_entity(child_b).await;
        assert!(references
            .referencing(parent)
            .await
            .expect("referencing")
            .is_empty());
    }
}

//! Cardwall Test Utilities
//!
//! Centralized test infrastructure for the Cardwall workspace:
//! - A wired project fixture covering the whole invalidation loop
//! - Proptest generators for entity types and key inputs
//! - Pre-built entity fixtures for common scenarios
//! - Custom assertions for cache-key validation

// Re-export the cache surface for convenience
pub use cardwall_cache::{
    count_fingerprint, fingerprint, CacheConfig, CacheKey, CacheStats, CacheStore, Fragment,
    FragmentCache, FragmentRead, InMemoryStalenessJournal, InvalidationRules, Invalidator,
    KeyFactory, MemoryDirectory, MemoryStore, MutationEvent, MutationKind, MutationSink,
    ReferenceIndex, RequestKeys, RowSpec, ScopeSelector, ScopeStats, StalenessJournal,
    StatsSource, Touch, KEY_SEPARATOR,
};

// Re-export core types for convenience
pub use cardwall_core::{
    Card, CardwallError, CardwallResult, EntityId, EntityKind, EntityRef, KeyError, LinkKind,
    Murmur, Page, Project, ProjectId, ProjectRole, Revision, SourceError, StoreError, Timestamp,
    User, Versioned, Viewer,
};

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};

// ============================================================================
// PROJECT FIXTURE
// ============================================================================

/// A fully wired project: directory, staleness journal, invalidator on the
/// write path, a key factory reading from all three, and a fragment cache
/// over an in-memory store.
///
/// Entity ids come from a single counter, so helpers never collide.
pub struct ProjectFixture {
    pub directory: Arc<MemoryDirectory>,
    pub journal: Arc<InMemoryStalenessJournal>,
    pub factory: KeyFactory<MemoryDirectory, InMemoryStalenessJournal>,
    pub cache: FragmentCache<MemoryStore>,
    pub project: Project,
    next_id: AtomicI64,
}

impl ProjectFixture {
    /// Build the fixture with the standard invalidation rules.
    pub fn new() -> Self {
        Self::with_rules(InvalidationRules::standard().clone())
    }

    /// Build the fixture with a custom rules table.
    pub fn with_rules(rules: InvalidationRules) -> Self {
        let journal = Arc::new(InMemoryStalenessJournal::new());
        let mut directory = MemoryDirectory::new();
        let invalidator = Arc::new(Invalidator::with_rules(
            Arc::clone(&journal),
            directory.references(),
            rules,
        ));
        directory.register_sink(invalidator);
        let directory = Arc::new(directory);
        let factory = KeyFactory::new(Arc::clone(&directory), Arc::clone(&journal));
        let cache = FragmentCache::with_defaults(Arc::new(MemoryStore::new()));

        Self {
            directory,
            journal,
            factory,
            cache,
            project: fixtures::sample_project(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Next unused entity id.
    pub fn allocate_id(&self) -> EntityId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn project_id(&self) -> ProjectId {
        self.project.id
    }

    /// Start a fresh request against the fixture's sources.
    pub fn request(&self) -> RequestKeys<MemoryDirectory, InMemoryStalenessJournal> {
        self.factory.request()
    }

    /// Insert a card row and return the matching entity struct at version 1.
    pub async fn create_card(&self, name: &str) -> CardwallResult<Card> {
        let id = self.allocate_id();
        self.directory
            .insert(RowSpec::new(EntityKind::Card, id).in_project(self.project.id))
            .await?;
        Ok(Card {
            id,
            project_id: self.project.id,
            number: id,
            name: name.to_string(),
            card_type_name: "Story".to_string(),
            version: 1,
            updated_at: Utc::now(),
        })
    }

    /// Touch the card's row and return the struct at the next version.
    pub async fn update_card(&self, card: &Card) -> CardwallResult<Card> {
        self.directory.touch(card.entity_ref()).await?;
        let mut updated = card.clone();
        updated.version += 1;
        updated.updated_at = Utc::now();
        Ok(updated)
    }

    /// Insert a user row and return the user plus a member viewer for them.
    pub async fn create_user(&self, login: &str) -> CardwallResult<(User, Viewer)> {
        let id = self.allocate_id();
        self.directory
            .insert(RowSpec::new(EntityKind::User, id))
            .await?;
        let user = User {
            id,
            login: login.to_string(),
            display_name: login.to_string(),
            site_admin: false,
            updated_at: Utc::now(),
        };
        let viewer = Viewer::member(id, ProjectRole::Member);
        Ok((user, viewer))
    }

    /// Post a murmur, optionally attached to a card.
    pub async fn post_murmur(
        &self,
        author: &User,
        body: &str,
        card: Option<&Card>,
    ) -> CardwallResult<Murmur> {
        let id = self.allocate_id();
        let murmur = self
            .directory
            .insert(
                RowSpec::new(EntityKind::Murmur, id)
                    .in_project(self.project.id)
                    .owned_by(EntityRef::new(EntityKind::User, author.id)),
            )
            .await?;
        if let Some(card) = card {
            self.directory
                .link(LinkKind::MurmurAttachment, murmur, card.entity_ref())
                .await?;
        }
        Ok(Murmur {
            id,
            project_id: self.project.id,
            author_id: author.id,
            body: body.to_string(),
            created_at: Utc::now(),
        })
    }

    /// Insert a row of any kind in the fixture project. Structural kinds
    /// advance the structure revision through the invalidator.
    pub async fn add_row(&self, kind: EntityKind) -> CardwallResult<EntityRef> {
        let id = self.allocate_id();
        self.directory
            .insert(RowSpec::new(kind, id).in_project(self.project.id))
            .await
    }

    /// Insert a named tag row.
    pub async fn add_tag(&self, name: &str) -> CardwallResult<EntityRef> {
        let id = self.allocate_id();
        self.directory
            .insert(
                RowSpec::new(EntityKind::Tag, id)
                    .in_project(self.project.id)
                    .with_facet(name),
            )
            .await
    }

    /// Put `child` under `parent` in a card tree.
    pub async fn link_tree(&self, parent: &Card, child: &Card) -> CardwallResult<()> {
        self.directory
            .link(
                LinkKind::TreeMembership,
                parent.entity_ref(),
                child.entity_ref(),
            )
            .await
    }

    /// Take `child` out of `parent`'s tree.
    pub async fn unlink_tree(&self, parent: &Card, child: &Card) -> CardwallResult<()> {
        self.directory
            .unlink(
                LinkKind::TreeMembership,
                parent.entity_ref(),
                child.entity_ref(),
            )
            .await
    }

    /// Record that `referrer`'s rendering embeds `value`.
    pub async fn reference(&self, referrer: EntityRef, value: EntityRef) {
        self.directory.reference(referrer, value).await;
    }
}

impl Default for ProjectFixture {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Cardwall entity types and key inputs.

    use super::*;
    use proptest::prelude::*;

    /// Generate any entity kind.
    pub fn arb_entity_kind() -> impl Strategy<Value = EntityKind> {
        prop::sample::select(EntityKind::all().to_vec())
    }

    /// Generate a kind whose mutations advance the structure revision.
    pub fn arb_structural_kind() -> impl Strategy<Value = EntityKind> {
        let kinds: Vec<EntityKind> = EntityKind::all()
            .into_iter()
            .filter(EntityKind::is_structural)
            .collect();
        prop::sample::select(kinds)
    }

    /// Generate a link kind.
    pub fn arb_link_kind() -> impl Strategy<Value = LinkKind> {
        prop_oneof![
            Just(LinkKind::TreeMembership),
            Just(LinkKind::MurmurAttachment),
        ]
    }

    /// Generate a project role.
    pub fn arb_project_role() -> impl Strategy<Value = ProjectRole> {
        prop_oneof![
            Just(ProjectRole::Anonymous),
            Just(ProjectRole::Readonly),
            Just(ProjectRole::Member),
            Just(ProjectRole::ProjectAdmin),
            Just(ProjectRole::SiteAdmin),
        ]
    }

    /// Generate a fragment.
    pub fn arb_fragment() -> impl Strategy<Value = Fragment> {
        prop::sample::select(Fragment::all().to_vec())
    }

    /// Generate a persisted entity id.
    pub fn arb_entity_id() -> impl Strategy<Value = EntityId> {
        1i64..100_000
    }

    /// Generate a version or counter value.
    pub fn arb_revision() -> impl Strategy<Value = Revision> {
        0i64..10_000
    }

    /// Generate a timestamp with microsecond precision (2020-2030).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_577_836_800_000_000i64..1_893_456_000_000_000i64).prop_map(|micros| {
            Utc.timestamp_micros(micros)
                .single()
                .unwrap_or_else(Utc::now)
        })
    }

    /// Generate a random entity reference.
    pub fn arb_entity_ref() -> impl Strategy<Value = EntityRef> {
        (arb_entity_kind(), arb_entity_id()).prop_map(|(kind, id)| EntityRef::new(kind, id))
    }

    /// Generate a viewer: anonymous, or a member with any role.
    pub fn arb_viewer() -> impl Strategy<Value = Viewer> {
        prop_oneof![
            Just(Viewer::anonymous()),
            (arb_entity_id(), arb_project_role())
                .prop_map(|(id, role)| Viewer::member(id, role)),
        ]
    }

    /// Generate a persisted card in the given project.
    pub fn arb_card(project_id: ProjectId) -> impl Strategy<Value = Card> {
        (arb_entity_id(), 1i64..500, arb_timestamp(), "[a-z]{3,12}").prop_map(
            move |(id, version, updated_at, name)| Card {
                id,
                project_id,
                number: id,
                name,
                card_type_name: "Story".to_string(),
                version,
                updated_at,
            },
        )
    }

    /// Generate scope stats. Empty scopes have no latest timestamp;
    /// populated scopes always do, since every row carries `updated_at`.
    pub fn arb_scope_stats() -> impl Strategy<Value = ScopeStats> {
        prop_oneof![
            1 => Just(ScopeStats::empty()),
            4 => (1u64..500, arb_timestamp())
                .prop_map(|(rows, latest)| ScopeStats::new(rows, Some(latest))),
        ]
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built entities for common scenarios.

    use super::*;
    use serde::Serialize;

    /// The project every `ProjectFixture` helper inserts into.
    pub fn sample_project() -> Project {
        Project {
            id: 1,
            identifier: "cardwall".to_string(),
            name: "Cardwall".to_string(),
            created_at: epoch_micros(0),
        }
    }

    /// A timestamp a fixed number of microseconds past the epoch.
    pub fn epoch_micros(micros: i64) -> Timestamp {
        Utc.timestamp_micros(micros)
            .single()
            .unwrap_or(Timestamp::UNIX_EPOCH)
    }

    /// A persisted card at the given version.
    pub fn sample_card(id: EntityId, version: Revision) -> Card {
        Card {
            id,
            project_id: sample_project().id,
            number: id,
            name: format!("Card {id}"),
            card_type_name: "Story".to_string(),
            version,
            updated_at: epoch_micros(1_000_000 + id),
        }
    }

    /// A card the database has never seen.
    pub fn unsaved_card() -> Card {
        Card {
            id: 0,
            project_id: sample_project().id,
            number: 0,
            name: "Draft".to_string(),
            card_type_name: "Story".to_string(),
            version: 0,
            updated_at: epoch_micros(0),
        }
    }

    /// A persisted wiki page at the given version.
    pub fn sample_page(id: EntityId, version: Revision) -> Page {
        Page {
            id,
            project_id: sample_project().id,
            name: format!("Page {id}"),
            version,
            updated_at: epoch_micros(2_000_000 + id),
        }
    }

    /// A plain project member.
    pub fn member_viewer() -> Viewer {
        Viewer::member(9, ProjectRole::Member)
    }

    /// A project admin.
    pub fn admin_viewer() -> Viewer {
        Viewer::member(2, ProjectRole::ProjectAdmin)
    }

    /// Typed feed-pagination params, for keying tests that want a struct
    /// rather than a `json!` literal.
    #[derive(Debug, Clone, Serialize)]
    pub struct FeedParams {
        pub page: u32,
        pub page_size: u32,
    }

    /// Feed params for the given page at the default page size.
    pub fn feed_params(page: u32) -> FeedParams {
        FeedParams {
            page,
            page_size: 25,
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cache keys and invalidation outcomes.

    use super::*;

    /// Assert a key lives in the fragment's namespace and carries the
    /// expected number of segment tokens.
    #[track_caller]
    pub fn assert_key_shape(key: &CacheKey, fragment: Fragment, tokens: usize) {
        assert_eq!(
            key.namespace(),
            fragment.namespace(),
            "key {} is not in the {} namespace",
            key.rendered(),
            fragment.namespace()
        );
        assert_eq!(
            key.tokens().len(),
            tokens,
            "key {} should carry {} tokens",
            key.rendered(),
            tokens
        );
    }

    /// Assert a mutation rotated the key.
    #[track_caller]
    pub fn assert_rotated(before: &CacheKey, after: &CacheKey) {
        assert_ne!(before, after, "key did not rotate: {}", before.rendered());
    }

    /// Assert a mutation left the key alone.
    #[track_caller]
    pub fn assert_unchanged(before: &CacheKey, after: &CacheKey) {
        assert_eq!(
            before.rendered(),
            after.rendered(),
            "key rotated unexpectedly"
        );
    }

    /// Assert every key in the slice is distinct from every other.
    #[track_caller]
    pub fn assert_all_distinct(keys: &[CacheKey]) {
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b, "duplicate key: {}", a.rendered());
            }
        }
    }

    /// Assert a key build failed because the entity was never saved.
    #[track_caller]
    pub fn assert_not_persisted<T: std::fmt::Debug>(result: &CardwallResult<T>) {
        match result {
            Err(CardwallError::Key(KeyError::NotPersisted { .. })) => {}
            other => panic!("Expected NotPersisted error, got: {:?}", other),
        }
    }

    /// Assert a read was served from the cache.
    #[track_caller]
    pub fn assert_hit<T: std::fmt::Debug>(read: &FragmentRead<T>) {
        assert!(
            read.was_hit(),
            "expected a cache hit, got a compute: {:?}",
            read.value()
        );
    }

    /// Assert a read invoked the compute closure.
    #[track_caller]
    pub fn assert_computed<T: std::fmt::Debug>(read: &FragmentRead<T>) {
        assert!(
            !read.was_hit(),
            "expected a compute, got a cache hit: {:?}",
            read.value()
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================

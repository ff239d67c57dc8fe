//! Enum types shared across the Cardwall workspace

use serde::{Deserialize, Serialize};

/// Entity type discriminator for polymorphic references.
///
/// `as_str()` yields the class-name token that appears in cache keys, so
/// the variants here mirror the domain model's class names verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Card,
    Page,
    Project,
    User,
    Murmur,
    Tag,
    Transition,
    PropertyDefinition,
    CardType,
    Tab,
    Favorite,
    TreeConfiguration,
}

impl EntityKind {
    /// Class-name token used in cache keys and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Card => "Card",
            EntityKind::Page => "Page",
            EntityKind::Project => "Project",
            EntityKind::User => "User",
            EntityKind::Murmur => "Murmur",
            EntityKind::Tag => "Tag",
            EntityKind::Transition => "Transition",
            EntityKind::PropertyDefinition => "PropertyDefinition",
            EntityKind::CardType => "CardType",
            EntityKind::Tab => "Tab",
            EntityKind::Favorite => "Favorite",
            EntityKind::TreeConfiguration => "TreeConfiguration",
        }
    }

    /// Whether mutations of this kind change a project's structural
    /// metadata (property definitions, card types, tabs, saved views,
    /// transitions, tree configurations). Structural mutations advance
    /// the project-wide structure revision, so every structure-keyed
    /// fragment misses on the next request.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EntityKind::PropertyDefinition
                | EntityKind::CardType
                | EntityKind::Tab
                | EntityKind::Favorite
                | EntityKind::Transition
                | EntityKind::TreeConfiguration
        )
    }

    /// All kinds, in a stable order. Handy for tests and exhaustive tables.
    pub fn all() -> [EntityKind; 12] {
        [
            EntityKind::Card,
            EntityKind::Page,
            EntityKind::Project,
            EntityKind::User,
            EntityKind::Murmur,
            EntityKind::Tag,
            EntityKind::Transition,
            EntityKind::PropertyDefinition,
            EntityKind::CardType,
            EntityKind::Tab,
            EntityKind::Favorite,
            EntityKind::TreeConfiguration,
        ]
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A viewer's role within one project, ordered by privilege.
///
/// The numeric rank participates in cache keys: two viewers with the same
/// rank see identical renderings of permission-sensitive fragments, so
/// they may share cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProjectRole {
    Anonymous,
    Readonly,
    Member,
    ProjectAdmin,
    SiteAdmin,
}

impl ProjectRole {
    /// Privilege rank, 0 (anonymous) through 4 (site admin).
    pub fn rank(&self) -> u8 {
        match self {
            ProjectRole::Anonymous => 0,
            ProjectRole::Readonly => 1,
            ProjectRole::Member => 2,
            ProjectRole::ProjectAdmin => 3,
            ProjectRole::SiteAdmin => 4,
        }
    }

    /// Whether this role may mutate project content.
    pub fn can_edit(&self) -> bool {
        self.rank() >= ProjectRole::Member.rank()
    }
}

/// Join-record types connecting two entities.
///
/// Creating or destroying a link of either kind changes the rendering of
/// both ends, so invalidation bumps both staleness counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkKind {
    /// A card's membership in a card tree.
    TreeMembership,
    /// A murmur attached to a card.
    MurmurAttachment,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::TreeMembership => "tree_membership",
            LinkKind::MurmurAttachment => "murmur_attachment",
        }
    }
}

//! Scope fingerprints for cheap change detection.
//!
//! A fingerprint answers "has this table scope changed" without enumerating
//! rows: it digests the row count together with the most recent updated-at
//! timestamp. Sources compute the two aggregates; this module turns them
//! into stable tokens.

use async_trait::async_trait;
use cardwall_core::{short_digest, CardwallResult, EntityKind, EntityRef, ProjectId, Timestamp};

/// Token used in place of a timestamp when a scope has no rows.
pub(crate) const NEVER_TOKEN: &str = "never";

/// Aggregate statistics for one table scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeStats {
    /// Number of rows matching the scope.
    pub rows: u64,
    /// Most recent `updated_at` across matching rows, None when empty.
    pub latest: Option<Timestamp>,
}

impl ScopeStats {
    pub fn new(rows: u64, latest: Option<Timestamp>) -> Self {
        Self { rows, latest }
    }

    /// Stats for a scope with no rows.
    pub fn empty() -> Self {
        Self {
            rows: 0,
            latest: None,
        }
    }

    /// Most recent mutation in microseconds since the epoch.
    pub fn latest_micros(&self) -> Option<i64> {
        self.latest.map(|t| t.timestamp_micros())
    }

    fn latest_token(&self) -> String {
        match self.latest_micros() {
            Some(micros) => micros.to_string(),
            None => NEVER_TOKEN.to_string(),
        }
    }
}

/// Selects the rows a fingerprint covers.
///
/// A selector names a table by entity kind and optionally narrows it to a
/// project, an owning entity, and an opaque condition. The condition string
/// is not interpreted here; the statistics source gives it meaning (a WHERE
/// clause against a real database, a facet label in the in-memory
/// directory).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeSelector {
    pub kind: EntityKind,
    pub project: Option<ProjectId>,
    pub owner: Option<EntityRef>,
    pub condition: Option<String>,
}

impl ScopeSelector {
    /// Whole installation-wide table, e.g. all users.
    pub fn table(kind: EntityKind) -> Self {
        Self {
            kind,
            project: None,
            owner: None,
            condition: None,
        }
    }

    /// All rows of a kind belonging to one project.
    pub fn project_table(kind: EntityKind, project: ProjectId) -> Self {
        Self {
            kind,
            project: Some(project),
            owner: None,
            condition: None,
        }
    }

    /// Narrow the scope to rows owned by a specific entity.
    pub fn owned_by(mut self, owner: EntityRef) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Attach an opaque condition for the source to interpret.
    pub fn matching(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Human-readable scope description for log events.
    pub fn label(&self) -> String {
        let mut label = self.kind.as_str().to_string();
        if let Some(project) = self.project {
            label.push_str(&format!(" project={}", project));
        }
        if let Some(owner) = self.owner {
            label.push_str(&format!(" owner={}", owner));
        }
        if let Some(condition) = &self.condition {
            label.push_str(&format!(" where[{}]", condition));
        }
        label
    }
}

/// Digest of row count plus most recent updated-at.
///
/// Two calls return equal tokens iff no row in the scope was added, removed
/// or touched in between. The one exception is an add and a remove that
/// cancel out within a single clock granule, leaving count and max
/// timestamp unchanged; that window is accepted for cache freshness and
/// must not be relied on for correctness-critical logic.
pub fn fingerprint(stats: &ScopeStats) -> String {
    short_digest(&[&stats.rows.to_string(), &stats.latest_token()])
}

/// Count-only digest for scopes whose rows are immutable once created.
///
/// Cheaper than [`fingerprint`] because the source can skip the timestamp
/// aggregate. Only sound for append-only scopes: with id-ordered inserts a
/// changed row set always changes the count.
pub fn count_fingerprint(stats: &ScopeStats) -> String {
    short_digest(&[&stats.rows.to_string()])
}

/// Source of scope aggregates.
///
/// Implementations answer count and max-updated-at queries for a selector.
/// Equal scope contents must yield equal stats; the production
/// implementation runs one aggregate query per call, the in-memory
/// directory walks its tables.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn scope_stats(&self, selector: &ScopeSelector) -> CardwallResult<ScopeStats>;
}

//! Cache key composition.
//!
//! A cache key is a namespace plus an ordered list of segment tokens,
//! rendered as one `|`-separated string. Collisions from unescaped
//! separators are impossible by construction: the builder digests any
//! token that carries the separator before admitting it.

use std::fmt;

use cardwall_core::{short_digest, KeyError};

use crate::segment::KeySegment;

/// Separator between the namespace and each segment token.
pub const KEY_SEPARATOR: char = '|';

/// The cacheable fragments of the application, one cache namespace each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fragment {
    /// A card rendered as a wall/grid cell.
    CardDiv,
    /// The card hover popup.
    CardPopup,
    /// The transition buttons available on a card.
    Transitions,
    /// A project's murmur feed.
    Feed,
    /// The filter widget for a card list view.
    Filters,
    /// The color legend for a grid view.
    ColorLegend,
    /// The property editor widget.
    PropertyEditor,
    /// A project's tag cloud.
    Tags,
}

impl Fragment {
    pub fn namespace(&self) -> &'static str {
        match self {
            Fragment::CardDiv => "card_div_cache",
            Fragment::CardPopup => "card_popup_cache",
            Fragment::Transitions => "transitions_cache",
            Fragment::Feed => "feed_cache",
            Fragment::Filters => "filters_cache",
            Fragment::ColorLegend => "color_legend_cache",
            Fragment::PropertyEditor => "property_editor_cache",
            Fragment::Tags => "tags_cache",
        }
    }

    /// Rendered-key prefix shared by every key in this fragment's
    /// namespace. Used for namespace-wide invalidation sweeps.
    pub fn prefix(&self) -> String {
        format!("{}{}", self.namespace(), KEY_SEPARATOR)
    }

    /// Start a key in this fragment's namespace.
    pub fn key(self) -> CacheKeyBuilder {
        CacheKey::builder(self.namespace())
    }

    pub fn all() -> [Fragment; 8] {
        [
            Fragment::CardDiv,
            Fragment::CardPopup,
            Fragment::Transitions,
            Fragment::Feed,
            Fragment::Filters,
            Fragment::ColorLegend,
            Fragment::PropertyEditor,
            Fragment::Tags,
        ]
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

/// Namespaced, ordered composition of segment tokens.
///
/// A key uniquely addresses one fragment of one entity's rendering under
/// one viewing context. The rendered string is opaque to the store.
/// Segment order matters only for human debuggability, but all call sites
/// for a fragment must use the same order or equal states land in
/// different slots (wasted space, not a correctness bug).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    tokens: Vec<String>,
}

impl CacheKey {
    pub fn builder(namespace: impl Into<String>) -> CacheKeyBuilder {
        CacheKeyBuilder {
            namespace: namespace.into(),
            tokens: Vec::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// The full string used as the store lookup key.
    pub fn rendered(&self) -> String {
        let mut rendered = self.namespace.clone();
        for token in &self.tokens {
            rendered.push(KEY_SEPARATOR);
            rendered.push_str(token);
        }
        rendered
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered())
    }
}

/// Builder collecting segment tokens in call order.
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    namespace: String,
    tokens: Vec<String>,
}

impl CacheKeyBuilder {
    /// Append a segment's token.
    pub fn segment<S: KeySegment + ?Sized>(mut self, segment: &S) -> Self {
        self.tokens.push(admit(segment.token()));
        self
    }

    /// Append a pre-rendered token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.tokens.push(admit(token.into()));
        self
    }

    /// # Errors
    ///
    /// Returns [`KeyError::EmptyNamespace`] when the namespace is empty;
    /// a namespaceless key cannot be swept per fragment and would collide
    /// across features.
    pub fn build(self) -> Result<CacheKey, KeyError> {
        if self.namespace.is_empty() {
            return Err(KeyError::EmptyNamespace);
        }
        Ok(CacheKey {
            namespace: admit(self.namespace),
            tokens: self.tokens,
        })
    }
}

/// Tokens containing the separator are digested rather than escaped, so a
/// rendered key always splits back into its parts unambiguously.
fn admit(token: String) -> String {
    if token.contains(KEY_SEPARATOR) {
        short_digest(&[&token])
    } else {
        token
    }
}

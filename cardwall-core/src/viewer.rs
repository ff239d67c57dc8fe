//! Viewer identity for permission-scoped rendering.

use crate::{EntityId, ProjectRole};
use serde::{Deserialize, Serialize};

/// The identity a fragment is rendered for.
///
/// Two viewers with the same role rank see identical markup for
/// role-differentiated fragments, so cache entries are shared across
/// users at the same rank. The user id is still part of the identity for
/// fragments that render per-user state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Viewer {
    /// `None` for anonymous visitors on projects with anonymous access.
    pub user_id: Option<EntityId>,
    pub role: ProjectRole,
}

impl Viewer {
    pub fn member(user_id: EntityId, role: ProjectRole) -> Self {
        Self {
            user_id: Some(user_id),
            role,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            user_id: None,
            role: ProjectRole::Anonymous,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }
}

impl Default for Viewer {
    fn default() -> Self {
        Self::anonymous()
    }
}

//! Action names: the closed set of things a descriptor can ask for.
//!
//! The first five target the issue tracker, the rest target a local file.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the fifteen supported actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Create,
    Update,
    Comment,
    Close,
    Delete,
    Append,
    Prepend,
    Replace,
    ReplaceSection,
    InsertAfter,
    InsertBefore,
    ChangelogEntry,
    TaskAdd,
    TaskComplete,
    UpdateBadge,
}

impl Action {
    /// Every action, tracker actions first in legacy grouped order.
    pub const ALL: [Action; 15] = [
        Action::Create,
        Action::Update,
        Action::Comment,
        Action::Close,
        Action::Delete,
        Action::Append,
        Action::Prepend,
        Action::Replace,
        Action::ReplaceSection,
        Action::InsertAfter,
        Action::InsertBefore,
        Action::ChangelogEntry,
        Action::TaskAdd,
        Action::TaskComplete,
        Action::UpdateBadge,
    ];

    /// The group order used by the legacy aggregate file.
    pub const LEGACY_GROUPS: [Action; 5] = [
        Action::Create,
        Action::Update,
        Action::Comment,
        Action::Close,
        Action::Delete,
    ];

    /// The wire name, e.g. `replace-section`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Comment => "comment",
            Self::Close => "close",
            Self::Delete => "delete",
            Self::Append => "append",
            Self::Prepend => "prepend",
            Self::Replace => "replace",
            Self::ReplaceSection => "replace-section",
            Self::InsertAfter => "insert-after",
            Self::InsertBefore => "insert-before",
            Self::ChangelogEntry => "changelog-entry",
            Self::TaskAdd => "task-add",
            Self::TaskComplete => "task-complete",
            Self::UpdateBadge => "update-badge",
        }
    }

    /// Whether this action targets the remote issue tracker.
    pub fn is_tracker(self) -> bool {
        matches!(
            self,
            Self::Create | Self::Update | Self::Comment | Self::Close | Self::Delete
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Underscored spellings show up in hand-written legacy files.
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == normalized)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

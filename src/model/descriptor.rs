//! The update descriptor: one declarative unit of work, as read from disk.
//!
//! Every field is optional at this layer. Required-field checks belong to
//! the validator, which turns a descriptor into a typed `Patch`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One unit of work as it appears in a descriptor file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateDescriptor {
    /// Action name. Parsed into [`super::Action`] by the validator.
    #[serde(default, alias = "mode", skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Caller-supplied idempotency token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,

    /// Generic target: a path string or an issue number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetRef>,

    /// File target for file actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Issue number for tracker actions.
    #[serde(default, alias = "issue_number", skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,

    /// Free-text content to apply: new body, comment text, section text.
    #[serde(
        default,
        rename = "content",
        alias = "body",
        alias = "payload",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignees: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone: Option<u64>,

    /// Issue state for `update` (`open` or `closed`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Close reason for `close` (`completed` or `not_planned`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_reason: Option<String>,

    /// Mode-specific parameters.
    #[serde(default, skip_serializing_if = "Options::is_empty")]
    pub options: Options,

    /// Keys this model doesn't know, kept so rewritten descriptors stay faithful.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A generic `target` value: either a path or an issue number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetRef {
    Number(u64),
    Path(String),
}

/// Mode-specific parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// Heading text for `replace-section`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,

    /// Anchor text for `insert-after`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,

    /// Anchor text for `insert-before`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,

    /// Checklist identifier for `task-complete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    /// Badge name for `update-badge`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge_name: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Options {
    pub fn is_empty(&self) -> bool {
        self.section.is_none()
            && self.after.is_none()
            && self.before.is_none()
            && self.task_id.is_none()
            && self.badge_name.is_none()
            && self.extra.is_empty()
    }
}

impl UpdateDescriptor {
    /// The GUID, if present and non-blank.
    pub fn guid(&self) -> Option<&str> {
        self.guid.as_deref().map(str::trim).filter(|g| !g.is_empty())
    }

    /// The file target: `file`, or a non-numeric `target`.
    pub fn file_target(&self) -> Option<&Path> {
        if let Some(file) = &self.file {
            return Some(file.as_path());
        }
        match &self.target {
            Some(TargetRef::Path(p)) if parse_issue_ref(p).is_none() && !p.trim().is_empty() => {
                Some(Path::new(p))
            }
            _ => None,
        }
    }

    /// The issue number: `number`, or a numeric `target` (`12`, `"12"`, `"#12"`).
    pub fn issue_number(&self) -> Option<u64> {
        self.number.or(match &self.target {
            Some(TargetRef::Number(n)) => Some(*n),
            Some(TargetRef::Path(p)) => parse_issue_ref(p),
            None => None,
        })
    }
}

/// Parse `12` or `#12` as an issue number.
fn parse_issue_ref(s: &str) -> Option<u64> {
    let s = s.trim();
    s.strip_prefix('#').unwrap_or(s).parse().ok()
}

/// Which input channel produced a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    /// The legacy aggregate file.
    Legacy,
    /// A file in the updates directory.
    Directory,
}

/// Where a descriptor came from. Used for diagnostics and archival only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub channel: Channel,

    /// The source file.
    pub source: PathBuf,

    /// Position within the source file's output order.
    pub index: usize,
}

impl Provenance {
    /// The source file's name, for summaries.
    pub fn file_name(&self) -> String {
        self.source
            .file_name()
            .map_or_else(|| self.source.display().to_string(), |n| n.to_string_lossy().into_owned())
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.file_name(), self.index)
    }
}

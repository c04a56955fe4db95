//! Issue tracker interface.
//!
//! The engine talks to the remote tracker only through the [`Tracker`] trait.
//! [`GitHub`] is the real implementation over the REST and GraphQL APIs;
//! tests use an in-memory fake.

mod github;

#[cfg(test)]
pub mod fake;

use serde::{Deserialize, Serialize};

pub use github::{DEFAULT_API_URL, GitHub};

/// Errors from remote tracker calls.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("{operation} failed: HTTP {status}")]
    Status { operation: String, status: u16 },

    #[error("{operation} failed: {message}")]
    Transport { operation: String, message: String },

    #[error("{operation} returned an unexpected response: {message}")]
    Decode { operation: String, message: String },

    #[error("issue #{0} not found")]
    NotFound(u64),

    #[error("issue tracker is not configured: {0}")]
    NotConfigured(String),
}

impl TrackerError {
    /// Whether a transport-level retry could help.
    ///
    /// Rate limits and server errors are retryable, as are failures
    /// that never produced a status at all.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => matches!(status, 429 | 500 | 502 | 503),
            Self::Transport { .. } => true,
            Self::Decode { .. } | Self::NotFound(_) | Self::NotConfigured(_) => false,
        }
    }

    /// Whether a non-idempotent request can be sent again.
    ///
    /// Only a rate-limit rejection guarantees nothing was applied; a server
    /// error or dropped connection may arrive after the write committed.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Status { status: 429, .. })
    }
}

pub type Result<T> = core::result::Result<T, TrackerError>;

/// Issue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

/// Why an issue was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateReason {
    Completed,
    NotPlanned,
}

/// An issue as seen on the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub state: IssueState,
    pub html_url: String,
}

/// A comment on an issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: u64,
    pub body: String,
}

/// Fields for a new issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

/// A partial issue patch. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IssueChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<IssueState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_reason: Option<StateReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignees: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<u64>,
}

impl IssueChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Operations the engine needs from an issue tracker.
///
/// Calls block. Implementations may retry transient failures internally;
/// callers never do.
pub trait Tracker {
    /// Full-text search over issues in the repository.
    fn search_issues(&self, query: &str) -> Result<Vec<Issue>>;

    /// Every issue in the repository, open and closed.
    fn list_issues(&self) -> Result<Vec<Issue>>;

    /// One issue, or `None` if it doesn't exist (or no longer does).
    fn get_issue(&self, number: u64) -> Result<Option<Issue>>;

    fn create_issue(&self, issue: &NewIssue) -> Result<Issue>;

    fn update_issue(&self, number: u64, changes: &IssueChanges) -> Result<Issue>;

    fn list_comments(&self, number: u64) -> Result<Vec<Comment>>;

    fn add_comment(&self, number: u64, body: &str) -> Result<Comment>;

    /// Resolve the tracker's internal identifier for an issue.
    fn resolve_node_id(&self, number: u64) -> Result<String>;

    /// Permanently delete an issue by internal identifier.
    fn delete_issue(&self, node_id: &str) -> Result<()>;

    /// Browser link for an issue number.
    fn issue_url(&self, number: u64) -> String;
}

//! Patch application engine.
//!
//! A validated descriptor becomes a [`Patch`]: either a text edit against a
//! local file or a mutation against the issue tracker. Each variant has
//! exactly one handler. File edits are pure transforms (see [`text`]) with a
//! single write at the end; tracker patches go through [`remote`].

mod remote;
pub mod text;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::ledger::LedgerCache;
use crate::tracker::{IssueChanges, NewIssue, StateReason, Tracker, TrackerError};

/// A text edit applied to a file's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEdit {
    Append(String),
    Prepend(String),
    Replace(String),
    ReplaceSection { section: String, body: String },
    InsertAfter { anchor: String, text: String },
    InsertBefore { anchor: String, text: String },
    ChangelogEntry(String),
    TaskAdd(String),
    /// Close the first open checklist item containing `task_id`, or `text`
    /// when no id is given.
    TaskComplete { task_id: Option<String>, text: String },
    UpdateBadge { badge_name: String, markup: String },
}

/// A mutation against the issue tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerPatch {
    /// Create an issue, then set assignees and milestone in a follow-up call.
    Create {
        issue: NewIssue,
        assignees: Vec<String>,
        milestone: Option<u64>,
    },
    Update { number: u64, changes: IssueChanges },
    Comment { number: u64, body: String },
    /// Close with a reason, optionally leaving a confirmation comment.
    Close {
        number: u64,
        reason: StateReason,
        comment: Option<String>,
    },
    Delete { number: u64 },
}

impl TrackerPatch {
    /// The issue this patch acts on, when known before applying.
    pub fn number(&self) -> Option<u64> {
        match self {
            Self::Create { .. } => None,
            Self::Update { number, .. }
            | Self::Comment { number, .. }
            | Self::Close { number, .. }
            | Self::Delete { number } => Some(*number),
        }
    }
}

/// What a validated descriptor asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch {
    File { path: PathBuf, edit: FileEdit },
    Tracker(TrackerPatch),
}

/// What the tracker did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueAct {
    Created,
    Updated,
    Commented,
    Closed,
    Deleted,
}

/// A successful application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A file target was written (or already had the wanted content).
    File { path: PathBuf, changed: bool },

    /// A tracker mutation went through.
    Tracker {
        number: u64,
        act: IssueAct,
        /// Non-fatal problem, e.g. a follow-up call that failed.
        note: Option<String>,
    },

    /// The ledger found this descriptor's effect already in place.
    AlreadyApplied { number: u64 },
}

/// Errors from applying a patch.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("failed to {operation} {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        source: io::Error,
    },

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// Applies patches against a working directory and an optional tracker.
pub struct Engine<'t> {
    /// Relative file targets resolve against this directory.
    root: PathBuf,
    tracker: Option<&'t dyn Tracker>,
    dry_run: bool,
}

impl<'t> Engine<'t> {
    pub fn new(root: impl Into<PathBuf>, tracker: Option<&'t dyn Tracker>) -> Self {
        Self {
            root: root.into(),
            tracker,
            dry_run: false,
        }
    }

    /// In dry-run mode nothing is written and no tracker call mutates anything.
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// The tracker, or an error naming why there is none.
    pub fn tracker(&self) -> Result<&'t dyn Tracker, TrackerError> {
        self.tracker.ok_or_else(|| {
            TrackerError::NotConfigured("set GH_TOKEN and REPO to enable tracker actions".into())
        })
    }

    /// Where a file target lives on disk.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Apply one patch. `guid` is embedded as a ledger marker in tracker state.
    pub fn apply(
        &self,
        patch: &Patch,
        guid: Option<&str>,
        cache: &mut LedgerCache,
    ) -> Result<Applied, ApplyError> {
        match patch {
            Patch::File { path, edit } => self.apply_file(path, edit),
            Patch::Tracker(patch) => {
                let tracker = self.tracker()?;
                if self.dry_run {
                    debug!(?patch, "dry run: skipping tracker call");
                    return Ok(Applied::Tracker {
                        number: patch.number().unwrap_or_default(),
                        act: remote::act_for(patch),
                        note: Some("dry run".into()),
                    });
                }
                Ok(remote::apply(tracker, cache, patch, guid)?)
            }
        }
    }

    fn apply_file(&self, path: &Path, edit: &FileEdit) -> Result<Applied, ApplyError> {
        let target = self.resolve(path);
        let current = if target.exists() {
            read_text(&target).map_err(|source| ApplyError::Io {
                operation: "read",
                path: target.clone(),
                source,
            })?
        } else {
            String::new()
        };

        let updated = text::transform(&current, edit);
        let changed = updated != current || !target.exists();

        if self.dry_run {
            debug!(file = %target.display(), changed, "dry run: not writing");
            return Ok(Applied::File {
                path: path.to_path_buf(),
                changed,
            });
        }

        if !target.exists() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|source| ApplyError::Io {
                    operation: "create directory for",
                    path: target.clone(),
                    source,
                })?;
            }
            info!(file = %target.display(), "creating new file");
        }

        if changed {
            fs::write(&target, &updated).map_err(|source| ApplyError::Io {
                operation: "write",
                path: target.clone(),
                source,
            })?;
            info!(file = %target.display(), "updated");
        } else {
            debug!(file = %target.display(), "no changes needed");
        }

        Ok(Applied::File {
            path: path.to_path_buf(),
            changed,
        })
    }
}

/// Read a file as text, falling back to Latin-1 for non-UTF-8 bytes.
fn read_text(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().iter().map(|&b| char::from(b)).collect(),
    })
}

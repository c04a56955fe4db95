//! Archive records: what happened to each descriptor.
//!
//! A record file is written beside every archived source file as
//! `<prefix>_<stem>.record.json`. It is created once by archival and
//! touched at most once more, by the backfill pass.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::{Action, Provenance, UpdateDescriptor};

/// Terminal classification of one processing attempt.
///
/// Ordered by severity so a multi-descriptor file can take the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Processed,
    Malformed,
    Failed,
}

impl Outcome {
    /// The archive subdirectory for this outcome.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Malformed => "malformed",
            Self::Failed => "failed",
        }
    }
}

/// One descriptor plus what happened to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRecord {
    pub provenance: Provenance,

    /// The descriptor as read. `None` when the source didn't parse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<UpdateDescriptor>,

    /// The parsed action, when it was recognized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,

    pub outcome: Outcome,

    pub timestamp: Timestamp,

    /// Reason or error text for malformed and failed outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,

    /// Issue created or acted on, for tracker actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_number: Option<u64>,

    /// Permalink, filled in by backfill.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_reference: Option<String>,
}

impl ArchiveRecord {
    pub fn guid(&self) -> Option<&str> {
        self.descriptor.as_ref().and_then(UpdateDescriptor::guid)
    }
}

/// The sidecar written for one archived source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFile {
    /// Outcome of the source file as a whole.
    pub outcome: Outcome,

    pub archived_at: Timestamp,

    /// Name the source file had before archival.
    pub source: String,

    /// Where the original now lives, relative to the outcome directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_as: Option<String>,

    pub records: Vec<ArchiveRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_outcome_wins() {
        let worst = [Outcome::Processed, Outcome::Failed, Outcome::Malformed]
            .into_iter()
            .max()
            .unwrap();
        assert_eq!(worst, Outcome::Failed);
        assert!(Outcome::Malformed > Outcome::Processed);
    }

    #[test]
    fn dir_names() {
        assert_eq!(Outcome::Processed.dir_name(), "processed");
        assert_eq!(Outcome::Malformed.dir_name(), "malformed");
        assert_eq!(Outcome::Failed.dir_name(), "failed");
    }
}

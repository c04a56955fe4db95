//! Tracker-target strategies.
//!
//! No retries here: transport-level retry is the tracker client's job.
//! Any error is reported as-is and the descriptor is classified failed.

use tracing::{info, warn};

use crate::ledger::{LedgerCache, with_marker};
use crate::tracker::{IssueChanges, IssueState, Result, Tracker};

use super::{Applied, IssueAct, TrackerPatch};

/// Text of the confirmation comment left when a close has a GUID but no text.
const CLOSE_CONFIRMATION: &str = "Closed by automated update.";

/// The act a patch performs, for reporting.
pub(super) fn act_for(patch: &TrackerPatch) -> IssueAct {
    match patch {
        TrackerPatch::Create { .. } => IssueAct::Created,
        TrackerPatch::Update { .. } => IssueAct::Updated,
        TrackerPatch::Comment { .. } => IssueAct::Commented,
        TrackerPatch::Close { .. } => IssueAct::Closed,
        TrackerPatch::Delete { .. } => IssueAct::Deleted,
    }
}

/// Apply a tracker patch, recording what it created in the run cache.
pub(super) fn apply(
    tracker: &dyn Tracker,
    cache: &mut LedgerCache,
    patch: &TrackerPatch,
    guid: Option<&str>,
) -> Result<Applied> {
    match patch {
        TrackerPatch::Create {
            issue,
            assignees,
            milestone,
        } => create(tracker, cache, issue, assignees, *milestone, guid),
        TrackerPatch::Update { number, changes } => update(tracker, cache, *number, changes, guid),
        TrackerPatch::Comment { number, body } => comment(tracker, cache, *number, body, guid),
        TrackerPatch::Close {
            number,
            reason,
            comment,
        } => close(tracker, cache, *number, *reason, comment.as_deref(), guid),
        TrackerPatch::Delete { number } => delete(tracker, cache, *number),
    }
}

fn create(
    tracker: &dyn Tracker,
    cache: &mut LedgerCache,
    issue: &crate::tracker::NewIssue,
    assignees: &[String],
    milestone: Option<u64>,
    guid: Option<&str>,
) -> Result<Applied> {
    let mut issue = issue.clone();
    issue.body = with_marker(&issue.body, guid);

    let created = tracker.create_issue(&issue)?;
    let number = created.number;
    info!(number, title = %created.title, "created issue");
    cache.record_issue(created);

    // Assignees and milestone are follow-up calls. The issue exists either
    // way, so a failure here is reported without failing the descriptor.
    let mut note = None;
    if !assignees.is_empty() || milestone.is_some() {
        let follow_up = IssueChanges {
            assignees: (!assignees.is_empty()).then(|| assignees.to_vec()),
            milestone,
            ..IssueChanges::default()
        };
        match tracker.update_issue(number, &follow_up) {
            Ok(updated) => cache.record_issue(updated),
            Err(e) => {
                warn!(number, error = %e, "could not set assignees or milestone");
                note = Some(format!("issue created, but setting assignees/milestone failed: {e}"));
            }
        }
    }

    Ok(Applied::Tracker {
        number,
        act: IssueAct::Created,
        note,
    })
}

fn update(
    tracker: &dyn Tracker,
    cache: &mut LedgerCache,
    number: u64,
    changes: &IssueChanges,
    guid: Option<&str>,
) -> Result<Applied> {
    let mut changes = changes.clone();
    if let Some(body) = &changes.body {
        changes.body = Some(with_marker(body, guid));
    }
    let updated = tracker.update_issue(number, &changes)?;
    info!(number, "updated issue");
    cache.record_issue(updated);
    Ok(Applied::Tracker {
        number,
        act: IssueAct::Updated,
        note: None,
    })
}

fn comment(
    tracker: &dyn Tracker,
    cache: &mut LedgerCache,
    number: u64,
    body: &str,
    guid: Option<&str>,
) -> Result<Applied> {
    let added = tracker.add_comment(number, &with_marker(body, guid))?;
    info!(number, comment = added.id, "commented on issue");
    cache.record_comment(number, added);
    Ok(Applied::Tracker {
        number,
        act: IssueAct::Commented,
        note: None,
    })
}

fn close(
    tracker: &dyn Tracker,
    cache: &mut LedgerCache,
    number: u64,
    reason: crate::tracker::StateReason,
    comment: Option<&str>,
    guid: Option<&str>,
) -> Result<Applied> {
    let changes = IssueChanges {
        state: Some(IssueState::Closed),
        state_reason: Some(reason),
        ..IssueChanges::default()
    };
    let closed = tracker.update_issue(number, &changes)?;
    info!(number, ?reason, "closed issue");
    cache.record_issue(closed);

    let text = match (comment, guid) {
        (Some(text), _) => Some(text),
        (None, Some(_)) => Some(CLOSE_CONFIRMATION),
        (None, None) => None,
    };
    let mut note = None;
    if let Some(text) = text {
        match tracker.add_comment(number, &with_marker(text, guid)) {
            Ok(added) => cache.record_comment(number, added),
            Err(e) => {
                warn!(number, error = %e, "could not post close confirmation");
                note = Some(format!("issue closed, but the confirmation comment failed: {e}"));
            }
        }
    }

    Ok(Applied::Tracker {
        number,
        act: IssueAct::Closed,
        note,
    })
}

/// Delete in two steps: resolve the internal id, then mutate.
///
/// Resolution fails on a stale number, so nothing is deleted by accident.
fn delete(tracker: &dyn Tracker, cache: &mut LedgerCache, number: u64) -> Result<Applied> {
    let node_id = tracker.resolve_node_id(number)?;
    tracker.delete_issue(&node_id)?;
    warn!(number, "deleted issue");
    cache.forget_issue(number);
    Ok(Applied::Tracker {
        number,
        act: IssueAct::Deleted,
        note: None,
    })
}

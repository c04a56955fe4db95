//! Permalink backfill over the processed archive.
//!
//! Independent of the main run and safe to repeat: records that already
//! carry a `resolved_reference` are left alone.

use tracing::{debug, info, warn};

use crate::archive::{Archive, ArchiveError};
use crate::ledger::has_marker;
use crate::model::{Action, ArchiveRecord, Outcome};
use crate::tracker::Tracker;

#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Counts from one backfill pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// References written by this pass.
    pub resolved: usize,
    /// Records that already had a reference.
    pub already_resolved: usize,
    /// Tracker records that couldn't be resolved.
    pub unresolved: usize,
    /// Record files rewritten.
    pub files_updated: usize,
}

/// Fill in `resolved_reference` on processed tracker records.
pub fn backfill(archive: &Archive, tracker: &dyn Tracker) -> Result<BackfillReport, BackfillError> {
    let mut report = BackfillReport::default();

    for (path, mut file) in archive.load_records(Outcome::Processed)? {
        let mut changed = false;
        for record in &mut file.records {
            if record.resolved_reference.is_some() {
                report.already_resolved += 1;
                continue;
            }
            // File edits and deletions have nothing to link to.
            if !record
                .action
                .is_some_and(|a| a.is_tracker() && a != Action::Delete)
            {
                continue;
            }
            match resolve(tracker, record) {
                Some(url) => {
                    debug!(record = %record.provenance, %url, "resolved");
                    record.resolved_reference = Some(url);
                    report.resolved += 1;
                    changed = true;
                }
                None => report.unresolved += 1,
            }
        }
        if changed {
            archive.save_record(&path, &file)?;
            report.files_updated += 1;
        }
    }

    info!(
        resolved = report.resolved,
        unresolved = report.unresolved,
        files = report.files_updated,
        "backfill complete"
    );
    Ok(report)
}

/// A known issue number gives the link directly; otherwise look the GUID up.
fn resolve(tracker: &dyn Tracker, record: &ArchiveRecord) -> Option<String> {
    if let Some(number) = record.resource_number {
        return Some(tracker.issue_url(number));
    }
    let guid = record.guid()?;
    match tracker.search_issues(&format!("\"{guid}\"")) {
        Ok(found) => found
            .into_iter()
            .find(|i| has_marker(&i.body, guid))
            .map(|i| i.html_url),
        Err(e) => {
            warn!(guid, error = %e, "could not search for record");
            None
        }
    }
}

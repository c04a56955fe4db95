//! Deduplication ledger.
//!
//! There is no stored ledger. A descriptor's GUID is embedded as an HTML
//! comment in whatever it writes to the tracker, and "already applied" means
//! that marker is found in the current tracker state. Only tracker actions
//! are checked; file edits carry no marker scan.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::patch::TrackerPatch;
use crate::tracker::{Comment, Issue, IssueState, Result, Tracker};

/// The marker embedded in tracker state for `guid`.
pub fn marker(guid: &str) -> String {
    format!("<!-- guid:{guid} -->")
}

/// `text` with the marker for `guid` appended on its own line.
pub fn with_marker(text: &str, guid: Option<&str>) -> String {
    match guid {
        Some(guid) if text.is_empty() => marker(guid),
        Some(guid) => format!("{text}\n\n{}", marker(guid)),
        None => text.to_string(),
    }
}

/// Whether `text` carries the marker for `guid`.
pub fn has_marker(text: &str, guid: &str) -> bool {
    text.contains(&marker(guid))
}

/// Result of a ledger check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Fresh,
    /// The effect is already present on this issue.
    Applied { number: u64 },
}

/// Tracker state fetched or produced during one run.
///
/// Owned by the processor for the duration of a run and reset at its end,
/// so nothing leaks between runs or tests.
#[derive(Debug, Default)]
pub struct LedgerCache {
    /// Issues created or changed by this run.
    known: Vec<Issue>,
    /// Comments posted by this run.
    posted: Vec<(u64, Comment)>,
    /// Full issue listing, fetched at most once when search is unavailable.
    listing: Option<Vec<Issue>>,
    /// Comment lists fetched from the tracker.
    comments: HashMap<u64, Vec<Comment>>,
}

impl LedgerCache {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn record_issue(&mut self, issue: Issue) {
        if let Some(listing) = &mut self.listing {
            upsert(listing, issue.clone());
        }
        upsert(&mut self.known, issue);
    }

    pub fn record_comment(&mut self, number: u64, comment: Comment) {
        self.posted.push((number, comment));
    }

    pub fn forget_issue(&mut self, number: u64) {
        self.known.retain(|i| i.number != number);
        self.posted.retain(|(n, _)| *n != number);
        self.comments.remove(&number);
        if let Some(listing) = &mut self.listing {
            listing.retain(|i| i.number != number);
        }
    }

    fn listing(&mut self, tracker: &dyn Tracker) -> Result<&[Issue]> {
        if self.listing.is_none() {
            let mut all = tracker.list_issues()?;
            for issue in &self.known {
                upsert(&mut all, issue.clone());
            }
            debug!(count = all.len(), "fetched issue listing");
            self.listing = Some(all);
        }
        Ok(self.listing.as_deref().unwrap_or_default())
    }

    fn comments(&mut self, tracker: &dyn Tracker, number: u64) -> Result<&[Comment]> {
        if !self.comments.contains_key(&number) {
            let fetched = tracker.list_comments(number)?;
            self.comments.insert(number, fetched);
        }
        Ok(self.comments.get(&number).map_or(&[][..], Vec::as_slice))
    }

    fn posted_marker(&self, number: u64, guid: &str) -> bool {
        self.posted
            .iter()
            .any(|(n, c)| *n == number && has_marker(&c.body, guid))
    }
}

fn upsert(issues: &mut Vec<Issue>, issue: Issue) {
    match issues.iter_mut().find(|i| i.number == issue.number) {
        Some(slot) => *slot = issue,
        None => issues.push(issue),
    }
}

/// Whether `patch` has already taken effect.
///
/// Search failures (rate limits, denied scopes) fall back to a linear scan
/// of the full issue listing. Any other tracker error is returned and the
/// descriptor fails like an apply error would.
pub fn already_applied(
    tracker: &dyn Tracker,
    cache: &mut LedgerCache,
    guid: Option<&str>,
    patch: &TrackerPatch,
) -> Result<Check> {
    let check = match patch {
        TrackerPatch::Create { issue, .. } => match guid {
            Some(guid) => find_issue(tracker, cache, &format!("\"{guid}\" in:body"), |i| {
                has_marker(&i.body, guid)
            })?,
            // Best effort only: two different issues with one title collide.
            None => find_issue(
                tracker,
                cache,
                &format!("\"{}\" in:title is:open", issue.title),
                |i| i.state == IssueState::Open && i.title == issue.title,
            )?,
        },
        TrackerPatch::Update { number, .. } => match guid {
            Some(guid) => tracker
                .get_issue(*number)?
                .filter(|i| has_marker(&i.body, guid))
                .map(|i| i.number),
            None => None,
        },
        TrackerPatch::Comment { number, .. } => match guid {
            Some(guid) => comment_marker(tracker, cache, *number, guid)?.then_some(*number),
            None => None,
        },
        TrackerPatch::Close { number, .. } => {
            let closed = tracker
                .get_issue(*number)?
                .is_some_and(|i| i.state == IssueState::Closed);
            let confirmed = match guid {
                Some(guid) if !closed => comment_marker(tracker, cache, *number, guid)?,
                _ => false,
            };
            (closed || confirmed).then_some(*number)
        }
        TrackerPatch::Delete { number } => tracker.get_issue(*number)?.is_none().then_some(*number),
    };

    Ok(match check {
        Some(number) => {
            debug!(number, guid, "ledger hit");
            Check::Applied { number }
        }
        None => Check::Fresh,
    })
}

fn find_issue(
    tracker: &dyn Tracker,
    cache: &mut LedgerCache,
    query: &str,
    matches: impl Fn(&Issue) -> bool,
) -> Result<Option<u64>> {
    if let Some(issue) = cache.known.iter().find(|&i| matches(i)) {
        return Ok(Some(issue.number));
    }
    match tracker.search_issues(query) {
        Ok(found) => Ok(found.iter().find(|&i| matches(i)).map(|i| i.number)),
        Err(e) => {
            warn!(error = %e, "issue search unavailable, scanning all issues");
            Ok(cache
                .listing(tracker)?
                .iter()
                .find(|&i| matches(i))
                .map(|i| i.number))
        }
    }
}

fn comment_marker(
    tracker: &dyn Tracker,
    cache: &mut LedgerCache,
    number: u64,
    guid: &str,
) -> Result<bool> {
    if cache.posted_marker(number, guid) {
        return Ok(true);
    }
    Ok(cache
        .comments(tracker, number)?
        .iter()
        .any(|c| has_marker(&c.body, guid)))
}

//! Per-descriptor lifecycle.
//!
//! ```text
//! Pending ─┬─> Malformed ──────────────> Archived(malformed)
//!          └─> Applying ─┬─> Applied ──> Archived(processed)
//!                        └─> Failed ───> Archived(failed)
//! ```
//!
//! Archived stages are terminal.

use crate::model::Outcome;

/// Where a descriptor is in one processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    Malformed,
    Applying,
    Applied,
    Failed,
    Archived(Outcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid lifecycle transition: {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: Stage,
    pub to: Stage,
}

impl Stage {
    /// Move to `to`, or refuse if the lifecycle doesn't allow it.
    pub fn advance(self, to: Stage) -> Result<Stage, InvalidTransition> {
        let allowed = match (self, to) {
            (Self::Pending, Self::Malformed | Self::Applying)
            | (Self::Applying, Self::Applied | Self::Failed) => true,
            (from, Self::Archived(outcome)) => from.outcome() == Some(outcome),
            _ => false,
        };
        if allowed {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }

    /// The archive outcome this stage settles into, once it has one.
    pub fn outcome(self) -> Option<Outcome> {
        match self {
            Self::Applied => Some(Outcome::Processed),
            Self::Malformed => Some(Outcome::Malformed),
            Self::Failed => Some(Outcome::Failed),
            Self::Pending | Self::Applying | Self::Archived(_) => None,
        }
    }

    /// Move to the archived stage for this stage's outcome.
    pub fn archive(self) -> Result<Stage, InvalidTransition> {
        match self.outcome() {
            Some(outcome) => self.advance(Self::Archived(outcome)),
            None => Err(InvalidTransition {
                from: self,
                to: Self::Archived(Outcome::Failed),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_paths_reach_their_archive() {
        let applied = Stage::Pending
            .advance(Stage::Applying)
            .and_then(|s| s.advance(Stage::Applied))
            .and_then(Stage::archive)
            .unwrap();
        assert_eq!(applied, Stage::Archived(Outcome::Processed));

        let failed = Stage::Pending
            .advance(Stage::Applying)
            .and_then(|s| s.advance(Stage::Failed))
            .and_then(Stage::archive)
            .unwrap();
        assert_eq!(failed, Stage::Archived(Outcome::Failed));

        let malformed = Stage::Pending
            .advance(Stage::Malformed)
            .and_then(Stage::archive)
            .unwrap();
        assert_eq!(malformed, Stage::Archived(Outcome::Malformed));
    }

    #[test]
    fn skipping_or_leaving_terminal_stages_is_rejected() {
        assert!(Stage::Pending.advance(Stage::Applied).is_err());
        assert!(Stage::Malformed.advance(Stage::Applying).is_err());
        assert!(Stage::Applied.advance(Stage::Archived(Outcome::Failed)).is_err());
        assert!(Stage::Applying.archive().is_err());

        let done = Stage::Archived(Outcome::Processed);
        assert!(done.advance(Stage::Pending).is_err());
        assert!(done.advance(Stage::Archived(Outcome::Processed)).is_err());
    }
}

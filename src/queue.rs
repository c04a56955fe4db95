//! The queue processor: one pass over every pending descriptor.
//!
//! Source loader, validator, ledger, patch engine, archive, in that order,
//! one descriptor at a time. Errors are caught per descriptor and turned
//! into an archive outcome; only stop-on-first-error ends a run early.

use std::path::{Path, PathBuf};

use jiff::Timestamp;
use tracing::{debug, error, info, warn};

use crate::archive::lifecycle::{InvalidTransition, Stage};
use crate::archive::{Archive, ArchiveError};
use crate::ledger::{self, Check, LedgerCache};
use crate::model::{ArchiveRecord, Channel, Outcome, Provenance};
use crate::patch::{Applied, ApplyError, Engine, Patch};
use crate::source::{Entry, Loader, SourceError, SourceUnit};
use crate::validate::{Validated, validate};

/// Diagnostic for descriptors skipped after a stop.
const NOT_ATTEMPTED: &str = "not attempted: run stopped after an earlier error";

/// Errors that end a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Lifecycle(#[from] InvalidTransition),
}

/// How a run behaves.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// End the run at the first descriptor that fails to apply.
    pub stop_on_first_error: bool,
    /// Validate and check the ledger, but change nothing.
    pub dry_run: bool,
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Applied by this run.
    pub processed: Vec<String>,
    /// Found already applied by the ledger. Archived as processed.
    pub already_applied: Vec<String>,
    pub malformed: Vec<String>,
    pub failed: Vec<String>,
    /// File targets whose content changed.
    pub files_updated: Vec<PathBuf>,
    /// Sources left in place because archiving them failed.
    pub unarchived: Vec<String>,
    pub stopped: bool,
    pub dry_run: bool,
}

impl RunSummary {
    /// Descriptors seen, across every category.
    pub fn total(&self) -> usize {
        self.processed.len() + self.already_applied.len() + self.malformed.len() + self.failed.len()
    }

    fn note_file(&mut self, path: &Path) {
        if !self.files_updated.iter().any(|p| p == path) {
            self.files_updated.push(path.to_path_buf());
        }
    }
}

/// Processes the update queue.
pub struct Processor<'t> {
    engine: Engine<'t>,
    loader: Loader,
    archive: Archive,
    legacy: Option<PathBuf>,
    options: RunOptions,
}

impl<'t> Processor<'t> {
    /// A processor over `updates_dir` and the optional legacy aggregate file.
    ///
    /// Archive directories are created up front, except in dry-run mode.
    pub fn new(
        updates_dir: &Path,
        legacy: Option<PathBuf>,
        engine: Engine<'t>,
        options: RunOptions,
    ) -> Result<Self, RunError> {
        let archive = if options.dry_run {
            Archive::open(updates_dir)
        } else {
            Archive::new(updates_dir)?
        };
        let loader = Loader::new(
            updates_dir,
            legacy.clone(),
            archive.dir(Outcome::Processed),
        );
        Ok(Self {
            engine: engine.dry_run(options.dry_run),
            loader,
            archive,
            legacy,
            options,
        })
    }

    /// Run one pass.
    pub fn run(&self) -> Result<RunSummary, RunError> {
        let units = self.loader.load()?;
        let mut cache = LedgerCache::default();
        let mut summary = RunSummary {
            dry_run: self.options.dry_run,
            ..RunSummary::default()
        };

        let result = self.run_units(&units, &mut cache, &mut summary);
        cache.reset();
        result?;

        info!(
            processed = summary.processed.len(),
            already_applied = summary.already_applied.len(),
            malformed = summary.malformed.len(),
            failed = summary.failed.len(),
            stopped = summary.stopped,
            "run complete"
        );
        Ok(summary)
    }

    fn run_units(
        &self,
        units: &[SourceUnit],
        cache: &mut LedgerCache,
        summary: &mut RunSummary,
    ) -> Result<(), RunError> {
        for unit in units {
            let records = self.process_unit(unit, cache, summary)?;
            if !self.options.dry_run {
                self.archive_unit(unit, records, summary);
            }
            if summary.stopped {
                warn!(file = %unit.path.display(), "stopping after first error");
                break;
            }
        }
        Ok(())
    }

    fn process_unit(
        &self,
        unit: &SourceUnit,
        cache: &mut LedgerCache,
        summary: &mut RunSummary,
    ) -> Result<Vec<ArchiveRecord>, RunError> {
        debug!(file = %unit.path.display(), entries = unit.entries.len(), "processing");

        if let Some(reason) = &unit.error {
            warn!(file = %unit.path.display(), %reason, "malformed source file");
            let record = ArchiveRecord {
                provenance: Provenance {
                    channel: unit.channel,
                    source: unit.path.clone(),
                    index: 0,
                },
                descriptor: None,
                action: None,
                outcome: Outcome::Malformed,
                timestamp: Timestamp::now(),
                diagnostic: Some(reason.clone()),
                resource_number: None,
                resolved_reference: None,
            };
            summary.malformed.push(record.provenance.to_string());
            return Ok(vec![record]);
        }

        let mut records = Vec::with_capacity(unit.entries.len());
        for entry in &unit.entries {
            if summary.stopped {
                let mut record = new_record(entry, Outcome::Failed);
                record.diagnostic = Some(NOT_ATTEMPTED.into());
                summary.failed.push(record.provenance.to_string());
                records.push(record);
                continue;
            }
            records.push(self.process_entry(entry, cache, summary)?);
        }
        Ok(records)
    }

    fn process_entry(
        &self,
        entry: &Entry,
        cache: &mut LedgerCache,
        summary: &mut RunSummary,
    ) -> Result<ArchiveRecord, RunError> {
        let name = entry.provenance.to_string();
        let stage = Stage::Pending;

        let validated = match &entry.descriptor {
            Ok(descriptor) => validate(descriptor).map_err(|m| m.0),
            Err(reason) => Err(reason.clone()),
        };
        let validated = match validated {
            Ok(validated) => validated,
            Err(reason) => {
                let stage = stage.advance(Stage::Malformed)?;
                warn!(descriptor = %name, %reason, "malformed");
                let mut record = new_record(entry, outcome_of(stage.archive()?));
                record.diagnostic = Some(reason);
                summary.malformed.push(name);
                return Ok(record);
            }
        };

        let stage = stage.advance(Stage::Applying)?;
        let mut record = new_record(entry, Outcome::Processed);
        record.action = Some(validated.action);
        debug!(descriptor = %name, action = %validated.action, guid = ?validated.guid, "applying");

        let stage = match self.apply(&validated, cache) {
            Ok(applied) => {
                self.note_applied(&name, &applied, &mut record, summary);
                stage.advance(Stage::Applied)?
            }
            Err(e) => {
                error!(descriptor = %name, error = %e, "failed");
                record.diagnostic = Some(e.to_string());
                if let Patch::Tracker(patch) = &validated.patch {
                    record.resource_number = patch.number();
                }
                summary.failed.push(name);
                if self.options.stop_on_first_error {
                    summary.stopped = true;
                }
                stage.advance(Stage::Failed)?
            }
        };
        record.outcome = outcome_of(stage.archive()?);
        Ok(record)
    }

    /// Ledger check, then the engine.
    fn apply(&self, validated: &Validated, cache: &mut LedgerCache) -> Result<Applied, ApplyError> {
        let guid = validated.guid.as_deref();
        if let Patch::Tracker(patch) = &validated.patch {
            let tracker = self.engine.tracker()?;
            if let Check::Applied { number } = ledger::already_applied(tracker, cache, guid, patch)? {
                return Ok(Applied::AlreadyApplied { number });
            }
        }
        self.engine.apply(&validated.patch, guid, cache)
    }

    fn note_applied(
        &self,
        name: &str,
        applied: &Applied,
        record: &mut ArchiveRecord,
        summary: &mut RunSummary,
    ) {
        match applied {
            Applied::File { path, changed } => {
                if *changed {
                    summary.note_file(path);
                }
                info!(descriptor = %name, file = %path.display(), changed, "applied");
                summary.processed.push(name.to_string());
            }
            Applied::Tracker { number, act, note } => {
                record.resource_number = (*number != 0).then_some(*number);
                record.diagnostic.clone_from(note);
                info!(descriptor = %name, number, ?act, "applied");
                summary.processed.push(name.to_string());
            }
            Applied::AlreadyApplied { number } => {
                record.resource_number = Some(*number);
                record.diagnostic = Some("already applied".into());
                info!(descriptor = %name, number, "already applied, skipping");
                summary.already_applied.push(name.to_string());
            }
        }
    }

    fn archive_unit(&self, unit: &SourceUnit, records: Vec<ArchiveRecord>, summary: &mut RunSummary) {
        let any_processed = records.iter().any(|r| r.outcome == Outcome::Processed);
        let result = match unit.channel {
            Channel::Directory => self.archive.archive_file(&unit.path, records).map(|_| ()),
            Channel::Legacy => self.archive_legacy(unit, records, any_processed),
        };
        if let Err(e) = result {
            error!(file = %unit.path.display(), error = %e, "archival failed; source left in place");
            summary.unarchived.push(unit.path.display().to_string());
        }
    }

    fn archive_legacy(
        &self,
        unit: &SourceUnit,
        records: Vec<ArchiveRecord>,
        any_processed: bool,
    ) -> Result<(), ArchiveError> {
        self.archive.archive_legacy(&unit.path, records)?;
        // Marked only once something from it took effect.
        if any_processed
            && let Some(digest) = &unit.digest
        {
            let legacy = self.legacy.as_deref().unwrap_or(&unit.path);
            self.archive.mark_legacy(legacy, digest)?;
        }
        Ok(())
    }
}

fn new_record(entry: &Entry, outcome: Outcome) -> ArchiveRecord {
    ArchiveRecord {
        provenance: entry.provenance.clone(),
        descriptor: entry.descriptor.as_ref().ok().cloned(),
        action: None,
        outcome,
        timestamp: Timestamp::now(),
        diagnostic: None,
        resource_number: None,
        resolved_reference: None,
    }
}

fn outcome_of(stage: Stage) -> Outcome {
    match stage {
        Stage::Archived(outcome) => outcome,
        _ => Outcome::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use tempfile::TempDir;

    use crate::ledger::marker;
    use crate::tracker::fake::FakeTracker;
    use crate::tracker::{IssueState, Tracker};

    struct Queue {
        dir: TempDir,
    }

    impl Queue {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            fs::create_dir_all(dir.path().join("updates")).unwrap();
            Self { dir }
        }

        fn root(&self) -> &Path {
            self.dir.path()
        }

        fn updates(&self) -> PathBuf {
            self.root().join("updates")
        }

        fn legacy(&self) -> PathBuf {
            self.root().join("issue_updates.json")
        }

        fn enqueue(&self, name: &str, json: &str) {
            fs::write(self.updates().join(name), json).unwrap();
        }

        fn run_with(&self, tracker: Option<&dyn Tracker>, options: RunOptions) -> RunSummary {
            let engine = Engine::new(self.root(), tracker);
            Processor::new(&self.updates(), Some(self.legacy()), engine, options)
                .unwrap()
                .run()
                .unwrap()
        }

        fn run(&self, tracker: Option<&dyn Tracker>) -> RunSummary {
            self.run_with(tracker, RunOptions::default())
        }

        fn archived(&self, outcome: Outcome) -> Vec<String> {
            let mut names: Vec<_> = fs::read_dir(self.updates().join(outcome.dir_name()))
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .filter(|n| !n.ends_with(".record.json") && !n.ends_with(".sentinel"))
                .collect();
            names.sort();
            names
        }

        fn pending(&self) -> Vec<String> {
            let mut names: Vec<_> = fs::read_dir(self.updates())
                .unwrap()
                .map(|e| e.unwrap().path())
                .filter(|p| p.is_file())
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }

        fn read(&self, path: &str) -> String {
            fs::read_to_string(self.root().join(path)).unwrap()
        }
    }

    const CREATE: &str = r#"{"action":"create","guid":"issue-1","title":"Flaky CI","body":"It flakes."}"#;

    #[test]
    fn tracker_descriptor_applies_once_across_runs() {
        let queue = Queue::new();
        let tracker = FakeTracker::new();

        queue.enqueue("001_create.json", CREATE);
        let first = queue.run(Some(&tracker));
        assert_eq!(first.processed.len(), 1);

        queue.enqueue("001_create.json", CREATE);
        let second = queue.run(Some(&tracker));
        assert_eq!(second.processed.len(), 0);
        assert_eq!(second.already_applied.len(), 1);

        assert_eq!(tracker.creates.get(), 1);
        let issues = tracker.all_issues();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].body.contains(&marker("issue-1")));
        assert_eq!(queue.archived(Outcome::Processed).len(), 2);
    }

    #[test]
    fn duplicate_in_the_same_run_is_caught_by_the_run_cache() {
        let queue = Queue::new();
        let tracker = FakeTracker::new();
        queue.enqueue("001.json", &format!("[{CREATE}, {CREATE}]"));

        let summary = queue.run(Some(&tracker));

        assert_eq!(summary.processed, ["001.json#0"]);
        assert_eq!(summary.already_applied, ["001.json#1"]);
        assert_eq!(tracker.creates.get(), 1);
        assert_eq!(tracker.searches.get(), 1);
    }

    #[test]
    fn malformed_descriptor_is_isolated() {
        let queue = Queue::new();
        for (i, json) in [
            r#"{"action":"append","file":"log.md","content":"one"}"#,
            r#"{"action":"append","file":"log.md","content":"two"}"#,
            r#"{"action":"replace-section","file":"log.md","content":"x"}"#,
            r#"{"action":"append","file":"log.md","content":"four"}"#,
            r#"{"action":"append","file":"log.md","content":"five"}"#,
        ]
        .into_iter()
        .enumerate()
        {
            queue.enqueue(&format!("00{}.json", i + 1), json);
        }

        let summary = queue.run(None);

        assert_eq!(summary.processed.len(), 4);
        assert_eq!(summary.malformed, ["003.json#0"]);
        assert_eq!(queue.archived(Outcome::Processed).len(), 4);
        assert_eq!(queue.archived(Outcome::Malformed).len(), 1);
        assert!(queue.pending().is_empty());
        assert_eq!(queue.read("log.md"), "one\ntwo\nfour\nfive");
        assert_eq!(summary.files_updated, [PathBuf::from("log.md")]);
    }

    #[test]
    fn malformed_sidecar_carries_the_reason() {
        let queue = Queue::new();
        queue.enqueue("bad.json", "{ not json");

        let summary = queue.run(None);
        assert_eq!(summary.malformed.len(), 1);

        let records = Archive::open(queue.updates())
            .load_records(Outcome::Malformed)
            .unwrap();
        let reason = records[0].1.records[0].diagnostic.clone().unwrap();
        assert!(reason.starts_with("invalid JSON"), "{reason}");
    }

    #[test]
    fn later_descriptors_see_earlier_edits() {
        let queue = Queue::new();
        queue.enqueue(
            "001_add.json",
            r#"{"action":"task-add","file":"TODO.md","content":"- [ ] T-7 write docs"}"#,
        );
        queue.enqueue(
            "002_done.json",
            r#"{"action":"task-complete","file":"TODO.md","options":{"task_id":"T-7"}}"#,
        );

        queue.run(None);

        assert_eq!(queue.read("TODO.md"), "- [x] T-7 write docs\n");
    }

    #[test]
    fn completing_a_task_that_does_not_exist_yet_is_harmless() {
        let queue = Queue::new();
        queue.enqueue(
            "001_done.json",
            r#"{"action":"task-complete","file":"TODO.md","options":{"task_id":"T-7"}}"#,
        );
        queue.enqueue(
            "002_add.json",
            r#"{"action":"task-add","file":"TODO.md","content":"- [ ] T-7 write docs"}"#,
        );

        let summary = queue.run(None);

        assert_eq!(summary.processed.len(), 2);
        assert_eq!(queue.read("TODO.md"), "- [ ] T-7 write docs\n");
    }

    #[test]
    fn legacy_file_is_processed_once() {
        let queue = Queue::new();
        let tracker = FakeTracker::new();
        fs::write(
            queue.legacy(),
            r#"{"create":[{"guid":"L1","title":"From legacy"}],"comment":[]}"#,
        )
        .unwrap();

        let first = queue.run(Some(&tracker));
        assert_eq!(first.processed, ["issue_updates.json#0"]);
        assert!(queue.legacy().exists());

        let second = queue.run(Some(&tracker));
        assert_eq!(second.total(), 0);
        assert_eq!(tracker.creates.get(), 1);
        assert_eq!(tracker.searches.get(), 1);
    }

    #[test]
    fn legacy_file_with_nothing_applied_is_not_marked() {
        let queue = Queue::new();
        fs::write(queue.legacy(), r#"[{"action":"create","title":"t"}]"#).unwrap();

        let first = queue.run(None);
        assert_eq!(first.failed.len(), 1);

        let second = queue.run(None);
        assert_eq!(second.failed.len(), 1);
        assert!(!queue.updates().join("processed/issue_updates.json.sentinel").exists());
    }

    #[test]
    fn failures_do_not_stop_siblings_by_default() {
        let queue = Queue::new();
        queue.enqueue("001.json", r#"{"action":"comment","number":4,"body":"hi"}"#);
        queue.enqueue("002.json", r#"{"action":"append","file":"a.md","content":"x"}"#);

        let summary = queue.run(None);

        assert_eq!(summary.failed, ["001.json#0"]);
        assert_eq!(summary.processed, ["002.json#0"]);
        assert!(!summary.stopped);
        assert_eq!(queue.archived(Outcome::Failed).len(), 1);
    }

    #[test]
    fn stop_on_first_error_leaves_the_rest_pending() {
        let queue = Queue::new();
        queue.enqueue(
            "001.json",
            r#"[{"action":"comment","number":4,"body":"hi"},
                {"action":"append","file":"a.md","content":"x"}]"#,
        );
        queue.enqueue("002.json", r#"{"action":"append","file":"b.md","content":"y"}"#);

        let summary = queue.run_with(
            None,
            RunOptions {
                stop_on_first_error: true,
                dry_run: false,
            },
        );

        assert!(summary.stopped);
        assert_eq!(summary.failed, ["001.json#0", "001.json#1"]);
        assert_eq!(queue.pending(), ["002.json"]);
        assert!(!queue.root().join("a.md").exists());

        let records = Archive::open(queue.updates())
            .load_records(Outcome::Failed)
            .unwrap();
        assert_eq!(records[0].1.records[1].diagnostic.as_deref(), Some(NOT_ATTEMPTED));
    }

    #[test]
    fn file_takes_its_worst_outcome() {
        let queue = Queue::new();
        queue.enqueue(
            "mixed.json",
            r#"[{"action":"append","file":"a.md","content":"x"},{"action":"append"}]"#,
        );

        let summary = queue.run(None);

        assert_eq!(summary.processed.len(), 1);
        assert_eq!(summary.malformed.len(), 1);
        assert_eq!(queue.archived(Outcome::Malformed).len(), 1);
        assert!(queue.archived(Outcome::Processed).is_empty());
    }

    #[test]
    fn tracker_records_keep_the_issue_number() {
        let queue = Queue::new();
        let tracker = FakeTracker::new();
        let number = tracker.seed("bug", "", IssueState::Open);
        queue.enqueue(
            "c.json",
            &format!(r#"{{"action":"close","number":{number},"guid":"k"}}"#),
        );

        queue.run(Some(&tracker));

        let records = Archive::open(queue.updates())
            .load_records(Outcome::Processed)
            .unwrap();
        assert_eq!(records[0].1.records[0].resource_number, Some(number));
        assert_eq!(tracker.issue(number).unwrap().state, IssueState::Closed);
    }

    #[test]
    fn dry_run_changes_nothing() {
        let queue = Queue::new();
        let tracker = FakeTracker::new();
        queue.enqueue("001.json", r#"{"action":"append","file":"a.md","content":"x"}"#);
        queue.enqueue("002.json", CREATE);

        let summary = queue.run_with(
            Some(&tracker),
            RunOptions {
                stop_on_first_error: false,
                dry_run: true,
            },
        );

        assert!(summary.dry_run);
        assert_eq!(summary.processed.len(), 2);
        assert!(!queue.root().join("a.md").exists());
        assert_eq!(tracker.creates.get(), 0);
        assert_eq!(queue.pending(), ["001.json", "002.json"]);
        assert!(!queue.updates().join("processed").exists());
    }

    #[test]
    fn empty_queue_reports_zero() {
        let queue = Queue::new();
        assert_eq!(queue.run(None).total(), 0);
    }
}

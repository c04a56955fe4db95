//! Archival of processed descriptors.
//!
//! Each processing attempt ends with the source moved into one of three
//! subdirectories of the updates directory:
//!
//! ```text
//! <updates>/
//!   processed/   # applied (or already applied)
//!   malformed/   # failed validation or didn't parse
//!   failed/      # valid, but applying errored
//! ```
//!
//! The move is the commit point. A crash before it leaves the file in place
//! for the next run. Every archived file gets a `<name>.record.json` sidecar
//! holding an [`ArchiveRecord`] per descriptor; for malformed and failed
//! files the sidecar is the diagnostic.

pub mod lifecycle;
pub mod sentinel;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use jiff::Timestamp;
use tracing::{debug, info, warn};

use crate::model::{ArchiveRecord, Outcome, RecordFile};

/// Errors from archive operations.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to {operation} {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        source: io::Error,
    },

    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub type Result<T> = core::result::Result<T, ArchiveError>;

/// Sidecar suffix for record files.
const RECORD_SUFFIX: &str = ".record.json";

/// The archive directories under one updates directory.
pub struct Archive {
    root: PathBuf,
}

impl Archive {
    /// Opens the archive under `updates_dir`, creating the outcome directories.
    pub fn new(updates_dir: impl Into<PathBuf>) -> Result<Self> {
        let archive = Self::open(updates_dir);
        for outcome in [Outcome::Processed, Outcome::Malformed, Outcome::Failed] {
            let dir = archive.dir(outcome);
            fs::create_dir_all(&dir).map_err(|source| ArchiveError::Io {
                operation: "create",
                path: dir,
                source,
            })?;
        }
        Ok(archive)
    }

    /// Opens the archive without touching the filesystem.
    pub fn open(updates_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: updates_dir.into(),
        }
    }

    pub fn dir(&self, outcome: Outcome) -> PathBuf {
        self.root.join(outcome.dir_name())
    }

    /// Where the legacy file's sentinel lives.
    pub fn sentinel_path(&self, legacy: &Path) -> PathBuf {
        sentinel::path_for(&self.dir(Outcome::Processed), legacy)
    }

    /// Mark the legacy file processed as of content `digest`.
    pub fn mark_legacy(&self, legacy: &Path, digest: &str) -> Result<()> {
        sentinel::mark(&self.sentinel_path(legacy), legacy, digest)
    }

    /// Move a directory-channel file into the archive under the worst outcome
    /// of its records, and write its sidecar. Returns where the file went.
    ///
    /// The sidecar is written first. If either step fails the source stays
    /// where it was and no sidecar is left behind.
    pub fn archive_file(&self, source: &Path, records: Vec<ArchiveRecord>) -> Result<PathBuf> {
        let outcome = worst(&records);
        let name = file_name(source);
        let dir = self.dir(outcome);
        let stem = unique_stem(&dir, &stamp(), &name);
        let dest = dir.join(format!("{stem}{}", extension(&name)));
        let record_path = dir.join(format!("{stem}{RECORD_SUFFIX}"));

        let record = RecordFile {
            outcome,
            archived_at: Timestamp::now(),
            source: name,
            archived_as: Some(file_name(&dest)),
            records,
        };
        self.save_record(&record_path, &record)?;

        if let Err(e) = fs::rename(source, &dest) {
            if let Err(cleanup) = fs::remove_file(&record_path) {
                warn!(file = %record_path.display(), error = %cleanup, "could not remove sidecar");
            }
            return Err(ArchiveError::Io {
                operation: "archive",
                path: source.to_path_buf(),
                source: e,
            });
        }

        info!(file = %dest.display(), outcome = outcome.dir_name(), "archived");
        Ok(dest)
    }

    /// Archive the legacy file's descriptors without moving the file.
    ///
    /// Records are grouped by outcome, one sidecar per group. Malformed and
    /// failed groups also get a copy of their descriptors for manual retry.
    pub fn archive_legacy(&self, legacy: &Path, records: Vec<ArchiveRecord>) -> Result<Vec<PathBuf>> {
        let name = file_name(legacy);
        let prefix = stamp();

        let mut groups: BTreeMap<Outcome, Vec<ArchiveRecord>> = BTreeMap::new();
        for record in records {
            groups.entry(record.outcome).or_default().push(record);
        }

        let mut written = Vec::new();
        for (outcome, records) in groups {
            let dir = self.dir(outcome);
            let stem = unique_stem(&dir, &prefix, &name);

            let archived_as = if outcome == Outcome::Processed {
                None
            } else {
                let copy = dir.join(format!("{stem}.json"));
                let descriptors: Vec<_> =
                    records.iter().filter_map(|r| r.descriptor.as_ref()).collect();
                write_json(&copy, &descriptors)?;
                written.push(copy.clone());
                Some(file_name(&copy))
            };

            let record_path = dir.join(format!("{stem}{RECORD_SUFFIX}"));
            self.save_record(
                &record_path,
                &RecordFile {
                    outcome,
                    archived_at: Timestamp::now(),
                    source: name.clone(),
                    archived_as,
                    records,
                },
            )?;
            info!(
                file = %record_path.display(),
                outcome = outcome.dir_name(),
                "archived legacy descriptors"
            );
            written.push(record_path);
        }
        Ok(written)
    }

    /// Record files under one outcome directory, sorted by name.
    pub fn load_records(&self, outcome: Outcome) -> Result<Vec<(PathBuf, RecordFile)>> {
        let dir = self.dir(outcome);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ArchiveError::Io {
                    operation: "read",
                    path: dir,
                    source,
                });
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && file_name(p).ends_with(RECORD_SUFFIX))
            .collect();
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let json = fs::read_to_string(&path).map_err(|source| ArchiveError::Io {
                operation: "read",
                path: path.clone(),
                source,
            })?;
            let record = serde_json::from_str(&json).map_err(|source| ArchiveError::Json {
                path: path.clone(),
                source,
            })?;
            records.push((path, record));
        }
        Ok(records)
    }

    /// Overwrite a record file in place.
    pub fn save_record(&self, path: &Path, record: &RecordFile) -> Result<()> {
        write_json(path, record)?;
        debug!(file = %path.display(), "wrote record");
        Ok(())
    }
}

/// Worst outcome among `records`. A file with no records is malformed.
fn worst(records: &[ArchiveRecord]) -> Outcome {
    records
        .iter()
        .map(|r| r.outcome)
        .max()
        .unwrap_or(Outcome::Malformed)
}

/// Archive name prefix for this moment.
fn stamp() -> String {
    Timestamp::now().strftime("%Y%m%d_%H%M%S").to_string()
}

/// `<prefix>_<stem>`, with `-N` appended until nothing in `dir` uses it.
fn unique_stem(dir: &Path, prefix: &str, name: &str) -> String {
    let stem = name.strip_suffix(extension(name)).unwrap_or(name);
    let base = format!("{prefix}_{stem}");
    let taken = |candidate: &str| {
        dir.join(format!("{candidate}{}", extension(name))).exists()
            || dir.join(format!("{candidate}.json")).exists()
            || dir.join(format!("{candidate}{RECORD_SUFFIX}")).exists()
    };
    if !taken(&base) {
        return base;
    }
    let mut n = 1;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// The extension of `name` including the dot, or `""`.
fn extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => "",
        Some(i) => &name[i..],
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

fn write_json(path: &Path, value: &impl serde::Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|source| ArchiveError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| ArchiveError::Io {
        operation: "write",
        path: path.to_path_buf(),
        source,
    })
}

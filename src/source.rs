//! Source loading: legacy aggregate file plus the updates directory.
//!
//! Output order is fixed: legacy descriptors first, grouped by action in
//! the legacy order, then directory files sorted by name, each in array
//! order. A file that fails to parse becomes a unit with an error instead
//! of aborting the load.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::archive::sentinel;
use crate::model::{Action, Channel, Provenance, UpdateDescriptor};

/// Errors that stop loading altogether.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to read updates directory {}: {source}", path.display())]
    ReadDir { path: PathBuf, source: io::Error },
}

/// One descriptor slot from a source file.
#[derive(Debug, Clone)]
pub struct Entry {
    pub provenance: Provenance,
    /// The descriptor, or why this element couldn't be read as one.
    pub descriptor: Result<UpdateDescriptor, String>,
}

/// One source file and what it held.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub path: PathBuf,
    pub channel: Channel,
    pub entries: Vec<Entry>,
    /// Set when the file as a whole couldn't be read or parsed.
    pub error: Option<String>,
    /// Content digest, recorded for the legacy file's sentinel.
    pub digest: Option<String>,
}

impl SourceUnit {
    fn failed(path: &Path, channel: Channel, error: String) -> Self {
        Self {
            path: path.to_path_buf(),
            channel,
            entries: Vec::new(),
            error: Some(error),
            digest: None,
        }
    }
}

/// Reads descriptors from both input channels.
pub struct Loader {
    updates_dir: PathBuf,
    legacy: Option<PathBuf>,
    sentinel_dir: PathBuf,
}

impl Loader {
    /// `sentinel_dir` is where the legacy sentinel lives (the processed archive).
    pub fn new(
        updates_dir: impl Into<PathBuf>,
        legacy: Option<PathBuf>,
        sentinel_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            updates_dir: updates_dir.into(),
            legacy,
            sentinel_dir: sentinel_dir.into(),
        }
    }

    /// Load every pending source unit in processing order.
    pub fn load(&self) -> Result<Vec<SourceUnit>, SourceError> {
        let mut units = Vec::new();
        if let Some(legacy) = &self.legacy
            && let Some(unit) = self.load_legacy(legacy)
        {
            units.push(unit);
        }
        for path in self.directory_files()? {
            units.push(load_file(&path));
        }
        let entries: usize = units.iter().map(|u| u.entries.len()).sum();
        info!(units = units.len(), entries, "loaded sources");
        Ok(units)
    }

    fn load_legacy(&self, path: &Path) -> Option<SourceUnit> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(file = %path.display(), "no legacy file");
                return None;
            }
            Err(e) => {
                let error = format!("failed to read: {e}");
                return Some(SourceUnit::failed(path, Channel::Legacy, error));
            }
        };

        let digest = sentinel::digest(&bytes);
        if sentinel::is_current(&sentinel::path_for(&self.sentinel_dir, path), &digest) {
            debug!(file = %path.display(), "legacy file already processed");
            return None;
        }

        let mut unit = match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) if is_grouped(&map) => SourceUnit {
                path: path.to_path_buf(),
                channel: Channel::Legacy,
                entries: grouped_entries(path, map),
                error: None,
                digest: None,
            },
            Ok(value) => unit_from_value(path, Channel::Legacy, value),
            Err(e) => SourceUnit::failed(path, Channel::Legacy, format!("invalid JSON: {e}")),
        };
        unit.digest = Some(digest);
        Some(unit)
    }

    /// Top-level `*.json` files in the updates directory, sorted by name.
    ///
    /// Subdirectories (the archive) and hidden files are skipped, as is the
    /// legacy file when it lives in the same directory.
    fn directory_files(&self) -> Result<Vec<PathBuf>, SourceError> {
        let entries = match fs::read_dir(&self.updates_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(dir = %self.updates_dir.display(), "no updates directory");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(SourceError::ReadDir {
                    path: self.updates_dir.clone(),
                    source,
                });
            }
        };

        let legacy = self.legacy.as_deref().and_then(|p| fs::canonicalize(p).ok());
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| !n.starts_with('.') && n.ends_with(".json"))
            })
            .filter(|p| legacy.is_none() || fs::canonicalize(p).ok() != legacy)
            .collect();
        files.sort_by_key(|p| p.file_name().map(ToOwned::to_owned));
        Ok(files)
    }
}

/// Read one directory-channel file.
fn load_file(path: &Path) -> SourceUnit {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(file = %path.display(), error = %e, "unreadable update file");
            return SourceUnit::failed(path, Channel::Directory, format!("failed to read: {e}"));
        }
    };
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => unit_from_value(path, Channel::Directory, value),
        Err(e) => {
            warn!(file = %path.display(), error = %e, "invalid JSON in update file");
            SourceUnit::failed(path, Channel::Directory, format!("invalid JSON: {e}"))
        }
    }
}

/// A single object or an array of objects.
fn unit_from_value(path: &Path, channel: Channel, value: Value) -> SourceUnit {
    let items = match value {
        Value::Array(items) if items.is_empty() => {
            return SourceUnit::failed(path, channel, "no descriptors in file".into());
        }
        Value::Array(items) => items,
        Value::Object(_) => vec![value],
        other => {
            return SourceUnit::failed(
                path,
                channel,
                format!("expected an object or array, found {}", kind(&other)),
            );
        }
    };
    let entries = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| Entry {
            provenance: provenance(path, channel, index),
            descriptor: descriptor(item, None),
        })
        .collect();
    SourceUnit {
        path: path.to_path_buf(),
        channel,
        entries,
        error: None,
        digest: None,
    }
}

/// Whether a legacy object is grouped by action (`{"create": [...], ...}`)
/// rather than a single descriptor.
fn is_grouped(map: &Map<String, Value>) -> bool {
    !map.contains_key("action")
        && !map.contains_key("mode")
        && map.values().any(Value::is_array)
}

/// Flatten a grouped legacy object in action order. Array-valued keys that
/// name no action become malformed entries rather than vanishing.
fn grouped_entries(path: &Path, mut map: Map<String, Value>) -> Vec<Entry> {
    let mut items: Vec<(Value, Option<&str>)> = Vec::new();
    for action in Action::ALL {
        let key = map
            .keys()
            .find(|k| k.parse::<Action>().ok() == Some(action))
            .cloned();
        let Some(value) = key.and_then(|k| map.remove(&k)) else {
            continue;
        };
        match value {
            Value::Array(group) => {
                items.extend(group.into_iter().map(|v| (v, Some(action.as_str()))));
            }
            other => items.push((other, Some(action.as_str()))),
        }
    }

    let mut unknown: Vec<(String, Value)> =
        map.into_iter().filter(|(_, v)| v.is_array()).collect();
    unknown.sort_by(|a, b| a.0.cmp(&b.0));

    let mut entries: Vec<Entry> = items
        .into_iter()
        .enumerate()
        .map(|(index, (item, action))| Entry {
            provenance: provenance(path, Channel::Legacy, index),
            descriptor: descriptor(item, action),
        })
        .collect();

    for (key, value) in unknown {
        let Value::Array(group) = value else { continue };
        for _ in group {
            let index = entries.len();
            entries.push(Entry {
                provenance: provenance(path, Channel::Legacy, index),
                descriptor: Err(format!("unknown action group: {key}")),
            });
        }
    }
    entries
}

/// Parse one element, filling in the action from its legacy group.
fn descriptor(item: Value, group: Option<&str>) -> Result<UpdateDescriptor, String> {
    let Value::Object(_) = &item else {
        return Err(format!("expected a descriptor object, found {}", kind(&item)));
    };
    let mut descriptor: UpdateDescriptor =
        serde_json::from_value(item).map_err(|e| format!("invalid descriptor: {e}"))?;
    if descriptor.action.is_none() {
        descriptor.action = group.map(str::to_string);
    }
    Ok(descriptor)
}

fn provenance(path: &Path, channel: Channel, index: usize) -> Provenance {
    Provenance {
        channel,
        source: path.to_path_buf(),
        index,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        updates: PathBuf,
        legacy: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let updates = dir.path().join("updates");
            fs::create_dir_all(updates.join("processed")).unwrap();
            let legacy = dir.path().join("issue_updates.json");
            Self {
                _dir: dir,
                updates,
                legacy,
            }
        }

        fn loader(&self) -> Loader {
            Loader::new(
                &self.updates,
                Some(self.legacy.clone()),
                self.updates.join("processed"),
            )
        }

        fn write(&self, name: &str, json: &str) {
            fs::write(self.updates.join(name), json).unwrap();
        }
    }

    fn actions(unit: &SourceUnit) -> Vec<String> {
        unit.entries
            .iter()
            .map(|e| match &e.descriptor {
                Ok(d) => d.action.clone().unwrap_or_default(),
                Err(reason) => format!("!{reason}"),
            })
            .collect()
    }

    #[test]
    fn missing_directory_and_legacy_file_load_nothing() {
        let dir = TempDir::new().unwrap();
        let loader = Loader::new(
            dir.path().join("nope"),
            Some(dir.path().join("none.json")),
            dir.path().join("nope/processed"),
        );
        assert!(loader.load().unwrap().is_empty());
    }

    #[test]
    fn directory_files_are_sorted_and_archive_is_skipped() {
        let fx = Fixture::new();
        fx.write("b.json", r#"{"action":"append"}"#);
        fx.write("a.json", r#"[{"action":"prepend"},{"action":"replace"}]"#);
        fx.write(".hidden.json", r#"{"action":"append"}"#);
        fx.write("notes.txt", "not a descriptor");
        fs::write(fx.updates.join("processed/old.json"), "{}").unwrap();

        let units = fx.loader().load().unwrap();

        let names: Vec<_> = units
            .iter()
            .map(|u| u.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.json", "b.json"]);
        assert_eq!(actions(&units[0]), ["prepend", "replace"]);
        assert_eq!(units[0].entries[1].provenance.index, 1);
        assert_eq!(units[0].channel, Channel::Directory);
    }

    #[test]
    fn bad_file_does_not_abort_the_load() {
        let fx = Fixture::new();
        fx.write("a.json", "{ nope");
        fx.write("b.json", "42");
        fx.write("c.json", "[]");
        fx.write("d.json", r#"[{"action":"append"}, "stray"]"#);

        let units = fx.loader().load().unwrap();

        assert_eq!(units.len(), 4);
        assert!(units[0].error.as_deref().unwrap().starts_with("invalid JSON"));
        assert_eq!(
            units[1].error.as_deref(),
            Some("expected an object or array, found a number")
        );
        assert_eq!(units[2].error.as_deref(), Some("no descriptors in file"));
        assert_eq!(
            actions(&units[3]),
            ["append", "!expected a descriptor object, found a string"]
        );
    }

    #[test]
    fn grouped_legacy_file_loads_first_in_group_order() {
        let fx = Fixture::new();
        fs::write(
            &fx.legacy,
            r#"{
                "delete": [{"number": 9}],
                "comment": [{"number": 1, "body": "hi"}],
                "create": [{"title": "a"}, {"title": "b"}],
                "frobnicate": [{"x": 1}],
                "version": 2
            }"#,
        )
        .unwrap();
        fx.write("a.json", r#"{"action":"append"}"#);

        let units = fx.loader().load().unwrap();

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].channel, Channel::Legacy);
        assert_eq!(
            actions(&units[0]),
            [
                "create",
                "create",
                "comment",
                "delete",
                "!unknown action group: frobnicate"
            ]
        );
        let indexes: Vec<_> = units[0].entries.iter().map(|e| e.provenance.index).collect();
        assert_eq!(indexes, [0, 1, 2, 3, 4]);
        assert!(units[0].digest.is_some());
    }

    #[test]
    fn flat_legacy_array_is_accepted() {
        let fx = Fixture::new();
        fs::write(&fx.legacy, r#"[{"action":"create","title":"x"}]"#).unwrap();

        let units = fx.loader().load().unwrap();

        assert_eq!(actions(&units[0]), ["create"]);
    }

    #[test]
    fn marked_legacy_file_is_skipped_until_it_changes() {
        let fx = Fixture::new();
        fs::write(&fx.legacy, r#"{"create":[{"title":"x"}]}"#).unwrap();
        let digest = sentinel::digest(&fs::read(&fx.legacy).unwrap());
        let sentinel_path = sentinel::path_for(&fx.updates.join("processed"), &fx.legacy);
        sentinel::mark(&sentinel_path, &fx.legacy, &digest).unwrap();

        assert!(fx.loader().load().unwrap().is_empty());

        fs::write(&fx.legacy, r#"{"create":[{"title":"x"},{"title":"y"}]}"#).unwrap();
        let units = fx.loader().load().unwrap();
        assert_eq!(units[0].entries.len(), 2);
    }

    #[test]
    fn legacy_file_inside_updates_dir_is_not_loaded_twice() {
        let fx = Fixture::new();
        let legacy = fx.updates.join("issue_updates.json");
        fs::write(&legacy, r#"[{"action":"create","title":"x"}]"#).unwrap();
        let loader = Loader::new(&fx.updates, Some(legacy), fx.updates.join("processed"));

        let units = loader.load().unwrap();

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].channel, Channel::Legacy);
    }
}

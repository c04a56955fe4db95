//! Writing new descriptor files into the queue.

use std::fs;
use std::path::{Path, PathBuf};

use jiff::Timestamp;
use serde_json::Value;
use uuid::Uuid;

use crate::model::{Options, UpdateDescriptor};
use crate::validate::validate;

/// Descriptor fields collected from the command line.
#[derive(Debug, Clone, Default)]
pub(super) struct Draft {
    pub action: String,
    pub guid: Option<String>,
    pub file: Option<PathBuf>,
    pub number: Option<u64>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub labels: Vec<String>,
    pub state_reason: Option<String>,
    /// `key=value` pairs.
    pub options: Vec<String>,
}

impl Draft {
    /// Build the descriptor, generating a GUID when none was given.
    pub(super) fn into_descriptor(self) -> Result<UpdateDescriptor, String> {
        Ok(UpdateDescriptor {
            action: Some(self.action),
            guid: Some(self.guid.unwrap_or_else(|| Uuid::new_v4().to_string())),
            file: self.file,
            number: self.number,
            payload: self.content,
            title: self.title,
            labels: (!self.labels.is_empty()).then_some(self.labels),
            state_reason: self.state_reason,
            options: parse_options(&self.options)?,
            ..UpdateDescriptor::default()
        })
    }
}

/// Validate `descriptor` and write it as `<stamp>_<action>_<guid8>.json`.
pub(super) fn enqueue(updates_dir: &Path, descriptor: &UpdateDescriptor) -> Result<PathBuf, String> {
    let validated = validate(descriptor).map_err(|e| format!("invalid descriptor: {e}"))?;

    fs::create_dir_all(updates_dir)
        .map_err(|e| format!("failed to create {}: {e}", updates_dir.display()))?;

    let short: String = validated
        .guid
        .as_deref()
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(8)
        .collect();
    let stamp = Timestamp::now().strftime("%Y%m%d_%H%M%S");
    let path = updates_dir.join(format!("{stamp}_{}_{short}.json", validated.action));
    if path.exists() {
        return Err(format!("{} already exists", path.display()));
    }

    let json = serde_json::to_string_pretty(descriptor)
        .map_err(|e| format!("failed to serialize descriptor: {e}"))?;
    fs::write(&path, json + "\n").map_err(|e| format!("failed to write {}: {e}", path.display()))?;
    Ok(path)
}

fn parse_options(pairs: &[String]) -> Result<Options, String> {
    let mut options = Options::default();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("invalid option {pair:?}: expected key=value"))?;
        let value = value.to_string();
        match key.trim() {
            "section" => options.section = Some(value),
            "after" => options.after = Some(value),
            "before" => options.before = Some(value),
            "task_id" | "task-id" => options.task_id = Some(value),
            "badge_name" | "badge-name" => options.badge_name = Some(value),
            "" => return Err(format!("invalid option {pair:?}: empty key")),
            other => {
                options.extra.insert(other.to_string(), Value::String(value));
            }
        }
    }
    Ok(options)
}

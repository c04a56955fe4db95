//! The legacy file's "already processed" sentinel.
//!
//! Lives at `processed/<legacy name>.sentinel` and records the SHA-256 of
//! the legacy file as it was when marked. A file whose content has changed
//! since is loaded again.

use std::fs;
use std::path::{Path, PathBuf};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{ArchiveError, Result};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sentinel {
    source: String,
    sha256: String,
    marked_at: Timestamp,
}

/// Hex SHA-256 of `bytes`.
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Where the sentinel for `legacy` lives under `processed_dir`.
pub fn path_for(processed_dir: &Path, legacy: &Path) -> PathBuf {
    let name = legacy
        .file_name()
        .map_or_else(|| "legacy".into(), |n| n.to_string_lossy().into_owned());
    processed_dir.join(format!("{name}.sentinel"))
}

/// Whether the sentinel at `path` was written for content with `digest`.
///
/// A missing or unreadable sentinel counts as not current.
pub fn is_current(path: &Path, digest: &str) -> bool {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(_) => return false,
    };
    match serde_json::from_str::<Sentinel>(&json) {
        Ok(sentinel) if sentinel.sha256 == digest => true,
        Ok(_) => {
            debug!(sentinel = %path.display(), "legacy file changed since it was marked");
            false
        }
        Err(e) => {
            warn!(sentinel = %path.display(), error = %e, "ignoring unreadable sentinel");
            false
        }
    }
}

/// Write the sentinel for `legacy` with content `digest`.
pub fn mark(path: &Path, legacy: &Path, digest: &str) -> Result<()> {
    let sentinel = Sentinel {
        source: legacy.display().to_string(),
        sha256: digest.to_string(),
        marked_at: Timestamp::now(),
    };
    let json = serde_json::to_string_pretty(&sentinel).map_err(|source| ArchiveError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| ArchiveError::Io {
        operation: "write sentinel",
        path: path.to_path_buf(),
        source,
    })?;
    debug!(sentinel = %path.display(), "marked legacy file processed");
    Ok(())
}

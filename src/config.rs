//! Docket configuration.
//!
//! Every setting resolves through the same chain, first hit wins:
//!
//! 1. command-line flag
//! 2. environment variable
//! 3. config file: `--config <path>`, else `./docket.toml`, else
//!    `<config dir>/docket/config.toml`
//! 4. built-in default
//!
//! The API token is only ever read from the environment.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::tracker::{DEFAULT_API_URL, GitHub};

const DEFAULT_UPDATES_DIR: &str = ".github/issue-updates";
const DEFAULT_LEGACY_FILE: &str = "issue_updates.json";
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Config file contents. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct FileConfig {
    updates_dir: Option<PathBuf>,
    legacy_file: Option<PathBuf>,
    repo: Option<String>,
    api_url: Option<String>,
    max_retries: Option<u32>,
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub updates_dir: Option<PathBuf>,
    pub legacy_file: Option<PathBuf>,
    pub repo: Option<String>,
    pub step_summary: Option<PathBuf>,
}

/// Resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding per-descriptor files and the archive.
    pub updates_dir: PathBuf,
    /// The legacy aggregate file.
    pub legacy_file: PathBuf,
    /// `owner/name`.
    pub repo: Option<String>,
    pub api_url: String,
    pub token: Option<String>,
    /// Transport-level retries for tracker calls.
    pub max_retries: u32,
    /// File the Markdown run summary is appended to.
    pub step_summary: Option<PathBuf>,
}

impl Config {
    /// Resolve configuration from the process environment and config file.
    pub fn load(config_path: Option<&Path>, overrides: &Overrides) -> Result<Self, String> {
        let file = read_file_config(config_path)?;
        Self::resolve(|key| env::var(key).ok(), file, overrides)
    }

    fn resolve(
        env: impl Fn(&str) -> Option<String>,
        file: FileConfig,
        overrides: &Overrides,
    ) -> Result<Self, String> {
        let var = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| env(*key).filter(|v| !v.trim().is_empty()))
        };

        let max_retries = match var(&["DOCKET_MAX_RETRIES"]) {
            Some(v) => v
                .trim()
                .parse()
                .map_err(|e| format!("invalid DOCKET_MAX_RETRIES {v:?}: {e}"))?,
            None => file.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        };

        Ok(Self {
            updates_dir: overrides
                .updates_dir
                .clone()
                .or_else(|| var(&["DOCKET_UPDATES_DIR"]).map(PathBuf::from))
                .or(file.updates_dir)
                .unwrap_or_else(|| DEFAULT_UPDATES_DIR.into()),
            legacy_file: overrides
                .legacy_file
                .clone()
                .or_else(|| var(&["DOCKET_LEGACY_FILE"]).map(PathBuf::from))
                .or(file.legacy_file)
                .unwrap_or_else(|| DEFAULT_LEGACY_FILE.into()),
            repo: overrides
                .repo
                .clone()
                .or_else(|| var(&["REPO", "GITHUB_REPOSITORY"]))
                .or(file.repo),
            api_url: var(&["GITHUB_API_URL"])
                .or(file.api_url)
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            token: var(&["GH_TOKEN", "GITHUB_TOKEN"]),
            max_retries,
            step_summary: overrides
                .step_summary
                .clone()
                .or_else(|| var(&["GITHUB_STEP_SUMMARY"]).map(PathBuf::from)),
        })
    }

    /// The GitHub client, when both a token and a repository are set.
    pub fn tracker(&self) -> Option<GitHub> {
        let token = self.token.as_deref()?;
        let repo = self.repo.as_deref()?;
        Some(GitHub::new(&self.api_url, repo, token, self.max_retries))
    }

    /// The per-user config file: `<config dir>/docket/config.toml`.
    pub fn user_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("docket").join("config.toml"))
    }
}

/// Read the config file, if any. An explicit path must exist.
fn read_file_config(explicit: Option<&Path>) -> Result<FileConfig, String> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let local = PathBuf::from("docket.toml");
            match Config::user_path() {
                _ if local.is_file() => local,
                Some(user) if user.is_file() => user,
                _ => return Ok(FileConfig::default()),
            }
        }
    };

    let contents = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(format!("config file not found: {}", path.display()));
        }
        Err(e) => return Err(format!("failed to read {}: {e}", path.display())),
    };

    toml::from_str(&contents).map_err(|e| format!("invalid config at {}: {e}", path.display()))
}

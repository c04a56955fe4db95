//! CLI interface for docket.
//!
//! Every subcommand is non-interactive and safe to run in CI:
//!
//! - `docket run` drains the update queue once.
//! - `docket backfill` adds permalinks to already-archived records.
//! - `docket enqueue` writes a new descriptor file into the queue.
//!
//! Settings resolve flag → environment → config file → default; see
//! [`crate::config`].

mod enqueue;
mod format;

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::warn;

use crate::archive::Archive;
use crate::backfill::backfill;
use crate::config::{Config, Overrides};
use crate::patch::Engine;
use crate::queue::{Processor, RunOptions};
use crate::tracker::Tracker;

use enqueue::{Draft, enqueue};
use format::{format_backfill, format_markdown, format_summary};

/// Docket: apply queued repository updates exactly once.
#[derive(Debug, Parser)]
#[command(name = "docket", version, after_long_help = WORKFLOW_HELP)]
pub struct Cli {
    /// Config file (default: `./docket.toml`, then the user config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless `DOCKET_LOG` or `RUST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Directory holding queued descriptor files.
    #[arg(long, global = true)]
    updates_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

const WORKFLOW_HELP: &str = r#"Workflow:
  1. docket enqueue comment --number 42 --content "Deployed to staging"
     → writes .github/issue-updates/<stamp>_comment_<guid>.json
  2. docket run
     → applies every queued descriptor once, archives each file under
       processed/, failed/ or malformed/
  3. docket backfill
     → adds issue links to processed records

Environment:
  GH_TOKEN / GITHUB_TOKEN     API token for issue actions
  REPO / GITHUB_REPOSITORY    owner/name
  GITHUB_STEP_SUMMARY         Markdown summary is appended here
  DOCKET_LOG / RUST_LOG       log filter (default: info)"#;

#[derive(Debug, Subcommand)]
enum Command {
    /// Process the queue once.
    ///
    /// Exits non-zero when the run was stopped early or the queue was empty.
    Run {
        /// Legacy aggregate file (default: `issue_updates.json`).
        #[arg(long)]
        legacy_file: Option<PathBuf>,

        /// Skip the legacy aggregate file entirely.
        #[arg(long, conflicts_with = "legacy_file")]
        no_legacy: bool,

        /// Repository as `owner/name`.
        #[arg(long)]
        repo: Option<String>,

        /// Stop at the first descriptor that fails to apply.
        #[arg(long)]
        stop_on_first_error: bool,

        /// Report what would happen without writing or archiving anything.
        #[arg(long)]
        dry_run: bool,

        /// Append the Markdown summary to this file.
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Fill in issue links on archived records that lack them.
    Backfill {
        /// Repository as `owner/name`.
        #[arg(long)]
        repo: Option<String>,
    },

    /// Write a new descriptor file into the queue.
    ///
    /// The descriptor is validated first; nothing is written if it's malformed.
    Enqueue {
        /// Action name (e.g. `append`, `comment`, `close`).
        action: String,

        /// Idempotency token. A random UUID when omitted.
        #[arg(long)]
        guid: Option<String>,

        /// Target file for file actions.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Issue number for issue actions.
        #[arg(long)]
        number: Option<u64>,

        #[arg(long)]
        title: Option<String>,

        /// Content: appended text, comment body, new issue body.
        #[arg(long)]
        content: Option<String>,

        /// Label for new issues. Repeatable.
        #[arg(long = "label")]
        labels: Vec<String>,

        /// Close reason: `completed` or `not_planned`.
        #[arg(long)]
        state_reason: Option<String>,

        /// Action option as `key=value` (e.g. `section=Status`). Repeatable.
        #[arg(long = "option")]
        options: Vec<String>,
    },
}

/// Execute the parsed command line.
pub fn run(cli: Cli) -> Result<ExitCode, String> {
    let mut overrides = Overrides {
        updates_dir: cli.updates_dir,
        ..Overrides::default()
    };

    match cli.command {
        Command::Run {
            legacy_file,
            no_legacy,
            repo,
            stop_on_first_error,
            dry_run,
            summary,
        } => {
            overrides.legacy_file = legacy_file;
            overrides.repo = repo;
            overrides.step_summary = summary;
            let config = Config::load(cli.config.as_deref(), &overrides)?;
            let options = RunOptions {
                stop_on_first_error,
                dry_run,
            };
            cmd_run(&config, !no_legacy, options)
        }
        Command::Backfill { repo } => {
            overrides.repo = repo;
            let config = Config::load(cli.config.as_deref(), &overrides)?;
            cmd_backfill(&config)
        }
        Command::Enqueue {
            action,
            guid,
            file,
            number,
            title,
            content,
            labels,
            state_reason,
            options,
        } => {
            let config = Config::load(cli.config.as_deref(), &overrides)?;
            let draft = Draft {
                action,
                guid,
                file,
                number,
                title,
                content,
                labels,
                state_reason,
                options,
            };
            cmd_enqueue(&config, draft)
        }
    }
}

fn cmd_run(config: &Config, with_legacy: bool, options: RunOptions) -> Result<ExitCode, String> {
    let github = config.tracker();
    let tracker = github.as_ref().map(|t| t as &dyn Tracker);
    if tracker.is_none() {
        warn!("no token or repository configured; issue actions will fail");
    }

    let engine = Engine::new(".", tracker);
    let legacy = with_legacy.then(|| config.legacy_file.clone());
    let processor = Processor::new(&config.updates_dir, legacy, engine, options)
        .map_err(|e| format!("failed to prepare {}: {e}", config.updates_dir.display()))?;
    let summary = processor
        .run()
        .map_err(|e| format!("failed to process queue: {e}"))?;

    print!("{}", format_summary(&summary));

    if let Some(path) = &config.step_summary {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| format!("failed to open {}: {e}", path.display()))?;
        writeln!(file, "{}", format_markdown(&summary))
            .map_err(|e| format!("failed to write {}: {e}", path.display()))?;
    }

    if summary.stopped || summary.total() == 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn cmd_backfill(config: &Config) -> Result<ExitCode, String> {
    let tracker = config
        .tracker()
        .ok_or("backfill needs a token (GH_TOKEN) and a repository (REPO)")?;
    let archive = Archive::open(&config.updates_dir);

    let report = backfill(&archive, &tracker).map_err(|e| format!("backfill failed: {e}"))?;

    println!("{}", format_backfill(&report));
    Ok(ExitCode::SUCCESS)
}

fn cmd_enqueue(config: &Config, draft: Draft) -> Result<ExitCode, String> {
    let descriptor = draft.into_descriptor()?;
    let path = enqueue(&config.updates_dir, &descriptor)?;
    println!("{}", path.display());
    Ok(ExitCode::SUCCESS)
}

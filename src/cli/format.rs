//! Output formatting for CLI display.

use std::fmt::Write as _;

use crate::backfill::BackfillReport;
use crate::queue::RunSummary;

/// Plain-text run summary for stdout.
pub(super) fn format_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let title = if summary.dry_run {
        "Update queue (dry run)"
    } else {
        "Update queue"
    };
    let _ = writeln!(out, "{title}");
    if summary.total() == 0 {
        out.push_str("  no descriptors found\n");
        return out;
    }

    for (label, names) in categories(summary) {
        let _ = writeln!(out, "  {:<16} {}", format!("{label}:"), names.len());
    }
    for (label, names) in categories(summary) {
        if names.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n{label}:");
        for name in names {
            let _ = writeln!(out, "  {name}");
        }
    }
    if !summary.files_updated.is_empty() {
        out.push_str("\nFiles updated:\n");
        for path in &summary.files_updated {
            let _ = writeln!(out, "  {}", path.display());
        }
    }
    if !summary.unarchived.is_empty() {
        out.push_str("\nNot archived (left in queue):\n");
        for name in &summary.unarchived {
            let _ = writeln!(out, "  {name}");
        }
    }
    if summary.stopped {
        out.push_str("\nStopped after the first error; remaining files were left in the queue.\n");
    }
    out
}

/// Markdown run summary for CI step summaries.
pub(super) fn format_markdown(summary: &RunSummary) -> String {
    let mut out = String::from("## Update queue");
    if summary.dry_run {
        out.push_str(" (dry run)");
    }
    out.push_str("\n\n");
    if summary.total() == 0 {
        out.push_str("No descriptors found.\n");
        return out;
    }

    out.push_str("| Outcome | Count |\n|---|---|\n");
    for (label, names) in categories(summary) {
        let _ = writeln!(out, "| {label} | {} |", names.len());
    }
    for (label, names) in categories(summary) {
        if names.is_empty() || label == "Processed" {
            continue;
        }
        let _ = writeln!(out, "\n### {label}\n");
        for name in names {
            let _ = writeln!(out, "- `{name}`");
        }
    }
    if !summary.files_updated.is_empty() {
        out.push_str("\n### Files updated\n\n");
        for path in &summary.files_updated {
            let _ = writeln!(out, "- `{}`", path.display());
        }
    }
    if summary.stopped {
        out.push_str("\n> Stopped after the first error.\n");
    }
    out
}

pub(super) fn format_backfill(report: &BackfillReport) -> String {
    format!(
        "Backfill: {} resolved, {} already resolved, {} unresolved ({} record files updated)",
        report.resolved, report.already_resolved, report.unresolved, report.files_updated
    )
}

fn categories(summary: &RunSummary) -> [(&'static str, &[String]); 4] {
    [
        ("Processed", &summary.processed),
        ("Already applied", &summary.already_applied),
        ("Malformed", &summary.malformed),
        ("Failed", &summary.failed),
    ]
}

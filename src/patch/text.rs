//! File-target strategies: pure text transforms.
//!
//! Every function here is total. Missing anchors, sections, or tasks fall
//! back to a defined behavior instead of failing.

use std::sync::LazyLock;

use regex::Regex;

use super::FileEdit;

/// An ATX heading: `## Title`, with optional closing hashes.
///
/// Closing hashes need a space before them, so `## C#` is titled `C#`.
static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(#{1,6})[ \t]+(.*?)(?:[ \t]+#+)?[ \t]*$").expect("static regex is valid")
});

/// `## [Unreleased]` in any casing.
static UNRELEASED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^##[ \t]+\[unreleased\].*$").expect("static regex is valid")
});

/// A versioned changelog heading such as `## [1.2.0] - 2024-01-01`.
static VERSIONED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^##[ \t]+\[v?\d[^\]]*\]").expect("static regex is valid")
});

/// Apply an edit to a file's current content.
pub fn transform(content: &str, edit: &FileEdit) -> String {
    match edit {
        FileEdit::Append(text) => append(content, text),
        FileEdit::Prepend(text) => prepend(content, text),
        FileEdit::Replace(text) => text.clone(),
        FileEdit::ReplaceSection { section, body } => replace_section(content, section, body),
        FileEdit::InsertAfter { anchor, text } => insert_after(content, anchor, text),
        FileEdit::InsertBefore { anchor, text } => insert_before(content, anchor, text),
        FileEdit::ChangelogEntry(entry) => changelog_entry(content, entry),
        FileEdit::TaskAdd(task) => add_line(content, task),
        FileEdit::TaskComplete { task_id, text } => {
            complete_task(content, task_id.as_deref().unwrap_or(text))
        }
        // Badges are appended as-is. Callers keep names unique.
        FileEdit::UpdateBadge { markup, .. } => add_line(content, markup),
    }
}

fn append(content: &str, text: &str) -> String {
    if content.is_empty() {
        text.to_string()
    } else {
        format!("{content}\n{text}")
    }
}

fn prepend(content: &str, text: &str) -> String {
    if content.is_empty() {
        text.to_string()
    } else {
        format!("{text}\n{content}")
    }
}

/// Append `line` on its own line, ending with a newline.
fn add_line(content: &str, line: &str) -> String {
    let mut out = content.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(line);
    out.push('\n');
    out
}

/// Byte offset and heading level of each ATX heading line, with its title.
fn headings(content: &str) -> Vec<(usize, usize, String)> {
    let mut found = Vec::new();
    let mut offset = 0;
    let mut fence: Option<char> = None;
    for line in content.split_inclusive('\n') {
        let bare = line.trim_end_matches(['\n', '\r']);
        if let Some(marker) = fence_marker(bare) {
            // A fence only closes with the character that opened it.
            match fence {
                None => fence = Some(marker),
                Some(open) if open == marker => fence = None,
                Some(_) => {}
            }
        } else if fence.is_none()
            && let Some(caps) = HEADING.captures(bare)
        {
            found.push((offset, caps[1].len(), caps[2].to_string()));
        }
        offset += line.len();
    }
    found
}

/// The fence character when `line` opens or closes a code block.
fn fence_marker(line: &str) -> Option<char> {
    let trimmed = line.trim_start();
    ["```", "~~~"]
        .into_iter()
        .find(|f| trimmed.starts_with(f))
        .and_then(|f| f.chars().next())
}

/// Replace the body of the section headed `section`, keeping its heading level.
///
/// The section runs to the next heading of the same or a higher level, or
/// to the end of the file. A missing section is appended as a new `#` block.
fn replace_section(content: &str, section: &str, body: &str) -> String {
    let all = headings(content);
    let wanted = section.trim();
    let Some(pos) = all.iter().position(|(_, _, title)| title == wanted) else {
        let block = format!("# {wanted}\n\n{}\n", body.trim_end_matches('\n'));
        if content.trim().is_empty() {
            return block;
        }
        return format!("{}\n\n{block}", content.trim_end_matches('\n'));
    };

    let (start, level, _) = all[pos];
    let end = all[pos + 1..]
        .iter()
        .find(|(_, l, _)| *l <= level)
        .map_or(content.len(), |(offset, _, _)| *offset);

    format!(
        "{}{} {wanted}\n\n{}\n{}",
        &content[..start],
        "#".repeat(level),
        body.trim_end_matches('\n'),
        &content[end..]
    )
}

fn insert_after(content: &str, anchor: &str, text: &str) -> String {
    match content.find(anchor) {
        Some(at) if !anchor.is_empty() => {
            let split = at + anchor.len();
            format!("{}\n{text}{}", &content[..split], &content[split..])
        }
        _ => append(content, text),
    }
}

fn insert_before(content: &str, anchor: &str, text: &str) -> String {
    match content.find(anchor) {
        Some(at) if !anchor.is_empty() => {
            format!("{}{text}\n{}", &content[..at], &content[at..])
        }
        _ => prepend(content, text),
    }
}

/// Insert `entry` as the first item under `## [Unreleased]`.
///
/// Without an unreleased section, one is synthesized before the first
/// versioned heading, or at the end of the file.
fn changelog_entry(content: &str, entry: &str) -> String {
    let entry = entry.trim_end_matches('\n');

    if let Some(heading) = UNRELEASED.find(content) {
        let mut head = content[..heading.end()].to_string();
        head.push('\n');
        let rest = content[heading.end()..]
            .strip_prefix('\n')
            .unwrap_or(&content[heading.end()..]);
        let rest = rest.trim_start_matches(['\n', '\r']);
        let gap = if rest.starts_with('#') { "\n" } else { "" };
        return format!("{head}\n{entry}\n{gap}{rest}");
    }

    let section = format!("## [Unreleased]\n\n{entry}\n\n");
    if let Some(version) = VERSIONED.find(content) {
        let at = version.start();
        return format!("{}{section}{}", &content[..at], &content[at..]);
    }

    if content.trim().is_empty() {
        section
    } else {
        format!("{}\n\n{section}", content.trim_end_matches('\n'))
    }
}

/// Tick the first open checklist item that mentions `needle`.
fn complete_task(content: &str, needle: &str) -> String {
    let needle = needle.trim();
    if needle.is_empty() {
        return content.to_string();
    }

    let mut out = String::with_capacity(content.len());
    let mut done = false;
    for line in content.split_inclusive('\n') {
        if !done && let Some(ticked) = tick(line, needle) {
            out.push_str(&ticked);
            done = true;
        } else {
            out.push_str(line);
        }
    }
    out
}

/// `- [ ] text` → `- [x] text` when the line is open and contains `needle`.
fn tick(line: &str, needle: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let indent = line.len() - trimmed.len();
    let rest = trimmed
        .strip_prefix("- [ ]")
        .or_else(|| trimmed.strip_prefix("* [ ]"))?;
    if !rest.contains(needle) {
        return None;
    }
    let bullet = &trimmed[..1];
    Some(format!("{}{bullet} [x]{rest}", &line[..indent]))
}

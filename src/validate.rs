//! Validation: raw descriptor in, typed patch out.
//!
//! Every required-field rule lives here, so the engine never sees a
//! descriptor it can't act on. A failed check is a [`Malformed`] reason,
//! not an error; the processor archives it and moves on.

use std::fmt;

use crate::model::{Action, UpdateDescriptor};
use crate::patch::{FileEdit, Patch, TrackerPatch};
use crate::tracker::{IssueChanges, IssueState, NewIssue, StateReason};

/// Why a descriptor was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Malformed(pub String);

impl Malformed {
    fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A descriptor that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated {
    pub action: Action,
    pub guid: Option<String>,
    pub patch: Patch,
}

/// Check a descriptor and build its patch.
pub fn validate(descriptor: &UpdateDescriptor) -> Result<Validated, Malformed> {
    let raw = descriptor
        .action
        .as_deref()
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| Malformed::new("missing required field: action"))?;
    let action = raw
        .parse::<Action>()
        .map_err(|e| Malformed(e.to_string()))?;

    let patch = if action.is_tracker() {
        Patch::Tracker(tracker_patch(action, descriptor)?)
    } else {
        let path = descriptor
            .file_target()
            .ok_or_else(|| Malformed(format!("{action} requires a file target")))?
            .to_path_buf();
        Patch::File {
            path,
            edit: file_edit(action, descriptor)?,
        }
    };

    Ok(Validated {
        action,
        guid: descriptor.guid().map(str::to_string),
        patch,
    })
}

fn file_edit(action: Action, d: &UpdateDescriptor) -> Result<FileEdit, Malformed> {
    let options = &d.options;

    // task-complete can identify its line by id alone.
    if action == Action::TaskComplete {
        let task_id = non_blank(options.task_id.as_deref()).map(str::to_string);
        let text = d.payload.clone().unwrap_or_default();
        if task_id.is_none() && text.trim().is_empty() {
            return Err(Malformed::new(
                "task-complete requires options.task_id or content",
            ));
        }
        return Ok(FileEdit::TaskComplete { task_id, text });
    }

    let payload = d
        .payload
        .clone()
        .ok_or_else(|| Malformed(format!("{action} requires content")))?;
    let option = |value: Option<&str>, name: &str| {
        non_blank(value)
            .map(str::to_string)
            .ok_or_else(|| Malformed(format!("{action} requires options.{name}")))
    };

    Ok(match action {
        Action::Append => FileEdit::Append(payload),
        Action::Prepend => FileEdit::Prepend(payload),
        Action::Replace => FileEdit::Replace(payload),
        Action::ReplaceSection => FileEdit::ReplaceSection {
            section: option(options.section.as_deref(), "section")?,
            body: payload,
        },
        Action::InsertAfter => FileEdit::InsertAfter {
            anchor: option(options.after.as_deref(), "after")?,
            text: payload,
        },
        Action::InsertBefore => FileEdit::InsertBefore {
            anchor: option(options.before.as_deref(), "before")?,
            text: payload,
        },
        Action::ChangelogEntry => FileEdit::ChangelogEntry(payload),
        Action::TaskAdd => FileEdit::TaskAdd(payload),
        Action::UpdateBadge => FileEdit::UpdateBadge {
            badge_name: option(options.badge_name.as_deref(), "badge_name")?,
            markup: payload,
        },
        Action::TaskComplete
        | Action::Create
        | Action::Update
        | Action::Comment
        | Action::Close
        | Action::Delete => unreachable!("{action} is not a file action"),
    })
}

fn tracker_patch(action: Action, d: &UpdateDescriptor) -> Result<TrackerPatch, Malformed> {
    if action == Action::Create {
        let title = non_blank(d.title.as_deref())
            .ok_or_else(|| Malformed::new("create requires a title"))?;
        return Ok(TrackerPatch::Create {
            issue: NewIssue {
                title: title.to_string(),
                body: d.payload.clone().unwrap_or_default(),
                labels: d.labels.clone().unwrap_or_default(),
            },
            assignees: d.assignees.clone().unwrap_or_default(),
            milestone: d.milestone,
        });
    }

    let number = d
        .issue_number()
        .ok_or_else(|| Malformed(format!("{action} requires an issue number")))?;

    Ok(match action {
        Action::Update => {
            let changes = IssueChanges {
                title: non_blank(d.title.as_deref()).map(str::to_string),
                body: d.payload.clone(),
                state: d.state.as_deref().map(parse_state).transpose()?,
                state_reason: None,
                labels: d.labels.clone(),
                assignees: d.assignees.clone(),
                milestone: d.milestone,
            };
            if changes.is_empty() {
                return Err(Malformed::new("update requires at least one field to change"));
            }
            TrackerPatch::Update { number, changes }
        }
        Action::Comment => {
            let body = non_blank(d.payload.as_deref())
                .ok_or_else(|| Malformed::new("comment requires content"))?;
            TrackerPatch::Comment {
                number,
                body: body.to_string(),
            }
        }
        Action::Close => TrackerPatch::Close {
            number,
            reason: d
                .state_reason
                .as_deref()
                .map_or(Ok(StateReason::Completed), parse_reason)?,
            comment: non_blank(d.payload.as_deref()).map(str::to_string),
        },
        Action::Delete => TrackerPatch::Delete { number },
        _ => unreachable!("{action} is not a tracker action"),
    })
}

fn parse_state(s: &str) -> Result<IssueState, Malformed> {
    match s.trim().to_ascii_lowercase().as_str() {
        "open" => Ok(IssueState::Open),
        "closed" => Ok(IssueState::Closed),
        other => Err(Malformed(format!(
            "invalid state {other:?}: expected open or closed"
        ))),
    }
}

fn parse_reason(s: &str) -> Result<StateReason, Malformed> {
    match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "completed" => Ok(StateReason::Completed),
        "not_planned" => Ok(StateReason::NotPlanned),
        other => Err(Malformed(format!(
            "invalid state_reason {other:?}: expected completed or not_planned"
        ))),
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;

    fn parse(json: &str) -> Result<Validated, Malformed> {
        let descriptor: UpdateDescriptor = serde_json::from_str(json).unwrap();
        validate(&descriptor)
    }

    fn reason(json: &str) -> String {
        parse(json).unwrap_err().0
    }

    #[test]
    fn missing_and_unknown_actions_are_malformed() {
        assert_eq!(reason(r#"{"file":"a.md"}"#), "missing required field: action");
        assert_eq!(reason(r#"{"action":"  "}"#), "missing required field: action");
        assert_eq!(
            reason(r#"{"action":"explode","file":"a.md"}"#),
            "unknown action: explode"
        );
    }

    #[test]
    fn file_actions_need_target_and_content() {
        assert_eq!(
            reason(r#"{"action":"append","content":"x"}"#),
            "append requires a file target"
        );
        assert_eq!(
            reason(r#"{"action":"append","file":"a.md"}"#),
            "append requires content"
        );
    }

    #[test]
    fn mode_specific_options_are_required() {
        assert_eq!(
            reason(r#"{"action":"replace-section","file":"a.md","content":"x"}"#),
            "replace-section requires options.section"
        );
        assert_eq!(
            reason(r#"{"action":"insert-after","file":"a.md","content":"x","options":{"before":"y"}}"#),
            "insert-after requires options.after"
        );
        assert_eq!(
            reason(r#"{"action":"insert-before","file":"a.md","content":"x"}"#),
            "insert-before requires options.before"
        );
        assert_eq!(
            reason(r#"{"action":"update-badge","file":"a.md","content":"x","options":{"badge_name":" "}}"#),
            "update-badge requires options.badge_name"
        );
    }

    #[test]
    fn replace_section_builds_typed_edit() {
        let v = parse(
            r#"{"action":"replace-section","guid":" g ","file":"README.md",
                "content":"new text","options":{"section":"Usage"}}"#,
        )
        .unwrap();

        assert_eq!(v.action, Action::ReplaceSection);
        assert_eq!(v.guid.as_deref(), Some("g"));
        assert_eq!(
            v.patch,
            Patch::File {
                path: PathBuf::from("README.md"),
                edit: FileEdit::ReplaceSection {
                    section: "Usage".into(),
                    body: "new text".into()
                }
            }
        );
    }

    #[test]
    fn task_complete_accepts_id_without_content() {
        let v = parse(r#"{"action":"task-complete","file":"TODO.md","options":{"task_id":"T-1"}}"#)
            .unwrap();
        assert_eq!(
            v.patch,
            Patch::File {
                path: PathBuf::from("TODO.md"),
                edit: FileEdit::TaskComplete {
                    task_id: Some("T-1".into()),
                    text: String::new()
                }
            }
        );
        assert_eq!(
            reason(r#"{"action":"task-complete","file":"TODO.md"}"#),
            "task-complete requires options.task_id or content"
        );
    }

    #[test]
    fn tracker_actions_need_an_issue_number() {
        for action in ["update", "comment", "close", "delete"] {
            assert_eq!(
                reason(&format!(r#"{{"action":"{action}","content":"x","title":"t"}}"#)),
                format!("{action} requires an issue number")
            );
        }
        assert!(parse(r##"{"action":"delete","target":"#12"}"##).is_ok());
        assert!(parse(r#"{"action":"delete","issue_number":12}"#).is_ok());
    }

    #[test]
    fn create_needs_title_and_carries_follow_up_fields() {
        assert_eq!(reason(r#"{"action":"create","body":"x"}"#), "create requires a title");

        let v = parse(
            r#"{"action":"create","title":"Bug","body":"It broke","labels":["bug"],
                "assignees":["octocat"],"milestone":3}"#,
        )
        .unwrap();
        assert_eq!(
            v.patch,
            Patch::Tracker(TrackerPatch::Create {
                issue: NewIssue {
                    title: "Bug".into(),
                    body: "It broke".into(),
                    labels: vec!["bug".into()],
                },
                assignees: vec!["octocat".into()],
                milestone: Some(3),
            })
        );
    }

    #[test]
    fn update_needs_a_change_and_a_valid_state() {
        assert_eq!(
            reason(r#"{"action":"update","number":4}"#),
            "update requires at least one field to change"
        );
        assert_eq!(
            reason(r#"{"action":"update","number":4,"state":"archived"}"#),
            r#"invalid state "archived": expected open or closed"#
        );
        let v = parse(r#"{"action":"update","number":4,"state":"Closed"}"#).unwrap();
        assert!(matches!(
            v.patch,
            Patch::Tracker(TrackerPatch::Update { number: 4, ref changes })
                if changes.state == Some(IssueState::Closed)
        ));
    }

    #[test]
    fn comment_needs_text() {
        assert_eq!(
            reason(r#"{"action":"comment","number":4,"body":"  "}"#),
            "comment requires content"
        );
    }

    #[test]
    fn close_reason_defaults_to_completed() {
        let v = parse(r#"{"action":"close","number":9}"#).unwrap();
        assert_eq!(
            v.patch,
            Patch::Tracker(TrackerPatch::Close {
                number: 9,
                reason: StateReason::Completed,
                comment: None
            })
        );

        let v = parse(r#"{"action":"close","number":9,"state_reason":"not-planned","body":"dup"}"#)
            .unwrap();
        assert_eq!(
            v.patch,
            Patch::Tracker(TrackerPatch::Close {
                number: 9,
                reason: StateReason::NotPlanned,
                comment: Some("dup".into())
            })
        );

        assert!(reason(r#"{"action":"close","number":9,"state_reason":"wontfix"}"#)
            .starts_with("invalid state_reason"));
    }
}

//! In-memory tracker for tests.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use super::{Comment, Issue, IssueChanges, IssueState, NewIssue, Result, Tracker, TrackerError};

/// A tracker that keeps everything in memory and counts mutations.
#[derive(Default)]
pub struct FakeTracker {
    issues: RefCell<BTreeMap<u64, Issue>>,
    comments: RefCell<BTreeMap<u64, Vec<Comment>>>,
    next_id: Cell<u64>,
    /// When set, `search_issues` fails as if rate limited.
    pub search_denied: Cell<bool>,
    /// When set, every mutating call fails with a server error.
    pub mutations_fail: Cell<bool>,
    pub creates: Cell<usize>,
    pub comments_added: Cell<usize>,
    pub searches: Cell<usize>,
    pub listings: Cell<usize>,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing issue.
    pub fn seed(&self, title: &str, body: &str, state: IssueState) -> u64 {
        let number = self.bump();
        self.issues.borrow_mut().insert(
            number,
            Issue {
                number,
                title: title.to_string(),
                body: body.to_string(),
                state,
                html_url: self.issue_url(number),
            },
        );
        number
    }

    /// Seed an existing comment.
    pub fn seed_comment(&self, number: u64, body: &str) {
        let id = self.bump();
        self.comments.borrow_mut().entry(number).or_default().push(Comment {
            id,
            body: body.to_string(),
        });
    }

    pub fn issue(&self, number: u64) -> Option<Issue> {
        self.issues.borrow().get(&number).cloned()
    }

    pub fn all_issues(&self) -> Vec<Issue> {
        self.issues.borrow().values().cloned().collect()
    }

    pub fn comments_on(&self, number: u64) -> Vec<Comment> {
        self.comments.borrow().get(&number).cloned().unwrap_or_default()
    }

    fn bump(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    fn check_mutation(&self, operation: &str) -> Result<()> {
        if self.mutations_fail.get() {
            return Err(TrackerError::Status {
                operation: operation.to_string(),
                status: 500,
            });
        }
        Ok(())
    }
}

/// The first quoted phrase in a query, or the whole query.
fn search_phrase(query: &str) -> &str {
    let mut parts = query.split('"');
    match (parts.next(), parts.next()) {
        (Some(_), Some(phrase)) => phrase,
        _ => query.trim(),
    }
}

impl Tracker for FakeTracker {
    fn search_issues(&self, query: &str) -> Result<Vec<Issue>> {
        self.searches.set(self.searches.get() + 1);
        if self.search_denied.get() {
            return Err(TrackerError::Status {
                operation: "search issues".into(),
                status: 403,
            });
        }
        let phrase = search_phrase(query);
        let comments = self.comments.borrow();
        Ok(self
            .issues
            .borrow()
            .values()
            .filter(|i| {
                i.title.contains(phrase)
                    || i.body.contains(phrase)
                    || comments
                        .get(&i.number)
                        .is_some_and(|cs| cs.iter().any(|c| c.body.contains(phrase)))
            })
            .cloned()
            .collect())
    }

    fn list_issues(&self) -> Result<Vec<Issue>> {
        self.listings.set(self.listings.get() + 1);
        Ok(self.all_issues())
    }

    fn get_issue(&self, number: u64) -> Result<Option<Issue>> {
        Ok(self.issue(number))
    }

    fn create_issue(&self, issue: &NewIssue) -> Result<Issue> {
        self.check_mutation("create issue")?;
        self.creates.set(self.creates.get() + 1);
        let number = self.seed(&issue.title, &issue.body, IssueState::Open);
        Ok(self.issue(number).expect("just inserted"))
    }

    fn update_issue(&self, number: u64, changes: &IssueChanges) -> Result<Issue> {
        self.check_mutation("update issue")?;
        let mut issues = self.issues.borrow_mut();
        let issue = issues.get_mut(&number).ok_or(TrackerError::NotFound(number))?;
        if let Some(title) = &changes.title {
            issue.title.clone_from(title);
        }
        if let Some(body) = &changes.body {
            issue.body.clone_from(body);
        }
        if let Some(state) = changes.state {
            issue.state = state;
        }
        Ok(issue.clone())
    }

    fn list_comments(&self, number: u64) -> Result<Vec<Comment>> {
        Ok(self.comments_on(number))
    }

    fn add_comment(&self, number: u64, body: &str) -> Result<Comment> {
        self.check_mutation("add comment")?;
        if !self.issues.borrow().contains_key(&number) {
            return Err(TrackerError::Status {
                operation: "add comment".into(),
                status: 404,
            });
        }
        self.comments_added.set(self.comments_added.get() + 1);
        self.seed_comment(number, body);
        Ok(self
            .comments_on(number)
            .pop()
            .expect("just inserted"))
    }

    fn resolve_node_id(&self, number: u64) -> Result<String> {
        if self.issues.borrow().contains_key(&number) {
            Ok(format!("I_node{number}"))
        } else {
            Err(TrackerError::NotFound(number))
        }
    }

    fn delete_issue(&self, node_id: &str) -> Result<()> {
        self.check_mutation("delete issue")?;
        let number: u64 = node_id
            .strip_prefix("I_node")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| TrackerError::Decode {
                operation: "delete issue".into(),
                message: format!("bad node id {node_id}"),
            })?;
        self.issues.borrow_mut().remove(&number);
        self.comments.borrow_mut().remove(&number);
        Ok(())
    }

    fn issue_url(&self, number: u64) -> String {
        format!("https://github.com/octo/widgets/issues/{number}")
    }
}

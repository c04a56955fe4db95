//! GitHub tracker: issues over the REST API, deletion over GraphQL.
//!
//! Authenticated with a bearer token. Transient failures are retried here
//! with exponential backoff so the engine above never has to. Reads and
//! PATCHes retry on rate limits, server errors and dropped connections;
//! POSTs create things, so they are only resent after a 429.

use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use super::{Comment, Issue, IssueChanges, IssueState, NewIssue, Result, Tracker, TrackerError};

/// Public API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";

/// Initial backoff delay in milliseconds (doubles each retry).
const INITIAL_BACKOFF_MS: u64 = 1000;

const PER_PAGE: &str = "100";

/// A GitHub repository's issue tracker.
pub struct GitHub {
    agent: ureq::Agent,
    api_url: String,
    repo: String,
    token: String,
    max_retries: u32,
}

impl GitHub {
    /// Create a client for `repo` (`owner/name`).
    pub fn new(api_url: &str, repo: &str, token: &str, max_retries: u32) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(30)))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            api_url: api_url.trim_end_matches('/').to_string(),
            repo: repo.to_string(),
            token: token.to_string(),
            max_retries,
        }
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{path}", self.api_url, self.repo)
    }

    /// GraphQL lives beside REST: `/graphql` publicly, `/api/graphql` on Enterprise.
    fn graphql_url(&self) -> String {
        match self.api_url.strip_suffix("/api/v3") {
            Some(host) => format!("{host}/api/graphql"),
            None => format!("{}/graphql", self.api_url),
        }
    }

    /// Browser base URL derived from the API URL.
    fn web_url(&self) -> String {
        if self.api_url == DEFAULT_API_URL {
            return "https://github.com".to_string();
        }
        self.api_url
            .strip_suffix("/api/v3")
            .unwrap_or(&self.api_url)
            .to_string()
    }

    fn get<T: DeserializeOwned>(
        &self,
        operation: &str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        self.with_retry(operation, TrackerError::is_retryable, || {
            let mut request = self
                .agent
                .get(url)
                .header("Authorization", &format!("Bearer {}", self.token))
                .header("Accept", "application/vnd.github+json")
                .header("X-GitHub-Api-Version", API_VERSION);
            for (key, value) in query {
                request = request.query(*key, *value);
            }
            let response = request.call().map_err(|e| classify(operation, e))?;
            response
                .into_body()
                .read_json::<T>()
                .map_err(|e| decode_error(operation, &e))
        })
    }

    fn post<T: DeserializeOwned>(
        &self,
        operation: &str,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        self.with_retry(operation, TrackerError::is_rate_limited, || {
            let response = self
                .agent
                .post(url)
                .header("Authorization", &format!("Bearer {}", self.token))
                .header("Accept", "application/vnd.github+json")
                .header("X-GitHub-Api-Version", API_VERSION)
                .send_json(body)
                .map_err(|e| classify(operation, e))?;
            response
                .into_body()
                .read_json::<T>()
                .map_err(|e| decode_error(operation, &e))
        })
    }

    fn patch<T: DeserializeOwned>(
        &self,
        operation: &str,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        self.with_retry(operation, TrackerError::is_retryable, || {
            let response = self
                .agent
                .patch(url)
                .header("Authorization", &format!("Bearer {}", self.token))
                .header("Accept", "application/vnd.github+json")
                .header("X-GitHub-Api-Version", API_VERSION)
                .send_json(body)
                .map_err(|e| classify(operation, e))?;
            response
                .into_body()
                .read_json::<T>()
                .map_err(|e| decode_error(operation, &e))
        })
    }

    /// Fetch every page of a list endpoint.
    fn get_all_pages<T: DeserializeOwned>(&self, operation: &str, url: &str, state: Option<&str>) -> Result<Vec<T>> {
        let mut all = Vec::new();
        let mut page = 1u32;
        loop {
            let page_str = page.to_string();
            let mut query = vec![("per_page", PER_PAGE), ("page", page_str.as_str())];
            if let Some(state) = state {
                query.push(("state", state));
            }
            let batch: Vec<T> = self.get(operation, url, &query)?;
            if batch.is_empty() {
                break;
            }
            all.extend(batch);
            page += 1;
        }
        Ok(all)
    }

    /// Retry an operation with exponential backoff while `retryable` allows it.
    fn with_retry<T>(
        &self,
        operation: &str,
        retryable: fn(&TrackerError) -> bool,
        f: impl Fn() -> Result<T>,
    ) -> Result<T> {
        let mut backoff_ms = INITIAL_BACKOFF_MS;
        let mut attempt = 0;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && retryable(&e) => {
                    attempt += 1;
                    warn!(
                        operation,
                        attempt,
                        max = self.max_retries,
                        backoff_ms,
                        error = %e,
                        "retrying tracker call"
                    );
                    thread::sleep(Duration::from_millis(backoff_ms));
                    backoff_ms *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Map a ureq error onto the tracker taxonomy.
fn classify(operation: &str, err: ureq::Error) -> TrackerError {
    match err {
        ureq::Error::StatusCode(status) => TrackerError::Status {
            operation: operation.to_string(),
            status,
        },
        other => TrackerError::Transport {
            operation: operation.to_string(),
            message: other.to_string(),
        },
    }
}

fn decode_error(operation: &str, err: &ureq::Error) -> TrackerError {
    TrackerError::Decode {
        operation: operation.to_string(),
        message: err.to_string(),
    }
}

// ── Wire shapes ──

/// JSON shape of an issue from the REST API.
#[derive(Deserialize)]
struct GhIssue {
    number: u64,
    title: String,
    body: Option<String>,
    state: IssueState,
    html_url: String,
    node_id: Option<String>,
    /// Present when the "issue" is really a pull request.
    pull_request: Option<serde_json::Value>,
}

impl From<GhIssue> for Issue {
    fn from(i: GhIssue) -> Self {
        Issue {
            number: i.number,
            title: i.title,
            body: i.body.unwrap_or_default(),
            state: i.state,
            html_url: i.html_url,
        }
    }
}

#[derive(Deserialize)]
struct GhSearch {
    items: Vec<GhIssue>,
}

#[derive(Deserialize)]
struct GhComment {
    id: u64,
    body: Option<String>,
}

impl From<GhComment> for Comment {
    fn from(c: GhComment) -> Self {
        Comment {
            id: c.id,
            body: c.body.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

fn issues_only(items: Vec<GhIssue>) -> Vec<Issue> {
    items
        .into_iter()
        .filter(|i| i.pull_request.is_none())
        .map(Issue::from)
        .collect()
}

impl Tracker for GitHub {
    fn search_issues(&self, query: &str) -> Result<Vec<Issue>> {
        let q = format!("repo:{} is:issue {query}", self.repo);
        debug!(query = %q, "searching issues");
        let url = format!("{}/search/issues", self.api_url);
        let found: GhSearch = self.get("search issues", &url, &[("q", &q), ("per_page", PER_PAGE)])?;
        Ok(issues_only(found.items))
    }

    fn list_issues(&self) -> Result<Vec<Issue>> {
        let items: Vec<GhIssue> =
            self.get_all_pages("list issues", &self.repo_url("issues"), Some("all"))?;
        Ok(issues_only(items))
    }

    fn get_issue(&self, number: u64) -> Result<Option<Issue>> {
        let url = self.repo_url(&format!("issues/{number}"));
        match self.get::<GhIssue>("get issue", &url, &[]) {
            Ok(issue) => Ok(Some(issue.into())),
            // 410 Gone is what a deleted or transferred issue answers with.
            Err(TrackerError::Status { status: 404 | 410, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn create_issue(&self, issue: &NewIssue) -> Result<Issue> {
        let body = serde_json::to_value(issue).map_err(|e| TrackerError::Decode {
            operation: "create issue".into(),
            message: e.to_string(),
        })?;
        let created: GhIssue = self.post("create issue", &self.repo_url("issues"), &body)?;
        Ok(created.into())
    }

    fn update_issue(&self, number: u64, changes: &IssueChanges) -> Result<Issue> {
        let body = serde_json::to_value(changes).map_err(|e| TrackerError::Decode {
            operation: "update issue".into(),
            message: e.to_string(),
        })?;
        let url = self.repo_url(&format!("issues/{number}"));
        let updated: GhIssue = self.patch("update issue", &url, &body)?;
        Ok(updated.into())
    }

    fn list_comments(&self, number: u64) -> Result<Vec<Comment>> {
        let url = self.repo_url(&format!("issues/{number}/comments"));
        let comments: Vec<GhComment> = self.get_all_pages("list comments", &url, None)?;
        Ok(comments.into_iter().map(Comment::from).collect())
    }

    fn add_comment(&self, number: u64, body: &str) -> Result<Comment> {
        let url = self.repo_url(&format!("issues/{number}/comments"));
        let created: GhComment = self.post("add comment", &url, &json!({ "body": body }))?;
        Ok(created.into())
    }

    fn resolve_node_id(&self, number: u64) -> Result<String> {
        let url = self.repo_url(&format!("issues/{number}"));
        match self.get::<GhIssue>("resolve issue id", &url, &[]) {
            Ok(GhIssue {
                node_id: Some(id), ..
            }) => Ok(id),
            Ok(_) => Err(TrackerError::Decode {
                operation: "resolve issue id".into(),
                message: format!("issue #{number} has no node id"),
            }),
            Err(TrackerError::Status { status: 404 | 410, .. }) => {
                Err(TrackerError::NotFound(number))
            }
            Err(e) => Err(e),
        }
    }

    fn delete_issue(&self, node_id: &str) -> Result<()> {
        let body = json!({
            "query": "mutation($id: ID!) { deleteIssue(input: {issueId: $id}) { clientMutationId } }",
            "variables": { "id": node_id },
        });
        let response: GraphQlResponse = self.post("delete issue", &self.graphql_url(), &body)?;
        if let Some(first) = response.errors.first() {
            return Err(TrackerError::Decode {
                operation: "delete issue".into(),
                message: first.message.clone(),
            });
        }
        Ok(())
    }

    fn issue_url(&self, number: u64) -> String {
        format!("{}/{}/issues/{number}", self.web_url(), self.repo)
    }
}

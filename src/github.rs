use crate::config::{AppConfig, RepoId};
use crate::error::{MetricsError, Result};
use crate::transport::{HttpResponse, Transport};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const BRANCH_HISTORY_QUERY: &str = r#"
query($owner: String!, $name: String!, $branch: String!, $after: String) {
  repository(owner: $owner, name: $name) {
    ref(qualifiedName: $branch) {
      target {
        ... on Commit {
          history(first: 100, after: $after) {
            pageInfo { hasNextPage }
            edges { cursor node { author { email } } }
          }
        }
      }
    }
  }
}
"#;

const DEFAULT_BRANCH_HISTORY_QUERY: &str = r#"
query($owner: String!, $name: String!, $after: String) {
  repository(owner: $owner, name: $name) {
    ref: defaultBranchRef {
      target {
        ... on Commit {
          history(first: 100, after: $after) {
            pageInfo { hasNextPage }
            edges { cursor node { author { email } } }
          }
        }
      }
    }
  }
}
"#;

#[derive(Debug, Clone, Deserialize)]
pub struct CommitRecord {
    pub commit: CommitDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitDetail {
    pub author: GitSignature,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitSignature {
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueRecord {
    pub number: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContributorRecord {
    pub login: String,
    pub contributions: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub login: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestRecord {
    pub number: u64,
    pub state: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewRecord {
    pub id: u64,
}

/// One `[unix_timestamp, additions, deletions]` triple from the code frequency statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "(i64, i64, i64)")]
pub struct CodeFrequencyWeek {
    pub week: i64,
    pub additions: i64,
    /// Reported by GitHub as a non-positive number.
    pub deletions: i64,
}

impl From<(i64, i64, i64)> for CodeFrequencyWeek {
    fn from((week, additions, deletions): (i64, i64, i64)) -> Self {
        Self {
            week,
            additions,
            deletions,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<D> {
    data: Option<D>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct HistoryData {
    repository: Option<HistoryRepository>,
}

#[derive(Debug, Deserialize)]
struct HistoryRepository {
    #[serde(rename = "ref")]
    git_ref: Option<HistoryRef>,
}

#[derive(Debug, Deserialize)]
struct HistoryRef {
    target: HistoryTarget,
}

#[derive(Debug, Deserialize)]
struct HistoryTarget {
    history: Option<CommitHistory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitHistory {
    #[serde(rename = "pageInfo")]
    pub page_info: PageInfo,
    pub edges: Vec<HistoryEdge>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageInfo {
    #[serde(rename = "hasNextPage")]
    pub has_next_page: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEdge {
    pub cursor: String,
    pub node: HistoryCommit,
}

/// Git author data is nullable in the GraphQL schema, at both levels.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryCommit {
    pub author: Option<HistoryAuthor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryAuthor {
    pub email: Option<String>,
}

impl HistoryEdge {
    pub fn author_email(self) -> Option<String> {
        self.node.author.and_then(|author| author.email)
    }
}

/// One page of a REST listing plus the server-supplied link to the following page.
#[derive(Debug, Clone)]
pub struct Page<R> {
    pub items: Vec<R>,
    pub next: Option<String>,
}

#[derive(Clone, Copy, Debug)]
struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    fn delay(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        match retry_after {
            Some(secs) => Duration::from_secs(secs),
            None => self.base_delay.saturating_mul(1 << attempt.min(16)),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Request<'a> {
    Get(&'a str),
    Post(&'a str, &'a serde_json::Value),
}

impl Request<'_> {
    fn url(&self) -> &str {
        match self {
            Request::Get(url) | Request::Post(url, _) => url,
        }
    }
}

/// GitHub API client: URL construction, status handling, retries and typed parsing on top of a
/// [`Transport`].
#[derive(Debug)]
pub struct GitHubClient<T> {
    transport: T,
    base_url: String,
    per_page: u32,
    retry: RetryPolicy,
}

impl<T: Transport> GitHubClient<T> {
    pub fn new(transport: T, config: &AppConfig) -> Self {
        Self {
            transport,
            base_url: config.github_api_url.trim_end_matches('/').to_string(),
            per_page: config.per_page,
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: config.retry_base_delay(),
            },
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    /// `{base}/repos/{owner}/{repo}/{path}`.
    pub fn repo_url(&self, repo_id: &RepoId, path: &str) -> String {
        // Sanitize inputs to prevent path traversal or unintended endpoint access
        let owner = repo_id.owner.trim().replace("..", "");
        let repo = repo_id.repo.trim().replace("..", "");
        format!("{}/repos/{}/{}/{}", self.base_url, owner, repo, path)
    }

    pub fn user_url(&self, login: &str) -> String {
        format!("{}/users/{}", self.base_url, login.trim().replace("..", ""))
    }

    /// GraphQL endpoint. On GitHub Enterprise the REST base ends in `/api/v3` while GraphQL
    /// lives at `/api/graphql`.
    pub fn graphql_url(&self) -> String {
        let root = self.base_url.strip_suffix("/v3").unwrap_or(&self.base_url);
        format!("{root}/graphql")
    }

    /// GETs `url` and parses the body as `R`.
    pub async fn get_json<R: DeserializeOwned>(&self, url: &str) -> Result<R> {
        let response = self.send(Request::Get(url)).await?;
        parse_body(url, &response.body)
    }

    /// GETs one page of a REST listing, keeping the `next` link.
    pub async fn get_page<R: DeserializeOwned>(&self, url: &str) -> Result<Page<R>> {
        let response = self.send(Request::Get(url)).await?;
        let items = parse_body(url, &response.body)?;
        Ok(Page {
            items,
            next: response.next_link().map(str::to_string),
        })
    }

    /// POSTs a GraphQL document. Any entry in `errors` fails the call.
    pub async fn graphql<D: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<D> {
        let url = self.graphql_url();
        let payload = json!({ "query": query, "variables": variables });
        let response = self.send(Request::Post(&url, &payload)).await?;

        let envelope: GraphQlResponse<D> = parse_body(&url, &response.body)?;
        if !envelope.errors.is_empty() {
            return Err(MetricsError::GraphQl {
                messages: envelope.errors.into_iter().map(|e| e.message).collect(),
            });
        }

        envelope.data.ok_or_else(|| MetricsError::Shape {
            url,
            detail: "response carries neither data nor errors".to_string(),
        })
    }

    /// Fetches one page of commit history edges, resuming after `after` when given.
    ///
    /// `branch` of `None` walks the repository's default branch.
    pub async fn commit_history(
        &self,
        repo_id: &RepoId,
        branch: Option<&str>,
        after: Option<&str>,
    ) -> Result<CommitHistory> {
        let (query, variables) = match branch {
            Some(branch) => (
                BRANCH_HISTORY_QUERY,
                json!({
                    "owner": repo_id.owner,
                    "name": repo_id.repo,
                    "branch": branch,
                    "after": after,
                }),
            ),
            None => (
                DEFAULT_BRANCH_HISTORY_QUERY,
                json!({
                    "owner": repo_id.owner,
                    "name": repo_id.repo,
                    "after": after,
                }),
            ),
        };

        let data: HistoryData = self.graphql(query, variables).await?;

        let repository = data.repository.ok_or_else(|| MetricsError::Shape {
            url: self.graphql_url(),
            detail: format!("repository {repo_id} missing from response"),
        })?;
        let git_ref = repository
            .git_ref
            .ok_or_else(|| MetricsError::RefNotFound {
                repo: repo_id.to_string(),
                branch: branch.unwrap_or("(default)").to_string(),
            })?;

        git_ref.target.history.ok_or_else(|| MetricsError::Shape {
            url: self.graphql_url(),
            detail: "branch target is not a commit".to_string(),
        })
    }

    /// Sends `request`, retrying rate-limited and still-computing (202) responses with
    /// exponential backoff. Any other non-2xx status fails immediately.
    async fn send(&self, request: Request<'_>) -> Result<HttpResponse> {
        let url = request.url();
        let mut attempt = 0;

        loop {
            let response = match request {
                Request::Get(url) => self.transport.get(url).await?,
                Request::Post(url, body) => self.transport.post_json(url, body).await?,
            };
            tracing::debug!(url, status = response.status, attempt, "GitHub response");

            let rate_limited = response.is_rate_limited();
            let pending = response.status == 202;

            if !rate_limited && !pending {
                if response.is_success() {
                    return Ok(response);
                }
                return Err(MetricsError::Status {
                    status: response.status,
                    url: url.to_string(),
                });
            }

            if attempt >= self.retry.max_retries {
                return Err(if rate_limited {
                    MetricsError::RateLimited {
                        url: url.to_string(),
                        retries: attempt,
                    }
                } else {
                    MetricsError::StatsPending {
                        url: url.to_string(),
                    }
                });
            }

            let delay = self.retry.delay(attempt, response.retry_after);
            tracing::warn!(
                url,
                status = response.status,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying GitHub request"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// An empty body (e.g. 204 No Content) parses as JSON `null`.
fn parse_body<R: DeserializeOwned>(url: &str, body: &str) -> Result<R> {
    let body = if body.trim().is_empty() { "null" } else { body };
    serde_json::from_str(body).map_err(|source| MetricsError::Schema {
        url: url.to_string(),
        source,
    })
}

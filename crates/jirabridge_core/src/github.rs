use std::env;
use std::sync::LazyLock;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use regex::Regex;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::scan::Item;

pub const GITHUB_GRAPHQL_URL: &str = "https://api.github.com/graphql";
pub const GITHUB_API_URL: &str = "https://api.github.com";
const DEFAULT_USER_AGENT: &str = "jirabridge/0.1";

/// Source tracker operations the core consumes. Fetches are transparently
/// paginated by the implementation.
pub trait SourceTracker {
    fn fetch_epics(&mut self, repo_slug: &str) -> Result<Vec<Item>>;
    fn fetch_sub_issues(&mut self, repo_slug: &str, number: u64) -> Result<Vec<Item>>;
    /// Append a migration back-reference line to the source issue body. An
    /// issue URL that cannot be parsed is logged and dropped; it never fails
    /// the run.
    fn append_migration_link(
        &mut self,
        issue_url: &str,
        jira_key: &str,
        browse_url: &str,
    ) -> Result<()>;
}

static ISSUE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://github\.com/([^/]+)/([^/]+)/issues/(\d+)$").expect("issue url pattern")
});

const EPIC_QUERY: &str = r"
query($searchQuery: String!, $cursor: String) {
  search(query: $searchQuery, type: ISSUE, first: 50, after: $cursor) {
    pageInfo {
      hasNextPage
      endCursor
    }
    nodes {
      ... on Issue {
        number
        title
        body
        url
        state
        issueType {
          name
        }
      }
    }
  }
}
";

const SUB_ISSUES_QUERY: &str = r"
query($owner: String!, $repo: String!, $number: Int!, $cursor: String) {
  repository(owner: $owner, name: $repo) {
    issue(number: $number) {
      subIssues(first: 50, after: $cursor) {
        pageInfo {
          hasNextPage
          endCursor
        }
        nodes {
          number
          title
          body
          url
          state
          issueType {
            name
          }
        }
      }
    }
  }
}
";

#[derive(Debug, Clone)]
pub struct GitHubClientConfig {
    pub graphql_url: String,
    pub api_url: String,
    pub token: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl GitHubClientConfig {
    /// Build from the environment. `GITHUB_TOKEN` is required.
    pub fn from_env() -> Result<Self> {
        let token = match env::var("GITHUB_TOKEN") {
            Ok(value) if !value.trim().is_empty() => value,
            _ => bail!("GITHUB_TOKEN env var is required"),
        };
        Ok(Self {
            graphql_url: GITHUB_GRAPHQL_URL.to_string(),
            api_url: GITHUB_API_URL.to_string(),
            token,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: 30_000,
            max_retries: 2,
            retry_delay_ms: 500,
        })
    }
}

pub struct GitHubClient {
    client: Client,
    config: GitHubClientConfig,
    request_count: usize,
}

impl GitHubClient {
    pub fn from_env() -> Result<Self> {
        Self::new(GitHubClientConfig::from_env()?)
    }

    pub fn new(config: GitHubClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build GitHub HTTP client")?;
        Ok(Self {
            client,
            config,
            request_count: 0,
        })
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    fn graphql(&mut self, query: &str, variables: Value) -> Result<Value> {
        let payload = json!({ "query": query, "variables": variables });

        for attempt in 0..=self.config.max_retries {
            self.request_count += 1;
            let response = self
                .client
                .post(&self.config.graphql_url)
                .header("Authorization", format!("Bearer {}", self.config.token))
                .header("Content-Type", "application/json")
                .header("User-Agent", self.config.user_agent.clone())
                .header("GraphQL-Features", "sub_issues, issue_types")
                .json(&payload)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("GitHub GraphQL request failed with HTTP {status}");
                    }
                    let body: Value = response
                        .json()
                        .context("failed to decode GitHub GraphQL response")?;
                    if let Some(errors) = body.get("errors") {
                        bail!("GitHub GraphQL errors: {errors}");
                    }
                    return Ok(body.get("data").cloned().unwrap_or(Value::Null));
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context("failed to call GitHub GraphQL API");
                }
            }
        }

        bail!("GitHub GraphQL request exhausted retry budget")
    }

    fn rest_get(&mut self, endpoint: &str) -> Result<Value> {
        for attempt in 0..=self.config.max_retries {
            self.request_count += 1;
            let response = self
                .client
                .get(endpoint)
                .header("Authorization", format!("Bearer {}", self.config.token))
                .header("Accept", "application/vnd.github+json")
                .header("User-Agent", self.config.user_agent.clone())
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("GitHub API request failed with HTTP {status}: {endpoint}");
                    }
                    return response
                        .json()
                        .context("failed to decode GitHub API JSON response");
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context("failed to call GitHub API");
                }
            }
        }

        bail!("GitHub API request exhausted retry budget")
    }

    // Writes are attempted once; a failed write aborts the run rather than
    // risking a double append.
    fn rest_patch(&mut self, endpoint: &str, payload: &Value) -> Result<()> {
        self.request_count += 1;
        let response = self
            .client
            .patch(endpoint)
            .header("Authorization", format!("Bearer {}", self.config.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", self.config.user_agent.clone())
            .json(payload)
            .send()
            .context("failed to call GitHub API")?;
        let status = response.status();
        if !status.is_success() {
            bail!("GitHub API request failed with HTTP {status}: {endpoint}");
        }
        Ok(())
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let delay = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        sleep(Duration::from_millis(delay));
    }
}

impl SourceTracker for GitHubClient {
    fn fetch_epics(&mut self, repo_slug: &str) -> Result<Vec<Item>> {
        let search_query = format!("repo:{repo_slug} type:Epic is:issue");
        let mut cursor: Option<String> = None;
        let mut epics = Vec::new();

        loop {
            let data = self.graphql(
                EPIC_QUERY,
                json!({ "searchQuery": search_query, "cursor": cursor }),
            )?;
            let parsed: SearchData =
                serde_json::from_value(data).context("failed to decode epic search response")?;

            for node in parsed.search.nodes {
                if let Some(item) = item_from_node(node)? {
                    epics.push(item);
                }
            }

            if !parsed.search.page_info.has_next_page {
                break;
            }
            cursor = parsed.search.page_info.end_cursor;
        }

        Ok(epics)
    }

    fn fetch_sub_issues(&mut self, repo_slug: &str, number: u64) -> Result<Vec<Item>> {
        let Some((owner, repo)) = repo_slug.split_once('/') else {
            bail!("invalid repo slug (expected owner/repo): {repo_slug}");
        };

        let mut cursor: Option<String> = None;
        let mut subs = Vec::new();

        loop {
            let data = self.graphql(
                SUB_ISSUES_QUERY,
                json!({ "owner": owner, "repo": repo, "number": number, "cursor": cursor }),
            )?;
            let parsed: SubIssuesData =
                serde_json::from_value(data).context("failed to decode sub-issue response")?;
            let Some(connection) = parsed
                .repository
                .and_then(|repository| repository.issue)
                .map(|issue| issue.sub_issues)
            else {
                debug!(repo = repo_slug, number, "issue not found while fetching sub-issues");
                return Ok(subs);
            };

            for node in connection.nodes {
                if let Some(item) = item_from_node(node)? {
                    subs.push(item);
                }
            }

            if !connection.page_info.has_next_page {
                break;
            }
            cursor = connection.page_info.end_cursor;
        }

        Ok(subs)
    }

    fn append_migration_link(
        &mut self,
        issue_url: &str,
        jira_key: &str,
        browse_url: &str,
    ) -> Result<()> {
        let Some(caps) = ISSUE_URL.captures(issue_url) else {
            warn!(url = issue_url, "could not parse GitHub issue URL, skipping back-reference");
            return Ok(());
        };
        let endpoint = format!(
            "{}/repos/{}/{}/issues/{}",
            self.config.api_url, &caps[1], &caps[2], &caps[3]
        );

        let current: RestIssue = serde_json::from_value(self.rest_get(&endpoint)?)
            .context("failed to decode GitHub issue response")?;
        let current_body = current.body.unwrap_or_default();
        let new_body = format!("{current_body}\n\nMigrated to Jira: [{jira_key}]({browse_url})");

        self.rest_patch(&endpoint, &json!({ "body": new_body }))?;
        debug!(url = issue_url, jira_key, "updated source issue with migration link");
        Ok(())
    }
}

/// Decode one GraphQL issue node. Null and empty-object nodes (non-issue
/// search results) are skipped rather than treated as errors.
fn item_from_node(node: Value) -> Result<Option<Item>> {
    if node.is_null() {
        return Ok(None);
    }
    if node.as_object().is_some_and(|object| object.is_empty()) {
        return Ok(None);
    }
    let parsed: IssueNode =
        serde_json::from_value(node).context("failed to decode issue node")?;
    Ok(Some(Item {
        number: parsed.number,
        title: parsed.title,
        body: parsed.body,
        url: parsed.url,
        state: parsed.state,
        issue_type: parsed.issue_type.map(|issue_type| issue_type.name),
    }))
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

pub(crate) fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    search: SearchConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchConnection {
    page_info: PageInfo,
    nodes: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct SubIssuesData {
    repository: Option<RepositoryNode>,
}

#[derive(Debug, Deserialize)]
struct RepositoryNode {
    issue: Option<IssueWithSubs>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueWithSubs {
    sub_issues: SubIssuesConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubIssuesConnection {
    page_info: PageInfo,
    nodes: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueNode {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    url: String,
    state: crate::scan::ItemState,
    #[serde(default)]
    issue_type: Option<IssueTypeNode>,
}

#[derive(Debug, Deserialize)]
struct IssueTypeNode {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RestIssue {
    #[serde(default)]
    body: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::item_from_node;
    use crate::scan::ItemState;

    #[test]
    fn decodes_issue_node() {
        let node = json!({
            "number": 7,
            "title": "Epic: retries",
            "body": "body text",
            "url": "https://github.com/octo/widgets/issues/7",
            "state": "OPEN",
            "issueType": {"name": "Epic"}
        });
        let item = item_from_node(node).expect("decode").expect("item");
        assert_eq!(item.number, 7);
        assert_eq!(item.state, ItemState::Open);
        assert_eq!(item.issue_type.as_deref(), Some("Epic"));
    }

    #[test]
    fn null_and_empty_nodes_are_skipped() {
        assert!(item_from_node(json!(null)).expect("decode").is_none());
        assert!(item_from_node(json!({})).expect("decode").is_none());
    }

    #[test]
    fn missing_issue_type_decodes_as_none() {
        let node = json!({
            "number": 8,
            "title": "Sub",
            "body": null,
            "url": "https://github.com/octo/widgets/issues/8",
            "state": "CLOSED",
            "issueType": null
        });
        let item = item_from_node(node).expect("decode").expect("item");
        assert_eq!(item.state, ItemState::Closed);
        assert_eq!(item.issue_type, None);
        assert_eq!(item.body, None);
    }

    #[test]
    fn issue_url_pattern_rejects_non_issue_urls() {
        assert!(super::ISSUE_URL.captures("https://github.com/octo/widgets/pull/3").is_none());
        assert!(
            super::ISSUE_URL
                .captures("https://github.com/octo/widgets/issues/3")
                .is_some()
        );
    }
}

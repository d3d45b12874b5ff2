use std::env;
use std::fmt;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::adf::AdfNode;
use crate::github::{is_retryable_error, is_retryable_status};

pub const JIRA_CREDENTIALS_ENV: &str = "JIRA_USER_AND_TOKEN";

/// A destination issue as read back from the tracker. The description is the
/// rich-text block tree; absent or unreadable descriptions are `None`.
#[derive(Debug, Clone)]
pub struct JiraIssue {
    pub key: String,
    pub description: Option<AdfNode>,
}

/// Field payload for issue creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    pub project: String,
    pub summary: String,
    pub issue_type: String,
    pub description: String,
    pub category: Option<String>,
    pub parent: Option<String>,
}

/// Raised when a referenced destination issue no longer exists; the
/// reconciliation engine demotes this to a skip instead of failing the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueNotFound {
    pub key: String,
}

impl fmt::Display for IssueNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "jira issue {} not found", self.key)
    }
}

impl std::error::Error for IssueNotFound {}

/// Destination issue operations the core consumes.
pub trait IssueStore {
    fn get_issue(&mut self, key: &str) -> Result<JiraIssue>;
    /// Create an issue and return its new key.
    fn create_issue(&mut self, fields: &NewIssue) -> Result<String>;
    /// Overwrite the description field only; no other fields are touched.
    fn update_description(&mut self, key: &str, description: &str) -> Result<()>;
}

/// Categorical-field option management.
pub trait CategoryFieldStore {
    /// All option values of the named custom field, or `None` when the field
    /// (or its context) does not exist in the destination tracker.
    fn list_options(&mut self, field_name: &str) -> Result<Option<Vec<String>>>;
    fn add_option(&mut self, field_name: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct JiraClientConfig {
    pub base_url: String,
    pub user: String,
    pub token: String,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl JiraClientConfig {
    /// Build from the environment. `JIRA_USER_AND_TOKEN` must hold
    /// `user:token`.
    pub fn from_env(base_url: &str) -> Result<Self> {
        let credentials = match env::var(JIRA_CREDENTIALS_ENV) {
            Ok(value) if !value.trim().is_empty() => value,
            _ => bail!("{JIRA_CREDENTIALS_ENV} env var is required (format: user:token)"),
        };
        let Some((user, token)) = credentials.split_once(':') else {
            bail!("{JIRA_CREDENTIALS_ENV} must have the form user:token");
        };
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            user: user.to_string(),
            token: token.to_string(),
            timeout_ms: 30_000,
            max_retries: 2,
            retry_delay_ms: 500,
        })
    }
}

pub struct JiraClient {
    client: Client,
    config: JiraClientConfig,
    request_count: usize,
}

impl JiraClient {
    pub fn new(config: JiraClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build Jira HTTP client")?;
        Ok(Self {
            client,
            config,
            request_count: 0,
        })
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    fn get_json(&mut self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{path}", self.config.base_url);
        for attempt in 0..=self.config.max_retries {
            self.request_count += 1;
            let response = self
                .client
                .get(&url)
                .basic_auth(&self.config.user, Some(&self.config.token))
                .header("Accept", "application/json")
                .query(query)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::NOT_FOUND {
                        bail!(NotFoundStatus);
                    }
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("Jira API request failed with HTTP {status}: {path}");
                    }
                    return response
                        .json()
                        .context("failed to decode Jira API JSON response");
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context("failed to call Jira API");
                }
            }
        }

        bail!("Jira API request exhausted retry budget")
    }

    // Writes are attempted once; remote write failures abort the executor.
    fn send_write(&mut self, method: WriteMethod, path: &str, payload: &Value) -> Result<Value> {
        let url = format!("{}{path}", self.config.base_url);
        self.request_count += 1;
        let request = match method {
            WriteMethod::Post => self.client.post(&url),
            WriteMethod::Put => self.client.put(&url),
        };
        let response = request
            .basic_auth(&self.config.user, Some(&self.config.token))
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .context("failed to call Jira API")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            bail!("Jira API request failed with HTTP {status}: {path}: {detail}");
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        let text = response.text().unwrap_or_default();
        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).context("failed to decode Jira API JSON response")
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let delay = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        sleep(Duration::from_millis(delay));
    }

    /// Find a custom field by name, case-insensitively.
    fn find_field(&mut self, name: &str) -> Result<Option<FieldInfo>> {
        let fields: Vec<FieldInfo> = serde_json::from_value(self.get_json("/rest/api/3/field", &[])?)
            .context("failed to decode Jira field list")?;
        let name_lower = name.to_lowercase();
        Ok(fields
            .into_iter()
            .filter(|field| field.custom)
            .find(|field| field.name.to_lowercase() == name_lower))
    }

    fn first_context(&mut self, field_id: &str) -> Result<Option<String>> {
        let response =
            self.get_json(&format!("/rest/api/3/field/{field_id}/context"), &[])?;
        let parsed: ContextPage =
            serde_json::from_value(response).context("failed to decode Jira field contexts")?;
        Ok(parsed.values.into_iter().next().map(|context| context.id))
    }

    fn field_context(&mut self, field_name: &str) -> Result<Option<(String, String)>> {
        let Some(field) = self.find_field(field_name)? else {
            warn!(field = field_name, "custom field not found in Jira");
            return Ok(None);
        };
        let Some(context_id) = self.first_context(&field.id)? else {
            warn!(field = field_name, "no contexts for custom field");
            return Ok(None);
        };
        Ok(Some((field.id, context_id)))
    }

    fn options(&mut self, field_id: &str, context_id: &str) -> Result<Vec<String>> {
        let path = format!("/rest/api/3/field/{field_id}/context/{context_id}/option");
        let mut values = Vec::new();
        let mut start_at: usize = 0;
        loop {
            let response = self.get_json(
                &path,
                &[
                    ("startAt", start_at.to_string()),
                    ("maxResults", "1000".to_string()),
                ],
            )?;
            let page: OptionPage =
                serde_json::from_value(response).context("failed to decode Jira field options")?;
            let fetched = page.values.len();
            values.extend(page.values.into_iter().map(|option| option.value));
            if page.is_last || fetched == 0 {
                break;
            }
            start_at += fetched;
        }
        Ok(values)
    }
}

impl IssueStore for JiraClient {
    fn get_issue(&mut self, key: &str) -> Result<JiraIssue> {
        let response = match self.get_json(&format!("/rest/api/3/issue/{key}"), &[]) {
            Err(err) if err.downcast_ref::<NotFoundStatus>().is_some() => {
                return Err(IssueNotFound {
                    key: key.to_string(),
                }
                .into());
            }
            other => other?,
        };
        let description = response
            .get("fields")
            .and_then(|fields| fields.get("description"))
            .filter(|value| !value.is_null())
            .map(AdfNode::from_value);
        Ok(JiraIssue {
            key: key.to_string(),
            description,
        })
    }

    fn create_issue(&mut self, fields: &NewIssue) -> Result<String> {
        let mut payload = json!({
            "project": { "key": fields.project },
            "summary": fields.summary,
            "issuetype": { "name": fields.issue_type },
            "description": fields.description,
        });
        if let Some(category) = &fields.category
            && !category.is_empty()
        {
            payload["components"] = json!([{ "name": category }]);
        }
        if let Some(parent) = &fields.parent {
            payload["parent"] = json!({ "key": parent });
        }

        // v2 endpoint: the description is plain wiki markup, not ADF.
        let response = self.send_write(
            WriteMethod::Post,
            "/rest/api/2/issue",
            &json!({ "fields": payload }),
        )?;
        let created: CreatedIssue = serde_json::from_value(response)
            .context("failed to decode Jira issue creation response")?;
        debug!(key = %created.key, summary = %fields.summary, "created jira issue");
        Ok(created.key)
    }

    fn update_description(&mut self, key: &str, description: &str) -> Result<()> {
        self.send_write(
            WriteMethod::Put,
            &format!("/rest/api/2/issue/{key}"),
            &json!({ "fields": { "description": description } }),
        )?;
        Ok(())
    }
}

impl CategoryFieldStore for JiraClient {
    fn list_options(&mut self, field_name: &str) -> Result<Option<Vec<String>>> {
        let Some((field_id, context_id)) = self.field_context(field_name)? else {
            return Ok(None);
        };
        Ok(Some(self.options(&field_id, &context_id)?))
    }

    fn add_option(&mut self, field_name: &str, value: &str) -> Result<()> {
        let Some((field_id, context_id)) = self.field_context(field_name)? else {
            bail!("custom field '{field_name}' not found, cannot create options");
        };
        self.send_write(
            WriteMethod::Post,
            &format!("/rest/api/3/field/{field_id}/context/{context_id}/option"),
            &json!({ "options": [{ "value": value }] }),
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum WriteMethod {
    Post,
    Put,
}

/// Internal marker for a 404 on a read path.
#[derive(Debug, Clone, Copy)]
struct NotFoundStatus;

impl fmt::Display for NotFoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Jira API returned HTTP 404")
    }
}

impl std::error::Error for NotFoundStatus {}

#[derive(Debug, Deserialize)]
struct FieldInfo {
    id: String,
    name: String,
    #[serde(default)]
    custom: bool,
}

#[derive(Debug, Deserialize)]
struct ContextPage {
    #[serde(default)]
    values: Vec<ContextInfo>,
}

#[derive(Debug, Deserialize)]
struct ContextInfo {
    id: String,
}

#[derive(Debug, Deserialize)]
struct OptionPage {
    #[serde(default)]
    values: Vec<OptionInfo>,
    #[serde(default = "default_is_last", rename = "isLast")]
    is_last: bool,
}

fn default_is_last() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct OptionInfo {
    value: String,
}

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    key: String,
}

#[cfg(test)]
mod tests {
    use super::{IssueNotFound, JiraClientConfig};

    #[test]
    fn issue_not_found_formats_key() {
        let error = anyhow::Error::new(IssueNotFound {
            key: "PROJ-9".to_string(),
        });
        assert!(error.to_string().contains("PROJ-9"));
        assert!(error.downcast_ref::<IssueNotFound>().is_some());
    }

    #[test]
    fn credentials_env_must_contain_colon() {
        // Serialized through a single env var; split on the first colon only.
        unsafe {
            std::env::set_var(super::JIRA_CREDENTIALS_ENV, "user@example.com:tok:en");
        }
        let config = JiraClientConfig::from_env("https://example.atlassian.net/").expect("config");
        assert_eq!(config.user, "user@example.com");
        assert_eq!(config.token, "tok:en");
        assert_eq!(config.base_url, "https://example.atlassian.net");
        unsafe {
            std::env::remove_var(super::JIRA_CREDENTIALS_ENV);
        }
    }
}

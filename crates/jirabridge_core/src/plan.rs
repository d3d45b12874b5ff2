use std::collections::BTreeSet;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::config::{Config, RepoConfig};
use crate::fingerprint::{body_hash, extract_hash};
use crate::jira::{IssueNotFound, IssueStore};
use crate::rules::{resolve_rule, strip_title};
use crate::scan::{Item, ItemState, ScannedEpic};

pub const EPIC_TYPE: &str = "Epic";

static REPO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://github\.com/([^/]+/[^/]+)/").expect("repo url pattern")
});

/// Fields shared by `create` and `create_failed` entries.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CreateEntry {
    pub github_ref: String,
    pub github_title: String,
    /// Kept for execution, omitted from the rendered plan for readability.
    #[serde(skip_serializing)]
    pub github_body: Option<String>,
    pub jira_issue_type: String,
    pub jira_project: String,
    pub category: String,
    pub summary: String,
    /// Resolved destination parent key, when the epic is already migrated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jira_parent: Option<String>,
    /// Pending reference to the epic's own source URL, resolved by the
    /// executor once the epic has been created in the same run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jira_parent_github: Option<String>,
}

/// One step of the migration plan. Entries are constructed once and either
/// rendered or consumed exactly once by the executor.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlanEntry {
    Skip {
        github_ref: String,
        github_title: String,
        jira_key: String,
        reason: String,
    },
    Update {
        github_ref: String,
        github_title: String,
        jira_key: String,
        reason: String,
        #[serde(skip_serializing)]
        github_body: Option<String>,
    },
    Create(CreateEntry),
    CreateFailed {
        #[serde(flatten)]
        entry: CreateEntry,
        reason: String,
    },
    CreateCategoryOption {
        field: String,
        value: String,
    },
}

impl PlanEntry {
    /// The source issue URL this entry acts on; `None` for category-option
    /// entries.
    pub fn github_ref(&self) -> Option<&str> {
        match self {
            Self::Skip { github_ref, .. }
            | Self::Update { github_ref, .. }
            | Self::Create(CreateEntry { github_ref, .. })
            | Self::CreateFailed {
                entry: CreateEntry { github_ref, .. },
                ..
            } => Some(github_ref),
            Self::CreateCategoryOption { .. } => None,
        }
    }
}

/// Outcome of the per-item update check against the destination tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDecision {
    Skip(String),
    Update(String),
}

/// Decides whether an already-migrated item needs its destination
/// description refreshed.
pub trait UpdateProbe {
    fn check(&mut self, body: Option<&str>, jira_key: &str) -> Result<UpdateDecision>;
}

/// Any issue store can probe: fetch the issue, extract the stored
/// fingerprint, compare against the current source body. A missing issue or
/// a missing fingerprint is a conservative skip, never an update.
impl<S: IssueStore> UpdateProbe for S {
    fn check(&mut self, body: Option<&str>, jira_key: &str) -> Result<UpdateDecision> {
        let issue = match self.get_issue(jira_key) {
            Err(error) if error.downcast_ref::<IssueNotFound>().is_some() => {
                warn!(jira_key, "jira issue not found (404), skipping");
                return Ok(UpdateDecision::Skip(format!(
                    "Jira issue {jira_key} not found"
                )));
            }
            other => other?,
        };

        match extract_hash(issue.description.as_ref()) {
            None => Ok(UpdateDecision::Skip("Already migrated (no hash)".to_string())),
            Some(stored) if stored == body_hash(body) => Ok(UpdateDecision::Skip(
                "Already migrated (hash matches)".to_string(),
            )),
            Some(_) => Ok(UpdateDecision::Update(
                "Description changed (hash mismatch)".to_string(),
            )),
        }
    }
}

/// Classify scanned groups into an ordered plan.
///
/// Per group: the epic's entry, immediately followed by its children's
/// entries; groups in fetch order. With `probe` set to `None` (skip-update-
/// check mode) already-migrated items are unconditionally skipped without a
/// destination round trip. `gap_set` is computed once per run and passed in
/// unchanged for every group.
pub fn build_plan(
    groups: &[ScannedEpic],
    config: &Config,
    gap_set: &BTreeSet<String>,
    mut probe: Option<&mut (dyn UpdateProbe + '_)>,
) -> Result<Vec<PlanEntry>> {
    let mut entries = Vec::new();

    for group in groups {
        let epic = &group.epic;

        if let Some(jira_key) = &group.jira_key {
            entries.push(classify_migrated(epic, jira_key, probe.as_deref_mut())?);
        } else {
            // A closed epic that was never migrated is abandoned: the whole
            // group is dropped, children included.
            if epic.state == ItemState::Closed {
                continue;
            }
            let Some(repo) = repo_config_for_url(&epic.url, &epic.title, config) else {
                continue;
            };
            let entry = create_entry(epic, repo, config, EPIC_TYPE.to_string(), None, None)?;
            entries.push(gate(entry, gap_set));
        }

        for sub in &group.subs {
            let issue = &sub.issue;
            if let Some(jira_key) = &sub.jira_key {
                entries.push(classify_migrated(issue, jira_key, probe.as_deref_mut())?);
                continue;
            }
            let Some(repo) = repo_config_for_url(&issue.url, &issue.title, config) else {
                continue;
            };
            let issue_type = config.destination_type(issue.issue_type.as_deref());
            let (parent, parent_github) = match &group.jira_key {
                Some(key) => (Some(key.clone()), None),
                None => (None, Some(epic.url.clone())),
            };
            let entry = create_entry(issue, repo, config, issue_type, parent, parent_github)?;
            entries.push(gate(entry, gap_set));
        }
    }

    Ok(entries)
}

/// Render the plan as YAML, with source bodies omitted.
pub fn render_plan(plan: &[PlanEntry]) -> Result<String> {
    Ok(serde_yaml::to_string(plan)?)
}

fn classify_migrated(
    item: &Item,
    jira_key: &str,
    probe: Option<&mut (dyn UpdateProbe + '_)>,
) -> Result<PlanEntry> {
    let decision = match probe {
        Some(probe) => probe.check(item.body.as_deref(), jira_key)?,
        None => UpdateDecision::Skip("Already migrated".to_string()),
    };
    Ok(match decision {
        UpdateDecision::Skip(reason) => PlanEntry::Skip {
            github_ref: item.url.clone(),
            github_title: item.title.clone(),
            jira_key: jira_key.to_string(),
            reason,
        },
        UpdateDecision::Update(reason) => PlanEntry::Update {
            github_ref: item.url.clone(),
            github_title: item.title.clone(),
            jira_key: jira_key.to_string(),
            reason,
            github_body: item.body.clone(),
        },
    })
}

fn create_entry(
    item: &Item,
    repo: &RepoConfig,
    config: &Config,
    issue_type: String,
    jira_parent: Option<String>,
    jira_parent_github: Option<String>,
) -> Result<CreateEntry> {
    let resolution = resolve_rule(&item.title, repo, config)?;
    let summary = format!(
        "{} {}",
        resolution.prefix,
        strip_title(&resolution.cleaned_title, &resolution.strip_patterns)?
    );
    Ok(CreateEntry {
        github_ref: item.url.clone(),
        github_title: item.title.clone(),
        github_body: item.body.clone(),
        jira_issue_type: issue_type,
        jira_project: config.jira_project.clone(),
        category: resolution.category,
        summary,
        jira_parent,
        jira_parent_github,
    })
}

/// Demote a create to `create_failed` when its category is a known gap.
/// Empty categories pass through unconditionally.
fn gate(entry: CreateEntry, gap_set: &BTreeSet<String>) -> PlanEntry {
    if !entry.category.is_empty() && gap_set.contains(&entry.category) {
        let reason = format!("missing category option '{}'", entry.category);
        PlanEntry::CreateFailed { entry, reason }
    } else {
        PlanEntry::Create(entry)
    }
}

fn repo_config_for_url<'a>(url: &str, title: &str, config: &'a Config) -> Option<&'a RepoConfig> {
    let caps = REPO_URL.captures(url)?;
    let slug = &caps[1];
    let repo = config.repo(slug);
    if repo.is_none() {
        warn!(slug, url, title, "no repo config for issue, skipping");
    }
    repo
}

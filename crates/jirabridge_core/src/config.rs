use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Built-in title strip pattern: one leading bracketed tag.
pub const DEFAULT_TITLE_STRIP: &str = r"^\[.*?\]\s*";
pub const DEFAULT_WORKTYPE: &str = "Task";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub jira: JiraSection,
    #[serde(default)]
    pub jira_project: String,
    #[serde(default)]
    pub category_field: String,
    #[serde(default)]
    pub default_worktype: Option<String>,
    #[serde(default)]
    pub type_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub github_title_strip: Option<OneOrMany>,
    #[serde(default)]
    pub repos: Vec<RepoConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct JiraSection {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RepoConfig {
    #[serde(default)]
    pub github: String,
    #[serde(default)]
    pub jira_prefix: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub github_title_strip: Option<OneOrMany>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Rule {
    #[serde(rename = "match")]
    pub matcher: RuleMatch,
    #[serde(default)]
    pub jira_prefix: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub github_title_strip: Option<OneOrMany>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RuleMatch {
    pub issue_title: String,
}

/// A strip-pattern value that may be written as a bare string or a list.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(value) => vec![value.clone()],
            Self::Many(values) => values.clone(),
        }
    }
}

impl Config {
    pub fn default_worktype(&self) -> &str {
        self.default_worktype.as_deref().unwrap_or(DEFAULT_WORKTYPE)
    }

    /// Global strip patterns: config value or the built-in default.
    pub fn global_strip_patterns(&self) -> Vec<String> {
        self.github_title_strip
            .as_ref()
            .map(OneOrMany::to_vec)
            .unwrap_or_else(|| vec![DEFAULT_TITLE_STRIP.to_string()])
    }

    /// Map a source issue-type label to the destination type name.
    pub fn destination_type(&self, source_type: Option<&str>) -> String {
        source_type
            .and_then(|name| self.type_mapping.get(name))
            .cloned()
            .unwrap_or_else(|| self.default_worktype().to_string())
    }

    /// Find the repo entry matching a `owner/repo` slug.
    pub fn repo(&self, slug: &str) -> Option<&RepoConfig> {
        self.repos.iter().find(|repo| repo.github == slug)
    }

    pub fn validate(&self) -> Result<()> {
        if self.jira.url.trim().is_empty() {
            bail!("config must contain jira.url");
        }
        if self.jira_project.trim().is_empty() {
            bail!("config must contain jira_project");
        }
        if self.category_field.trim().is_empty() {
            bail!("config must contain category_field");
        }
        if self.repos.is_empty() {
            bail!("config must contain at least one repo entry");
        }
        for repo in &self.repos {
            if repo.github.trim().is_empty() {
                bail!("repo entry missing required key: github");
            }
            if repo.jira_prefix.is_none() {
                bail!("repo entry missing required key: jira_prefix ({})", repo.github);
            }
            if repo.category.is_none() {
                bail!("repo entry missing required key: category ({})", repo.github);
            }
        }
        Ok(())
    }
}

impl RepoConfig {
    /// Guaranteed non-None after `Config::validate`.
    pub fn jira_prefix(&self) -> &str {
        self.jira_prefix.as_deref().unwrap_or_default()
    }

    pub fn category(&self) -> &str {
        self.category.as_deref().unwrap_or_default()
    }

    /// Repo-level strip patterns, falling back to the global default chain.
    pub fn strip_patterns(&self, config: &Config) -> Vec<String> {
        self.github_title_strip
            .as_ref()
            .map(OneOrMany::to_vec)
            .unwrap_or_else(|| config.global_strip_patterns())
    }
}

/// Load and validate a YAML config file.
pub fn load_config(config_path: &Path) -> Result<Config> {
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let config: Config = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config in {}", config_path.display()))?;
    Ok(config)
}

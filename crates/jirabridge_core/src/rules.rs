use anyhow::{Context, Result};
use regex::Regex;

use crate::config::{Config, RepoConfig};

/// Outcome of rule resolution for one issue title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub prefix: String,
    pub category: String,
    pub strip_patterns: Vec<String>,
    /// Title with the matched rule prefix removed and left-trimmed; the
    /// original title when no rule matched.
    pub cleaned_title: String,
}

/// Resolve prefix, category, and strip patterns for an issue title.
///
/// Rules are scanned in declaration order and the first whose `issue_title`
/// pattern matches at the start of the title wins; declaration order is the
/// tie-break and is load-bearing. Unmatched titles fall back to the repo
/// defaults. Strip-pattern precedence: rule > repo > global > built-in.
pub fn resolve_rule(title: &str, repo: &RepoConfig, config: &Config) -> Result<Resolution> {
    let repo_patterns = repo.strip_patterns(config);

    for rule in &repo.rules {
        let pattern = &rule.matcher.issue_title;
        let re = Regex::new(pattern)
            .with_context(|| format!("invalid rule pattern for {}: {pattern}", repo.github))?;
        let Some(found) = re.find(title).filter(|m| m.start() == 0) else {
            continue;
        };
        let prefix = rule
            .jira_prefix
            .as_deref()
            .unwrap_or_else(|| repo.jira_prefix());
        let category = rule.category.as_deref().unwrap_or_else(|| repo.category());
        let patterns = rule
            .github_title_strip
            .as_ref()
            .map(crate::config::OneOrMany::to_vec)
            .unwrap_or_else(|| repo_patterns.clone());
        return Ok(Resolution {
            prefix: prefix.to_string(),
            category: category.to_string(),
            strip_patterns: patterns,
            cleaned_title: title[found.end()..].trim_start().to_string(),
        });
    }

    Ok(Resolution {
        prefix: repo.jira_prefix().to_string(),
        category: repo.category().to_string(),
        strip_patterns: repo_patterns,
        cleaned_title: title.to_string(),
    })
}

/// Apply each strip pattern in order as a substitute-then-trim pass; the
/// output of one pattern feeds the next.
pub fn strip_title(title: &str, patterns: &[String]) -> Result<String> {
    let mut current = title.to_string();
    for pattern in patterns {
        let re = Regex::new(pattern)
            .with_context(|| format!("invalid title strip pattern: {pattern}"))?;
        current = re.replace_all(&current, "").trim().to_string();
    }
    Ok(current)
}

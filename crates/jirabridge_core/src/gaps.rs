use std::collections::BTreeSet;

use crate::config::Config;
use crate::plan::PlanEntry;

/// Union of every repo's default category and every rule override, across
/// ALL configured repos — not just the repos selected for a run, so a
/// partial run still reports the full gap surface. Empty values are
/// excluded; an empty category is never gated.
pub fn required_categories(config: &Config) -> BTreeSet<String> {
    let mut needed = BTreeSet::new();
    for repo in &config.repos {
        if !repo.category().is_empty() {
            needed.insert(repo.category().to_string());
        }
        for rule in &repo.rules {
            if let Some(category) = &rule.category
                && !category.is_empty()
            {
                needed.insert(category.clone());
            }
        }
    }
    needed
}

/// Categories required by configuration but absent from the destination
/// tracker, sorted lexicographically for deterministic output.
pub fn find_gaps(required: &BTreeSet<String>, existing: &BTreeSet<String>) -> Vec<String> {
    required.difference(existing).cloned().collect()
}

/// One `create_category_option` entry per missing value; these precede all
/// issue entries in the plan.
pub fn category_option_entries(field: &str, missing: &[String]) -> Vec<PlanEntry> {
    let mut sorted = missing.to_vec();
    sorted.sort();
    sorted
        .into_iter()
        .map(|value| PlanEntry::CreateCategoryOption {
            field: field.to_string(),
            value,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{category_option_entries, find_gaps, required_categories};
    use crate::config::{Config, RepoConfig, Rule, RuleMatch};
    use crate::plan::PlanEntry;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|value| (*value).to_string()).collect()
    }

    #[test]
    fn required_categories_include_rule_overrides() {
        let config = Config {
            repos: vec![
                RepoConfig {
                    github: "octo/widgets".to_string(),
                    jira_prefix: Some("W".to_string()),
                    category: Some("Widgets".to_string()),
                    github_title_strip: None,
                    rules: vec![Rule {
                        matcher: RuleMatch {
                            issue_title: "^Bug".to_string(),
                        },
                        jira_prefix: None,
                        category: Some("Widget Bugs".to_string()),
                        github_title_strip: None,
                    }],
                },
                RepoConfig {
                    github: "octo/gears".to_string(),
                    jira_prefix: Some("G".to_string()),
                    category: Some("".to_string()),
                    github_title_strip: None,
                    rules: vec![],
                },
            ],
            ..Config::default()
        };

        // The empty category from octo/gears is excluded.
        assert_eq!(
            required_categories(&config),
            set(&["Widget Bugs", "Widgets"])
        );
    }

    #[test]
    fn gaps_are_sorted_set_difference() {
        let required = set(&["Drivers", "Alpha", "Widgets"]);
        let existing = set(&["Widgets"]);
        assert_eq!(find_gaps(&required, &existing), vec!["Alpha", "Drivers"]);
        assert!(find_gaps(&existing, &existing).is_empty());
    }

    #[test]
    fn gap_detection_is_case_sensitive() {
        let required = set(&["Drivers"]);
        let existing = set(&["drivers"]);
        assert_eq!(find_gaps(&required, &existing), vec!["Drivers"]);
    }

    #[test]
    fn option_entries_are_sorted() {
        let entries = category_option_entries(
            "Product Components",
            &["Zeta".to_string(), "Alpha".to_string()],
        );
        let values: Vec<&str> = entries
            .iter()
            .map(|entry| match entry {
                PlanEntry::CreateCategoryOption { value, .. } => value.as_str(),
                other => panic!("unexpected entry: {other:?}"),
            })
            .collect();
        assert_eq!(values, vec!["Alpha", "Zeta"]);
    }
}

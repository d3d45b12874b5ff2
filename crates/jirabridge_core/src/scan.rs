use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::github::SourceTracker;

/// Matches the migration back-reference this tool writes into issue bodies,
/// e.g. `Migrated to Jira: [PROJ-54](https://example.atlassian.net/browse/PROJ-54)`.
static JIRA_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:Migrated to Jira|Jira Link)\s*:\s*\[([A-Z][A-Z0-9]+-\d+)\]")
        .expect("jira link pattern")
});

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemState {
    Open,
    Closed,
}

/// One source-side issue or epic snapshot, immutable for the run.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Item {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub url: String,
    pub state: ItemState,
    pub issue_type: Option<String>,
}

impl Item {
    /// Parse the body for an existing migration reference and return the
    /// destination issue key, if any.
    pub fn jira_key(&self) -> Option<String> {
        let body = self.body.as_deref()?;
        JIRA_LINK
            .captures(body)
            .map(|caps| caps[1].to_string())
    }
}

/// A sub-issue paired with its detected migration state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedSub {
    pub issue: Item,
    pub jira_key: Option<String>,
}

/// An epic paired with its sub-issues; the unit the reconciliation engine
/// classifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedEpic {
    pub epic: Item,
    pub jira_key: Option<String>,
    pub subs: Vec<ScannedSub>,
}

/// Scan a single repo: fetch epics and their sub-issues, detect migration
/// links. A closed epic that was never migrated is abandoned, not pending:
/// it is dropped here together with its children, which are never fetched.
pub fn scan_repo<S: SourceTracker + ?Sized>(
    tracker: &mut S,
    repo_slug: &str,
) -> Result<Vec<ScannedEpic>> {
    info!(repo = repo_slug, "scanning for epics");
    let epics = tracker.fetch_epics(repo_slug)?;
    info!(repo = repo_slug, count = epics.len(), "epics found");

    let mut results = Vec::new();
    for epic in epics {
        let epic_jira_key = epic.jira_key();
        debug!(
            number = epic.number,
            title = %epic.title,
            jira_key = epic_jira_key.as_deref().unwrap_or(""),
            "epic"
        );

        if epic.state == ItemState::Closed && epic_jira_key.is_none() {
            info!(
                number = epic.number,
                title = %epic.title,
                "skipping closed non-migrated epic and its sub-issues"
            );
            continue;
        }

        let subs = tracker.fetch_sub_issues(repo_slug, epic.number)?;
        let mut sub_results = Vec::new();
        for sub in subs {
            let sub_jira_key = sub.jira_key();
            debug!(
                number = sub.number,
                title = %sub.title,
                jira_key = sub_jira_key.as_deref().unwrap_or(""),
                "sub-issue"
            );
            sub_results.push(ScannedSub {
                issue: sub,
                jira_key: sub_jira_key,
            });
        }

        results.push(ScannedEpic {
            epic,
            jira_key: epic_jira_key,
            subs: sub_results,
        });
    }

    Ok(results)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;

    use anyhow::Result;

    use super::Item;
    use crate::github::SourceTracker;

    /// In-memory source tracker shared by the scan, plan, and executor tests.
    #[derive(Default)]
    pub struct MockTracker {
        pub epics: Vec<Item>,
        pub subs_by_epic: BTreeMap<u64, Vec<Item>>,
        pub appended_links: Vec<(String, String)>,
        pub fetched_sub_lists: Vec<u64>,
    }

    impl SourceTracker for MockTracker {
        fn fetch_epics(&mut self, _repo_slug: &str) -> Result<Vec<Item>> {
            Ok(self.epics.clone())
        }

        fn fetch_sub_issues(&mut self, _repo_slug: &str, number: u64) -> Result<Vec<Item>> {
            self.fetched_sub_lists.push(number);
            Ok(self.subs_by_epic.get(&number).cloned().unwrap_or_default())
        }

        fn append_migration_link(
            &mut self,
            issue_url: &str,
            jira_key: &str,
            _browse_url: &str,
        ) -> Result<()> {
            self.appended_links
                .push((issue_url.to_string(), jira_key.to_string()));
            Ok(())
        }
    }

    pub fn item(number: u64, title: &str, body: Option<&str>, state: super::ItemState) -> Item {
        Item {
            number,
            title: title.to_string(),
            body: body.map(str::to_string),
            url: format!("https://github.com/octo/widgets/issues/{number}"),
            state,
            issue_type: None,
        }
    }
}

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::fingerprint::build_description;
use crate::github::SourceTracker;
use crate::jira::{CategoryFieldStore, IssueStore, NewIssue};
use crate::plan::{CreateEntry, EPIC_TYPE, PlanEntry};

/// The executor's strictly ordered passes. No pass begins until the prior
/// pass has fully completed; an error aborts the remaining sequence while
/// completed passes stand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    CategoryOptions,
    Epics,
    Children,
    Updates,
}

const PASS_SEQUENCE: [Pass; 4] = [
    Pass::CategoryOptions,
    Pass::Epics,
    Pass::Children,
    Pass::Updates,
];

/// Summary of one executor run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub options_created: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped_missing_parent: usize,
}

/// Replay a plan against the destination tracker.
///
/// The pending-link map (source URL -> newly created key) grows during the
/// epic pass and resolves child parent references in the child pass. Any
/// remote write failure is fatal; nothing is rolled back.
pub fn execute_plan<J, S>(
    plan: &[PlanEntry],
    config: &Config,
    jira: &mut J,
    source: &mut S,
) -> Result<ExecutionReport>
where
    J: IssueStore + CategoryFieldStore,
    S: SourceTracker,
{
    let mut report = ExecutionReport::default();
    let mut pending_links: BTreeMap<String, String> = BTreeMap::new();

    for pass in PASS_SEQUENCE {
        match pass {
            Pass::CategoryOptions => run_category_options(plan, config, jira, &mut report)?,
            Pass::Epics => {
                run_epic_creates(plan, config, jira, source, &mut pending_links, &mut report)?;
            }
            Pass::Children => {
                run_child_creates(plan, config, jira, source, &mut pending_links, &mut report)?;
            }
            Pass::Updates => run_updates(plan, jira, &mut report)?,
        }
    }

    Ok(report)
}

fn run_category_options<J: CategoryFieldStore>(
    plan: &[PlanEntry],
    config: &Config,
    jira: &mut J,
    report: &mut ExecutionReport,
) -> Result<()> {
    let values: Vec<&str> = plan
        .iter()
        .filter_map(|entry| match entry {
            PlanEntry::CreateCategoryOption { value, .. } => Some(value.as_str()),
            _ => None,
        })
        .collect();
    if values.is_empty() {
        return Ok(());
    }

    let field_name = &config.category_field;
    let existing = jira
        .list_options(field_name)?
        .with_context(|| format!("custom field '{field_name}' not found, cannot create options"))?;
    let mut existing_lower: Vec<String> =
        existing.iter().map(|value| value.to_lowercase()).collect();

    for value in values {
        if existing_lower.contains(&value.to_lowercase()) {
            info!(value, "field option already exists, skipping");
            continue;
        }
        info!(value, field = %field_name, "creating field option");
        jira.add_option(field_name, value)?;
        existing_lower.push(value.to_lowercase());
        report.options_created += 1;
    }
    Ok(())
}

fn run_epic_creates<J, S>(
    plan: &[PlanEntry],
    config: &Config,
    jira: &mut J,
    source: &mut S,
    pending_links: &mut BTreeMap<String, String>,
    report: &mut ExecutionReport,
) -> Result<()>
where
    J: IssueStore,
    S: SourceTracker,
{
    for entry in plan {
        let PlanEntry::Create(create) = entry else {
            continue;
        };
        if create.jira_issue_type != EPIC_TYPE {
            continue;
        }
        create_one(create, None, config, jira, source, pending_links, report)?;
    }
    Ok(())
}

fn run_child_creates<J, S>(
    plan: &[PlanEntry],
    config: &Config,
    jira: &mut J,
    source: &mut S,
    pending_links: &mut BTreeMap<String, String>,
    report: &mut ExecutionReport,
) -> Result<()>
where
    J: IssueStore,
    S: SourceTracker,
{
    for entry in plan {
        let PlanEntry::Create(create) = entry else {
            continue;
        };
        if create.jira_issue_type == EPIC_TYPE {
            continue;
        }

        let parent = match (&create.jira_parent, &create.jira_parent_github) {
            (Some(key), _) => Some(key.clone()),
            (None, Some(parent_url)) => match pending_links.get(parent_url) {
                Some(key) => Some(key.clone()),
                None => {
                    warn!(
                        github_ref = %create.github_ref,
                        parent = %parent_url,
                        "parent epic not created in this run, skipping"
                    );
                    report.skipped_missing_parent += 1;
                    continue;
                }
            },
            (None, None) => None,
        };

        create_one(create, parent, config, jira, source, pending_links, report)?;
    }
    Ok(())
}

fn run_updates<J: IssueStore>(
    plan: &[PlanEntry],
    jira: &mut J,
    report: &mut ExecutionReport,
) -> Result<()> {
    for entry in plan {
        let PlanEntry::Update {
            github_ref,
            github_title,
            jira_key,
            github_body,
            ..
        } = entry
        else {
            continue;
        };
        info!(jira_key = %jira_key, title = %github_title, "updating description");
        let description = build_description(github_body.as_deref(), github_ref);
        jira.update_description(jira_key, &description)
            .with_context(|| format!("failed to update {jira_key} ({github_ref})"))?;
        report.updated += 1;
    }
    Ok(())
}

fn create_one<J, S>(
    create: &CreateEntry,
    parent: Option<String>,
    config: &Config,
    jira: &mut J,
    source: &mut S,
    pending_links: &mut BTreeMap<String, String>,
    report: &mut ExecutionReport,
) -> Result<()>
where
    J: IssueStore,
    S: SourceTracker,
{
    let description = build_description(create.github_body.as_deref(), &create.github_ref);
    let fields = NewIssue {
        project: create.jira_project.clone(),
        summary: create.summary.clone(),
        issue_type: create.jira_issue_type.clone(),
        description,
        category: if create.category.is_empty() {
            None
        } else {
            Some(create.category.clone())
        },
        parent,
    };

    info!(
        issue_type = %create.jira_issue_type,
        project = %create.jira_project,
        summary = %create.summary,
        "creating jira issue"
    );
    let jira_key = jira
        .create_issue(&fields)
        .with_context(|| format!("failed to create issue for {}", create.github_ref))?;
    info!(jira_key = %jira_key, "created");

    pending_links.insert(create.github_ref.clone(), jira_key.clone());
    report.created += 1;

    let browse_url = format!("{}/browse/{jira_key}", config.jira.url.trim_end_matches('/'));
    source.append_migration_link(&create.github_ref, &jira_key, &browse_url)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::execute_plan;
    use crate::fingerprint::body_hash;
    use crate::plan::test_support::{MockJira, adf_with_hash, test_config};
    use crate::plan::{PlanEntry, build_plan};
    use crate::scan::test_support::{MockTracker, item};
    use crate::scan::{ItemState, ScannedEpic, ScannedSub, scan_repo};

    fn scanned(epics: Vec<(crate::scan::Item, Vec<crate::scan::Item>)>) -> Vec<ScannedEpic> {
        epics
            .into_iter()
            .map(|(epic, subs)| {
                let jira_key = epic.jira_key();
                ScannedEpic {
                    jira_key,
                    subs: subs
                        .into_iter()
                        .map(|issue| {
                            let jira_key = issue.jira_key();
                            ScannedSub { issue, jira_key }
                        })
                        .collect(),
                    epic,
                }
            })
            .collect()
    }

    #[test]
    fn creates_epics_before_children_and_links_parents() {
        let config = test_config();
        let epic = item(1, "Epic: retries", Some("epic body"), ItemState::Open);
        let sub = item(10, "Sub task", Some("sub body"), ItemState::Open);
        let groups = scanned(vec![(epic, vec![sub])]);
        let plan = build_plan(&groups, &config, &BTreeSet::new(), None).expect("plan");

        let mut jira = MockJira::with_field();
        let mut tracker = MockTracker::default();
        let report = execute_plan(&plan, &config, &mut jira, &mut tracker).expect("execute");

        assert_eq!(report.created, 2);
        assert_eq!(jira.created.len(), 2);
        assert_eq!(jira.created[0].issue_type, "Epic");
        // The child resolves its parent from the key minted in the epic pass.
        assert_eq!(jira.created[1].parent.as_deref(), Some("PROJ-101"));
        // Both issues got a back-reference appended on the source side.
        assert_eq!(tracker.appended_links.len(), 2);
        assert_eq!(
            tracker.appended_links[0],
            (
                "https://github.com/octo/widgets/issues/1".to_string(),
                "PROJ-101".to_string()
            )
        );
    }

    #[test]
    fn child_with_unresolved_parent_is_warned_and_dropped() {
        let config = test_config();
        // Hand-build a plan whose child references an epic that is not in
        // the plan (e.g. dropped by a config mismatch).
        let groups = scanned(vec![(
            item(1, "Epic", None, ItemState::Open),
            vec![item(10, "Child", None, ItemState::Open)],
        )]);
        let full = build_plan(&groups, &config, &BTreeSet::new(), None).expect("plan");
        let children_only: Vec<PlanEntry> = full
            .into_iter()
            .filter(|entry| !matches!(entry, PlanEntry::Create(c) if c.jira_issue_type == "Epic"))
            .collect();

        let mut jira = MockJira::with_field();
        let mut tracker = MockTracker::default();
        let report =
            execute_plan(&children_only, &config, &mut jira, &mut tracker).expect("execute");

        assert_eq!(report.created, 0);
        assert_eq!(report.skipped_missing_parent, 1);
        assert!(jira.created.is_empty());
    }

    #[test]
    fn category_options_pass_runs_first_and_is_case_insensitive() {
        let config = test_config();
        let mut plan = vec![
            PlanEntry::CreateCategoryOption {
                field: "Product Components".to_string(),
                value: "Widgets".to_string(),
            },
            PlanEntry::CreateCategoryOption {
                field: "Product Components".to_string(),
                value: "drivers".to_string(),
            },
        ];
        let groups = scanned(vec![(item(1, "Epic", None, ItemState::Open), vec![])]);
        plan.extend(build_plan(&groups, &config, &BTreeSet::new(), None).expect("plan"));

        let mut jira = MockJira::with_field();
        jira.options.push("WIDGETS".to_string());
        let mut tracker = MockTracker::default();
        let report = execute_plan(&plan, &config, &mut jira, &mut tracker).expect("execute");

        // "Widgets" already exists modulo case; only "drivers" is created.
        assert_eq!(report.options_created, 1);
        assert_eq!(jira.added_options, vec!["drivers".to_string()]);
        assert_eq!(report.created, 1);
    }

    #[test]
    fn update_pass_rewrites_description_with_fresh_fingerprint() {
        let config = test_config();
        let mut jira = MockJira::with_field();
        jira.descriptions
            .insert("PROJ-7".to_string(), adf_with_hash(&body_hash(Some("old"))));

        let body = "# new heading\n\nMigrated to Jira: [PROJ-7](x)";
        let groups = scanned(vec![(item(1, "Epic", Some(body), ItemState::Open), vec![])]);
        let plan = build_plan(&groups, &config, &BTreeSet::new(), Some(&mut jira)).expect("plan");

        let mut tracker = MockTracker::default();
        let report = execute_plan(&plan, &config, &mut jira, &mut tracker).expect("execute");

        assert_eq!(report.updated, 1);
        let (key, description) = &jira.updated[0];
        assert_eq!(key, "PROJ-7");
        assert!(description.starts_with("h1. new heading"));
        assert!(description.contains(&format!("Hash: {}", body_hash(Some(body)))));
    }

    #[test]
    fn create_failure_aborts_the_run() {
        let config = test_config();
        let groups = scanned(vec![
            (item(1, "First", None, ItemState::Open), vec![]),
            (item(2, "Second", None, ItemState::Open), vec![]),
        ]);
        let plan = build_plan(&groups, &config, &BTreeSet::new(), None).expect("plan");

        let mut jira = MockJira::with_field();
        jira.fail_on_create_summary = Some("[widgets] Second".to_string());
        let mut tracker = MockTracker::default();
        let error =
            execute_plan(&plan, &config, &mut jira, &mut tracker).expect_err("must fail");

        assert!(error.to_string().contains("failed to create issue"));
        // The first create stands; nothing is rolled back.
        assert_eq!(jira.created.len(), 1);
    }

    #[test]
    fn full_flow_from_scan_to_execution() {
        let config = test_config();
        let mut tracker = MockTracker::default();
        tracker.epics = vec![item(1, "Epic: flow", Some("epic body"), ItemState::Open)];
        tracker
            .subs_by_epic
            .insert(1, vec![item(10, "Step one", Some("sub body"), ItemState::Open)]);

        let groups = scan_repo(&mut tracker, "octo/widgets").expect("scan");
        let plan = build_plan(&groups, &config, &BTreeSet::new(), None).expect("plan");

        let mut jira = MockJira::with_field();
        let report = execute_plan(&plan, &config, &mut jira, &mut tracker).expect("execute");

        assert_eq!(report.created, 2);
        assert_eq!(report.updated, 0);
        let epic_description = &jira.created[0].description;
        assert!(epic_description.contains("Migrated from GitHub issue: [https://github.com/octo/widgets/issues/1]"));
        assert!(epic_description.contains(&format!("Hash: {}", body_hash(Some("epic body")))));
    }
}

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use jirabridge_core::config::{Config, load_config};
use jirabridge_core::execute::execute_plan;
use jirabridge_core::gaps::{category_option_entries, find_gaps, required_categories};
use jirabridge_core::github::GitHubClient;
use jirabridge_core::jira::{CategoryFieldStore, JiraClient, JiraClientConfig};
use jirabridge_core::logging::init_logging;
use jirabridge_core::plan::{PlanEntry, UpdateProbe, build_plan, render_plan};
use jirabridge_core::scan::scan_repo;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "jirabridge",
    version,
    about = "GitHub-to-Jira epic migration tool"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        default_value = "config.yaml",
        help = "Path to YAML config file"
    )]
    config: PathBuf,
    #[arg(short = 'v', long, global = true, action = ArgAction::Count, help = "Increase log verbosity")]
    verbose: u8,
    #[arg(long, global = true, help = "Only log errors")]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Build and print the migration plan as YAML")]
    Plan(ScanArgs),
    #[command(about = "Build the plan, print it, then execute it against Jira")]
    Execute(ExecuteArgs),
}

#[derive(Debug, Args)]
struct ScanArgs {
    #[arg(
        long,
        value_name = "SLUG",
        help = "Scan only this repo from config (e.g. octo/widgets)"
    )]
    repo: Option<String>,
    #[arg(long, help = "Plan creation of missing category field options")]
    create_components: bool,
    #[arg(
        long,
        help = "Skip checking Jira for description updates on already-migrated issues"
    )]
    skip_update_check: bool,
}

#[derive(Debug, Args)]
struct ExecuteArgs {
    #[command(flatten)]
    scan: ScanArgs,
    #[arg(
        long,
        value_name = "URL",
        help = "Execute only the plan entries for this GitHub issue URL"
    )]
    issue: Option<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet)?;

    match cli.command {
        Commands::Plan(args) => run_plan(&cli.config, &args),
        Commands::Execute(args) => run_execute(&cli.config, &args),
    }
}

struct BuiltPlan {
    entries: Vec<PlanEntry>,
    /// Category values missing from Jira and not scheduled for creation.
    unresolved_gaps: Vec<String>,
    /// Repos whose scan or classification failed; other repos still planned.
    repo_failures: Vec<String>,
}

fn run_plan(config_path: &Path, args: &ScanArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let (mut jira, mut github) = connect(&config)?;

    let built = build_full_plan(&config, args, &mut jira, &mut github)?;
    print!("{}", render_plan(&built.entries)?);

    if !built.unresolved_gaps.is_empty() {
        report_missing_categories(&config, &built.unresolved_gaps);
    }
    if !built.repo_failures.is_empty() {
        bail!("failed to plan repos: {}", built.repo_failures.join(", "));
    }
    Ok(())
}

fn run_execute(config_path: &Path, args: &ExecuteArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let (mut jira, mut github) = connect(&config)?;

    let built = build_full_plan(&config, &args.scan, &mut jira, &mut github)?;

    // The plan is always shown before any write is attempted.
    print!("{}", render_plan(&built.entries)?);

    if !built.repo_failures.is_empty() {
        bail!("failed to plan repos: {}", built.repo_failures.join(", "));
    }
    if !built.unresolved_gaps.is_empty() {
        report_missing_categories(&config, &built.unresolved_gaps);
        bail!("missing category field options; re-run with --create-components");
    }

    let selected = match &args.issue {
        Some(url) => {
            let filtered: Vec<PlanEntry> = built
                .entries
                .iter()
                .filter(|entry| {
                    entry.github_ref() == Some(url.as_str()) || entry.github_ref().is_none()
                })
                .cloned()
                .collect();
            if !filtered.iter().any(|entry| entry.github_ref().is_some()) {
                bail!("no plan entries found for {url}");
            }
            filtered
        }
        None => built.entries,
    };

    let report = execute_plan(&selected, &config, &mut jira, &mut github)?;
    println!("options_created: {}", report.options_created);
    println!("created: {}", report.created);
    println!("updated: {}", report.updated);
    println!("skipped_missing_parent: {}", report.skipped_missing_parent);
    Ok(())
}

fn connect(config: &Config) -> Result<(JiraClient, GitHubClient)> {
    let jira = JiraClient::new(JiraClientConfig::from_env(&config.jira.url)?)?;
    let github = GitHubClient::from_env()?;
    Ok((jira, github))
}

fn build_full_plan(
    config: &Config,
    args: &ScanArgs,
    jira: &mut JiraClient,
    github: &mut GitHubClient,
) -> Result<BuiltPlan> {
    let repos = match &args.repo {
        Some(slug) => {
            let Some(repo) = config.repo(slug) else {
                bail!("repo '{slug}' not found in config");
            };
            vec![repo]
        }
        None => config.repos.iter().collect(),
    };

    // Gap detection covers every configured repo, not just the selection,
    // so a partial run still reports the full gap surface.
    info!(field = %config.category_field, "checking category field values");
    let required = required_categories(config);
    let missing = match jira.list_options(&config.category_field)? {
        Some(values) => {
            let existing: BTreeSet<String> = values.into_iter().collect();
            find_gaps(&required, &existing)
        }
        None => {
            warn!(
                field = %config.category_field,
                "category field not found in Jira, skipping gap check"
            );
            Vec::new()
        }
    };
    if missing.is_empty() {
        info!("all category field values exist in Jira");
    } else {
        warn!(values = ?missing, "missing category field values");
    }

    let (mut entries, gap_set) = if args.create_components && !missing.is_empty() {
        // Options will be created in the first executor pass, so issue
        // entries are not demoted.
        (
            category_option_entries(&config.category_field, &missing),
            BTreeSet::new(),
        )
    } else {
        (Vec::new(), missing.into_iter().collect::<BTreeSet<String>>())
    };

    let mut repo_failures = Vec::new();
    for repo in repos {
        let outcome = match scan_repo(github, &repo.github) {
            Ok(groups) => {
                let probe: Option<&mut dyn UpdateProbe> = if args.skip_update_check {
                    None
                } else {
                    Some(&mut *jira)
                };
                build_plan(&groups, config, &gap_set, probe)
            }
            Err(err) => Err(err),
        };
        match outcome {
            Ok(repo_plan) => entries.extend(repo_plan),
            Err(err) => {
                error!(repo = %repo.github, "planning failed: {err:#}");
                repo_failures.push(repo.github.clone());
            }
        }
    }

    info!(
        github_requests = github.request_count(),
        jira_requests = jira.request_count(),
        "plan built"
    );

    Ok(BuiltPlan {
        entries,
        unresolved_gaps: gap_set.into_iter().collect(),
        repo_failures,
    })
}

fn report_missing_categories(config: &Config, missing: &[String]) {
    eprintln!();
    eprintln!(
        "Error: the following '{}' options do not exist in Jira:",
        config.category_field
    );
    for value in missing {
        eprintln!("  - {value}");
    }
    eprintln!();
    eprintln!("Use --create-components to create them automatically.");
}

use anyhow::{bail, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

use jira_export::db::Database;
use jira_export::export::export_query;
use jira_export::jira::JiraClient;
use jira_export::models::{ExportReport, QuerySpec};

pub struct ExportArgs {
    pub projects: Vec<String>,
    pub all_projects: bool,
    pub jql: Option<String>,
    pub since: Option<String>,
    pub db: Option<PathBuf>,
    pub page_size: usize,
}

pub fn run(client: &JiraClient, args: ExportArgs) -> Result<()> {
    if let Some(jql) = &args.jql {
        let db_path = args.db.unwrap_or_else(|| PathBuf::from("jira.db"));
        let report = export_one(client, &QuerySpec::Jql(jql.clone()), &db_path, args.page_size)?;
        print_summary(jql, &db_path, &report);
        return Ok(());
    }

    let projects = if args.all_projects {
        let found = client.list_projects()?;
        let keys: Vec<String> = found
            .iter()
            .filter_map(|p| p.get("key").and_then(Value::as_str).map(String::from))
            .collect();
        info!("found {} accessible projects", keys.len());
        keys
    } else {
        args.projects.clone()
    };

    if projects.is_empty() {
        bail!("nothing to export: pass --project, --all-projects, or --jql");
    }

    // Each project lands in its own database unless a single explicit
    // target was given.
    let explicit_db = if projects.len() == 1 { args.db.clone() } else { None };

    let mut total = 0usize;
    let mut total_failed = 0usize;

    for key in &projects {
        let query = QuerySpec::Project {
            key: key.clone(),
            since: args.since.clone(),
        };
        let db_path = explicit_db
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.db", key)));

        // A fetch failure aborts this project's query only (reported
        // inside the summary); schema or path errors are fatal for the
        // whole run.
        let report = export_one(client, &query, &db_path, args.page_size)?;
        total += report.count;
        total_failed += report.failed_keys.len();
        print_summary(key, &db_path, &report);
    }

    println!();
    println!(
        "Done: {} tickets exported from {} project(s), {} failed",
        total,
        projects.len(),
        total_failed
    );
    Ok(())
}

fn export_one(
    client: &JiraClient,
    query: &QuerySpec,
    db_path: &Path,
    page_size: usize,
) -> Result<ExportReport> {
    info!("exporting {:?} into {}", query.to_jql(), db_path.display());
    let db = Database::open(db_path)?;
    export_query(client, &db, query, page_size)
}

fn print_summary(label: &str, db_path: &Path, report: &ExportReport) {
    println!(
        "{}: {} tickets exported to {}",
        label,
        report.count,
        db_path.display()
    );
    if !report.failed_keys.is_empty() {
        println!(
            "  {} failed: {}",
            report.failed_keys.len(),
            report.failed_keys.join(", ")
        );
    }
    if let Some(err) = &report.fetch_error {
        println!("  export incomplete: {}", err);
    }
}

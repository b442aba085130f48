mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use commands::export::ExportArgs;
use jira_export::export::DEFAULT_PAGE_SIZE;
use jira_export::jira::{JiraClient, JiraConfig};

#[derive(Parser)]
#[command(name = "jira-export")]
#[command(about = "Export JIRA Cloud tickets into searchable SQLite databases")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export tickets into a SQLite database
    Export {
        /// Project key to export (repeatable)
        #[arg(short, long)]
        project: Vec<String>,
        /// Export every accessible project, one database each
        #[arg(long)]
        all_projects: bool,
        /// Custom JQL query (overrides --project and --since)
        #[arg(short, long)]
        jql: Option<String>,
        /// Only export issues created since this date (YYYY-MM-DD)
        #[arg(short, long)]
        since: Option<String>,
        /// Database file (default: PROJECT.db per project, jira.db for JQL)
        #[arg(long)]
        db: Option<PathBuf>,
        /// Issues per page requested from the API
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,
    },

    /// Add missing indexes and rebuild the search index of existing databases
    Optimize {
        /// Database file(s) to optimize
        databases: Vec<PathBuf>,
    },

    /// Full-text search over an exported database
    Search {
        /// Database file to search
        #[arg(long)]
        db: PathBuf,
        /// Search terms (phrase match when multiple words)
        query: String,
        /// Maximum number of results
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Test the JIRA connection and show account info
    Test,

    /// List all accessible JIRA projects
    Projects,
}

fn get_client() -> Result<JiraClient> {
    let config = JiraConfig::from_env()?;
    JiraClient::new(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Export {
            project,
            all_projects,
            jql,
            since,
            db,
            page_size,
        } => {
            let client = get_client()?;
            commands::export::run(
                &client,
                ExportArgs {
                    projects: project,
                    all_projects,
                    jql,
                    since,
                    db,
                    page_size,
                },
            )
        }

        Commands::Optimize { databases } => commands::optimize::run(&databases),

        Commands::Search { db, query, limit } => commands::search::run(&db, &query, limit),

        Commands::Test => {
            let client = get_client()?;
            commands::remote::test(&client)
        }

        Commands::Projects => {
            let client = get_client()?;
            commands::remote::projects(&client)
        }
    }
}

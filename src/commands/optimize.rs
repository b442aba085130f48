use anyhow::Result;
use std::path::PathBuf;

use jira_export::db::Database;

pub fn run(databases: &[PathBuf]) -> Result<()> {
    for path in databases {
        if !path.exists() {
            eprintln!("Database not found: {}", path.display());
            continue;
        }

        println!("Optimizing {}...", path.display());
        let db = Database::open(path)?;

        let stats = db.stats()?;
        println!("  Tickets: {}", stats.tickets);
        println!("  Comments: {}", stats.comments);
        println!("  Changelog entries: {}", stats.changelog_entries);

        db.optimize()?;
        println!("  Done: indexes topped up, search index rebuilt.");
    }
    Ok(())
}

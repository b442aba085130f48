use anyhow::Result;
use std::path::Path;

use jira_export::db::Database;

pub fn run(db_path: &Path, query: &str, limit: usize) -> Result<()> {
    let db = Database::open(db_path)?;
    let hits = db.search(query, limit)?;

    if hits.is_empty() {
        println!("No tickets match '{}'", query);
        return Ok(());
    }

    for hit in &hits {
        println!(
            "{:12} [{}] {}",
            hit.key,
            hit.status.as_deref().unwrap_or("-"),
            hit.summary.as_deref().unwrap_or("")
        );
    }
    println!("\n{} match(es)", hits.len());
    Ok(())
}

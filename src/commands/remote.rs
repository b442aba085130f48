use anyhow::Result;
use serde_json::Value;

use jira_export::jira::JiraClient;

/// Connection test: fetch and print the authenticated account.
pub fn test(client: &JiraClient) -> Result<()> {
    let user = client.myself()?;
    println!("Connected successfully!");
    println!(
        "  Account: {} ({})",
        user.get("displayName").and_then(Value::as_str).unwrap_or("?"),
        user.get("emailAddress").and_then(Value::as_str).unwrap_or("?"),
    );
    println!(
        "  Account ID: {}",
        user.get("accountId").and_then(Value::as_str).unwrap_or("?"),
    );
    Ok(())
}

/// List all projects the account can see.
pub fn projects(client: &JiraClient) -> Result<()> {
    let projects = client.list_projects()?;
    if projects.is_empty() {
        println!("No accessible projects found.");
        return Ok(());
    }

    println!("Found {} accessible projects:\n", projects.len());
    for p in &projects {
        let key = p.get("key").and_then(Value::as_str).unwrap_or("?");
        let name = p.get("name").and_then(Value::as_str).unwrap_or("");
        let archived = if p.get("archived").and_then(Value::as_bool).unwrap_or(false) {
            " (archived)"
        } else {
            ""
        };
        println!("  {:12} {}{}", key, name, archived);
    }
    Ok(())
}

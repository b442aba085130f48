use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One normalized `tickets` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketRow {
    pub key: String,
    pub id: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub description_raw: Option<String>,
    pub status: Option<String>,
    pub status_category: Option<String>,
    pub priority: Option<String>,
    pub issue_type: Option<String>,
    pub is_subtask: bool,
    pub project_key: Option<String>,
    pub project_name: Option<String>,
    pub creator: UserRef,
    pub reporter: UserRef,
    pub assignee: UserRef,
    pub created: Option<String>,
    pub updated: Option<String>,
    pub resolved: Option<String>,
    pub resolution: Option<String>,
    pub labels: String,
    pub components: String,
    pub fix_versions: String,
    pub affects_versions: String,
    pub parent_key: Option<String>,
    pub parent_summary: Option<String>,
    pub custom_fields: String,
    pub raw_json: String,
    pub exported_at: String,
}

/// Account id / display name / email triple, each optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserRef {
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRow {
    pub id: String,
    pub author: UserRef,
    pub body: Option<String>,
    pub body_raw: Option<String>,
    pub created: Option<String>,
    pub updated: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRow {
    pub field: Option<String>,
    pub field_type: Option<String>,
    pub from_value: Option<String>,
    pub to_value: Option<String>,
    pub author: UserRef,
    pub created: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRow {
    pub link_type: Option<String>,
    pub inward_key: Option<String>,
    pub outward_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskRow {
    pub key: Option<String>,
    pub summary: Option<String>,
}

/// The full normalized row set for one ticket, as produced by the mapper
/// and committed by the writer in a single transaction.
#[derive(Debug, Clone)]
pub struct TicketBundle {
    pub ticket: TicketRow,
    pub comments: Vec<CommentRow>,
    pub changelog: Vec<ChangeRow>,
    pub links: Vec<LinkRow>,
    pub subtasks: Vec<SubtaskRow>,
}

/// What to export: a whole project (optionally bounded below by creation
/// date) or a raw JQL query.
#[derive(Debug, Clone)]
pub enum QuerySpec {
    Project { key: String, since: Option<String> },
    Jql(String),
}

impl QuerySpec {
    pub fn to_jql(&self) -> String {
        match self {
            QuerySpec::Project { key, since } => {
                let mut jql = format!("project = \"{}\"", key);
                if let Some(date) = since {
                    jql.push_str(&format!(" AND created >= '{}'", date));
                }
                jql.push_str(" ORDER BY created DESC");
                jql
            }
            QuerySpec::Jql(jql) => jql.clone(),
        }
    }
}

/// One page of raw issues from the upstream collaborator.
#[derive(Debug, Default)]
pub struct IssuePage {
    pub issues: Vec<Value>,
    pub next_cursor: Option<String>,
    pub total: Option<u64>,
}

/// Outcome of one export run. `count` and `failed_keys` together account
/// for every issue the upstream returned before any fetch failure.
#[derive(Debug, Default)]
pub struct ExportReport {
    pub count: usize,
    pub failed_keys: Vec<String>,
    pub fetch_error: Option<String>,
}

impl ExportReport {
    pub fn aborted(&self) -> bool {
        self.fetch_error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_query_to_jql() {
        let q = QuerySpec::Project {
            key: "PROJ".to_string(),
            since: None,
        };
        assert_eq!(q.to_jql(), "project = \"PROJ\" ORDER BY created DESC");
    }

    #[test]
    fn test_project_query_with_since() {
        let q = QuerySpec::Project {
            key: "PROJ".to_string(),
            since: Some("2024-01-01".to_string()),
        };
        assert_eq!(
            q.to_jql(),
            "project = \"PROJ\" AND created >= '2024-01-01' ORDER BY created DESC"
        );
    }

    #[test]
    fn test_raw_jql_passthrough() {
        let q = QuerySpec::Jql("assignee = currentUser()".to_string());
        assert_eq!(q.to_jql(), "assignee = currentUser()");
    }
}

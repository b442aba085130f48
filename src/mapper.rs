//! Record mapper: one raw upstream issue into the normalized row sets for
//! every target table. Pure transformation, no I/O.

use serde_json::Value;

use crate::error::ExportError;
use crate::models::{
    ChangeRow, CommentRow, LinkRow, SubtaskRow, TicketBundle, TicketRow, UserRef,
};

/// Map one raw JIRA issue (plus its embedded comments/changelog/links/
/// subtasks) into a [`TicketBundle`]. Optional fields map to `None`; the
/// only hard requirement is the issue `key`.
pub fn map_issue(issue: &Value, exported_at: &str) -> Result<TicketBundle, ExportError> {
    let key = issue
        .get("key")
        .and_then(Value::as_str)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            let id = issue
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("<no id>");
            ExportError::MalformedRecord(format!("issue {} has no key", id))
        })?
        .to_string();

    let fields = issue.get("fields").cloned().unwrap_or(Value::Null);

    let description = fields.get("description");
    let status = fields.get("status");
    let issue_type = fields.get("issuetype");
    let project = fields.get("project");
    let parent = fields.get("parent");

    let ticket = TicketRow {
        key: key.clone(),
        id: str_field(issue, "id"),
        summary: str_field(&fields, "summary"),
        description: description.map(text_content),
        description_raw: description.map(|v| v.to_string()),
        status: status.and_then(|s| str_field(s, "name")),
        status_category: status
            .and_then(|s| s.get("statusCategory"))
            .and_then(|c| str_field(c, "name")),
        priority: fields
            .get("priority")
            .and_then(|p| str_field(p, "name")),
        issue_type: issue_type.and_then(|t| str_field(t, "name")),
        is_subtask: issue_type
            .and_then(|t| t.get("subtask"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
        project_key: project.and_then(|p| str_field(p, "key")),
        project_name: project.and_then(|p| str_field(p, "name")),
        creator: user_ref(fields.get("creator")),
        reporter: user_ref(fields.get("reporter")),
        assignee: user_ref(fields.get("assignee")),
        created: str_field(&fields, "created"),
        updated: str_field(&fields, "updated"),
        resolved: str_field(&fields, "resolutiondate"),
        resolution: fields
            .get("resolution")
            .and_then(|r| str_field(r, "name")),
        labels: fields
            .get("labels")
            .cloned()
            .unwrap_or_else(|| Value::Array(vec![]))
            .to_string(),
        components: name_list(fields.get("components"), "name"),
        fix_versions: name_list(fields.get("fixVersions"), "name"),
        affects_versions: name_list(fields.get("versions"), "name"),
        parent_key: parent.and_then(|p| str_field(p, "key")),
        parent_summary: parent
            .and_then(|p| p.get("fields"))
            .and_then(|f| str_field(f, "summary")),
        custom_fields: custom_fields(&fields).to_string(),
        raw_json: issue.to_string(),
        exported_at: exported_at.to_string(),
    };

    Ok(TicketBundle {
        ticket,
        comments: map_comments(issue, &fields),
        changelog: map_changelog(issue),
        links: map_links(&fields),
        subtasks: map_subtasks(&fields),
    })
}

/// Comments come either as a top-level array embedded by the HTTP
/// collaborator or, for issues fetched without the extra comment call,
/// inline under `fields.comment.comments`.
fn map_comments(issue: &Value, fields: &Value) -> Vec<CommentRow> {
    let raw = issue
        .get("comments")
        .or_else(|| fields.get("comment").and_then(|c| c.get("comments")));

    array(raw)
        .iter()
        .filter_map(|c| {
            // The upstream comment id is the natural de-duplication key;
            // a comment without one cannot be stored.
            let id = str_field(c, "id")?;
            Some(CommentRow {
                id,
                author: user_ref(c.get("author")),
                body: c.get("body").map(text_content),
                body_raw: c.get("body").map(|v| v.to_string()),
                created: str_field(c, "created"),
                updated: str_field(c, "updated"),
            })
        })
        .collect()
}

fn map_changelog(issue: &Value) -> Vec<ChangeRow> {
    let histories = issue.get("changelog").and_then(|c| c.get("histories"));

    let mut changes = Vec::new();
    for history in array(histories) {
        let author = user_ref(history.get("author"));
        let created = str_field(history, "created");
        for item in array(history.get("items")) {
            changes.push(ChangeRow {
                field: str_field(item, "field"),
                field_type: str_field(item, "fieldtype"),
                from_value: str_field(item, "fromString"),
                to_value: str_field(item, "toString"),
                author: author.clone(),
                created: created.clone(),
            });
        }
    }
    changes
}

fn map_links(fields: &Value) -> Vec<LinkRow> {
    array(fields.get("issuelinks"))
        .iter()
        .map(|link| LinkRow {
            link_type: link.get("type").and_then(|t| str_field(t, "name")),
            inward_key: link.get("inwardIssue").and_then(|i| str_field(i, "key")),
            outward_key: link.get("outwardIssue").and_then(|i| str_field(i, "key")),
        })
        .collect()
}

fn map_subtasks(fields: &Value) -> Vec<SubtaskRow> {
    array(fields.get("subtasks"))
        .iter()
        .map(|st| SubtaskRow {
            key: str_field(st, "key"),
            summary: st.get("fields").and_then(|f| str_field(f, "summary")),
        })
        .collect()
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

fn array(v: Option<&Value>) -> &[Value] {
    v.and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

fn user_ref(v: Option<&Value>) -> UserRef {
    match v {
        Some(user) if user.is_object() => UserRef {
            id: str_field(user, "accountId"),
            name: str_field(user, "displayName"),
            email: str_field(user, "emailAddress"),
        },
        _ => UserRef::default(),
    }
}

/// JSON array of objects into a JSON array of their `name` values.
fn name_list(v: Option<&Value>, name: &str) -> String {
    let names: Vec<Value> = array(v)
        .iter()
        .filter_map(|item| item.get(name).cloned())
        .collect();
    Value::Array(names).to_string()
}

/// Plain text from a description or comment body, which may be a string
/// or an Atlassian Document Format tree.
fn text_content(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Object(_) => adf_to_text(v),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Flatten an Atlassian Document Format tree to plain text: text nodes
/// are concatenated, hard breaks become newlines, mentions keep their
/// display text.
fn adf_to_text(adf: &Value) -> String {
    let mut out = String::new();
    collect_text(adf, &mut out);
    out
}

fn collect_text(node: &Value, out: &mut String) {
    match node {
        Value::String(s) => out.push_str(s),
        Value::Array(items) => {
            for item in items {
                collect_text(item, out);
            }
        }
        Value::Object(map) => {
            match map.get("type").and_then(Value::as_str) {
                Some("text") => {
                    out.push_str(map.get("text").and_then(Value::as_str).unwrap_or(""));
                }
                Some("hardBreak") => out.push('\n'),
                Some("mention") => {
                    let text = map
                        .get("attrs")
                        .and_then(|a| a.get("text"))
                        .and_then(Value::as_str)
                        .unwrap_or("user");
                    if text.starts_with('@') {
                        out.push_str(text);
                    } else {
                        out.push('@');
                        out.push_str(text);
                    }
                }
                _ => {}
            }
            if let Some(content) = map.get("content") {
                collect_text(content, out);
            }
        }
        _ => {}
    }
}

/// Extract `customfield_*` entries, unwrapping `{value}`/`{name}` objects
/// and arrays of them to their display values.
fn custom_fields(fields: &Value) -> Value {
    let mut custom = serde_json::Map::new();

    if let Some(map) = fields.as_object() {
        for (key, value) in map {
            if !key.starts_with("customfield_") || value.is_null() {
                continue;
            }
            custom.insert(key.clone(), simplify_custom(value));
        }
    }

    Value::Object(custom)
}

fn simplify_custom(value: &Value) -> Value {
    match value {
        Value::Object(map) => map
            .get("value")
            .or_else(|| map.get("name"))
            .cloned()
            .unwrap_or_else(|| value.clone()),
        Value::Array(items) if !items.is_empty() => Value::Array(
            items
                .iter()
                .map(|item| match item {
                    Value::Object(_) => simplify_custom(item),
                    other => other.clone(),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const STAMP: &str = "2024-06-01T00:00:00Z";

    fn sample_issue() -> Value {
        json!({
            "key": "PROJ-42",
            "id": "10042",
            "fields": {
                "summary": "Login page crashes on empty password",
                "description": {
                    "type": "doc",
                    "content": [
                        {"type": "paragraph", "content": [
                            {"type": "text", "text": "Steps to reproduce:"},
                            {"type": "hardBreak"},
                            {"type": "text", "text": "leave password empty"}
                        ]}
                    ]
                },
                "status": {"name": "In Progress", "statusCategory": {"name": "In Progress"}},
                "priority": {"name": "High"},
                "issuetype": {"name": "Bug", "subtask": false},
                "project": {"key": "PROJ", "name": "Project"},
                "creator": {"accountId": "u1", "displayName": "Ada", "emailAddress": "ada@example.com"},
                "reporter": {"accountId": "u1", "displayName": "Ada", "emailAddress": "ada@example.com"},
                "assignee": null,
                "created": "2024-01-01T09:00:00.000+0000",
                "updated": "2024-01-02T09:00:00.000+0000",
                "resolutiondate": null,
                "resolution": null,
                "labels": ["auth", "crash"],
                "components": [{"name": "web"}],
                "fixVersions": [{"name": "1.2"}],
                "versions": [],
                "parent": {"key": "PROJ-40", "fields": {"summary": "Auth epic"}},
                "issuelinks": [
                    {"type": {"name": "Blocks"}, "outwardIssue": {"key": "PROJ-50"}}
                ],
                "subtasks": [
                    {"key": "PROJ-43", "fields": {"summary": "Add validation"}}
                ],
                "customfield_10001": {"value": "Backend"},
                "customfield_10002": null
            },
            "changelog": {
                "histories": [
                    {
                        "author": {"accountId": "u2", "displayName": "Bo"},
                        "created": "2024-01-02T09:00:00.000+0000",
                        "items": [
                            {"field": "status", "fieldtype": "jira",
                             "fromString": "Open", "toString": "In Progress"}
                        ]
                    }
                ]
            },
            "comments": [
                {
                    "id": "9001",
                    "author": {"accountId": "u2", "displayName": "Bo"},
                    "body": {"type": "doc", "content": [
                        {"type": "text", "text": "Reproduced on staging"}
                    ]},
                    "created": "2024-01-02T10:00:00.000+0000",
                    "updated": "2024-01-02T10:00:00.000+0000"
                }
            ]
        })
    }

    #[test]
    fn test_maps_full_issue() {
        let bundle = map_issue(&sample_issue(), STAMP).unwrap();

        assert_eq!(bundle.ticket.key, "PROJ-42");
        assert_eq!(
            bundle.ticket.summary.as_deref(),
            Some("Login page crashes on empty password")
        );
        assert_eq!(
            bundle.ticket.description.as_deref(),
            Some("Steps to reproduce:\nleave password empty")
        );
        assert_eq!(bundle.ticket.status.as_deref(), Some("In Progress"));
        assert_eq!(bundle.ticket.priority.as_deref(), Some("High"));
        assert_eq!(bundle.ticket.issue_type.as_deref(), Some("Bug"));
        assert!(!bundle.ticket.is_subtask);
        assert_eq!(bundle.ticket.project_key.as_deref(), Some("PROJ"));
        assert_eq!(bundle.ticket.parent_key.as_deref(), Some("PROJ-40"));
        assert_eq!(bundle.ticket.exported_at, STAMP);

        assert_eq!(bundle.comments.len(), 1);
        assert_eq!(bundle.comments[0].id, "9001");
        assert_eq!(
            bundle.comments[0].body.as_deref(),
            Some("Reproduced on staging")
        );

        assert_eq!(bundle.changelog.len(), 1);
        assert_eq!(bundle.changelog[0].field.as_deref(), Some("status"));
        assert_eq!(bundle.changelog[0].from_value.as_deref(), Some("Open"));
        assert_eq!(bundle.changelog[0].author.name.as_deref(), Some("Bo"));

        assert_eq!(bundle.links.len(), 1);
        assert_eq!(bundle.links[0].outward_key.as_deref(), Some("PROJ-50"));
        assert!(bundle.links[0].inward_key.is_none());

        assert_eq!(bundle.subtasks.len(), 1);
        assert_eq!(bundle.subtasks[0].key.as_deref(), Some("PROJ-43"));
    }

    #[test]
    fn test_missing_key_is_malformed() {
        let issue = json!({"id": "10099", "fields": {"summary": "No key"}});
        let err = map_issue(&issue, STAMP).unwrap_err();
        assert!(matches!(err, ExportError::MalformedRecord(_)));
        assert!(err.to_string().contains("10099"));
    }

    #[test]
    fn test_missing_assignee_maps_to_none() {
        let bundle = map_issue(&sample_issue(), STAMP).unwrap();
        assert!(bundle.ticket.assignee.id.is_none());
        assert!(bundle.ticket.assignee.name.is_none());
        assert_eq!(bundle.ticket.reporter.name.as_deref(), Some("Ada"));
    }

    #[test]
    fn test_minimal_issue_maps() {
        let bundle = map_issue(&json!({"key": "X-1"}), STAMP).unwrap();
        assert_eq!(bundle.ticket.key, "X-1");
        assert!(bundle.ticket.summary.is_none());
        assert!(bundle.comments.is_empty());
        assert!(bundle.changelog.is_empty());
        assert_eq!(bundle.ticket.labels, "[]");
    }

    #[test]
    fn test_comments_fallback_to_inline_field() {
        let issue = json!({
            "key": "X-2",
            "fields": {
                "comment": {"comments": [
                    {"id": "1", "body": "plain text comment"}
                ]}
            }
        });
        let bundle = map_issue(&issue, STAMP).unwrap();
        assert_eq!(bundle.comments.len(), 1);
        assert_eq!(bundle.comments[0].body.as_deref(), Some("plain text comment"));
    }

    #[test]
    fn test_comment_without_id_is_dropped() {
        let issue = json!({
            "key": "X-3",
            "comments": [
                {"body": "no id"},
                {"id": "2", "body": "kept"}
            ]
        });
        let bundle = map_issue(&issue, STAMP).unwrap();
        assert_eq!(bundle.comments.len(), 1);
        assert_eq!(bundle.comments[0].id, "2");
    }

    #[test]
    fn test_adf_mention_and_breaks() {
        let adf = json!({
            "type": "doc",
            "content": [
                {"type": "text", "text": "ping "},
                {"type": "mention", "attrs": {"text": "@ada"}},
                {"type": "hardBreak"},
                {"type": "mention", "attrs": {"text": "bo"}}
            ]
        });
        assert_eq!(adf_to_text(&adf), "ping @ada\n@bo");
    }

    #[test]
    fn test_custom_fields_simplified() {
        let fields = json!({
            "customfield_10001": {"value": "Backend"},
            "customfield_10002": {"name": "Sprint 9"},
            "customfield_10003": [{"value": "a"}, {"value": "b"}],
            "customfield_10004": "raw string",
            "customfield_10005": null,
            "summary": "not custom"
        });
        let custom = custom_fields(&fields);
        assert_eq!(custom["customfield_10001"], "Backend");
        assert_eq!(custom["customfield_10002"], "Sprint 9");
        assert_eq!(custom["customfield_10003"], json!(["a", "b"]));
        assert_eq!(custom["customfield_10004"], "raw string");
        assert!(custom.get("customfield_10005").is_none());
        assert!(custom.get("summary").is_none());
    }
}

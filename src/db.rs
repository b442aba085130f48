//! SQLite store for exported tickets: schema management, transactional
//! per-ticket upserts, and full-text index maintenance.

use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;

use crate::error::ExportError;
use crate::models::TicketBundle;

const SCHEMA_VERSION: i32 = 1;

/// SQLite binds are limited; key lists are chunked well below the default
/// 999-variable ceiling.
const KEY_CHUNK: usize = 500;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tickets (
    key TEXT PRIMARY KEY,
    id TEXT,
    summary TEXT,
    description TEXT,
    description_raw TEXT,
    status TEXT,
    status_category TEXT,
    priority TEXT,
    issue_type TEXT,
    is_subtask INTEGER,
    project_key TEXT,
    project_name TEXT,
    creator_id TEXT,
    creator_name TEXT,
    creator_email TEXT,
    reporter_id TEXT,
    reporter_name TEXT,
    reporter_email TEXT,
    assignee_id TEXT,
    assignee_name TEXT,
    assignee_email TEXT,
    created TEXT,
    updated TEXT,
    resolved TEXT,
    resolution TEXT,
    labels TEXT,
    components TEXT,
    fix_versions TEXT,
    affects_versions TEXT,
    parent_key TEXT,
    parent_summary TEXT,
    custom_fields TEXT,
    raw_json TEXT,
    exported_at TEXT
);

CREATE TABLE IF NOT EXISTS comments (
    id TEXT PRIMARY KEY,
    ticket_key TEXT,
    author_id TEXT,
    author_name TEXT,
    author_email TEXT,
    body TEXT,
    body_raw TEXT,
    created TEXT,
    updated TEXT,
    FOREIGN KEY (ticket_key) REFERENCES tickets(key)
);

CREATE TABLE IF NOT EXISTS changelog (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticket_key TEXT,
    field TEXT,
    field_type TEXT,
    from_value TEXT,
    to_value TEXT,
    author_id TEXT,
    author_name TEXT,
    author_email TEXT,
    created TEXT,
    FOREIGN KEY (ticket_key) REFERENCES tickets(key)
);

CREATE TABLE IF NOT EXISTS issue_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticket_key TEXT,
    link_type TEXT,
    inward_key TEXT,
    outward_key TEXT,
    FOREIGN KEY (ticket_key) REFERENCES tickets(key)
);

CREATE TABLE IF NOT EXISTS subtasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticket_key TEXT,
    subtask_key TEXT,
    subtask_summary TEXT,
    FOREIGN KEY (ticket_key) REFERENCES tickets(key)
);

CREATE INDEX IF NOT EXISTS idx_tickets_project ON tickets(project_key);
CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status);
CREATE INDEX IF NOT EXISTS idx_tickets_assignee ON tickets(assignee_name);
CREATE INDEX IF NOT EXISTS idx_tickets_created ON tickets(created);
CREATE INDEX IF NOT EXISTS idx_tickets_updated ON tickets(updated);
CREATE INDEX IF NOT EXISTS idx_tickets_issue_type ON tickets(issue_type);
CREATE INDEX IF NOT EXISTS idx_tickets_priority ON tickets(priority);
CREATE INDEX IF NOT EXISTS idx_tickets_reporter ON tickets(reporter_name);
CREATE INDEX IF NOT EXISTS idx_comments_ticket ON comments(ticket_key);
CREATE INDEX IF NOT EXISTS idx_changelog_ticket ON changelog(ticket_key);
CREATE INDEX IF NOT EXISTS idx_tickets_project_status ON tickets(project_key, status);
CREATE INDEX IF NOT EXISTS idx_tickets_project_updated ON tickets(project_key, updated DESC);
"#;

/// Derives the searchable projection of a set of tickets: summary,
/// description, and the concatenated bodies of their comments.
const FTS_INSERT_SELECT: &str = r#"
INSERT INTO tickets_fts (key, summary, description, comments)
SELECT t.key,
       COALESCE(t.summary, ''),
       COALESCE(t.description, ''),
       COALESCE((SELECT group_concat(c.body, ' ')
                 FROM comments c WHERE c.ticket_key = t.key), '')
FROM tickets t
"#;

#[derive(Debug)]
pub struct SearchHit {
    pub key: String,
    pub status: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug)]
pub struct Stats {
    pub tickets: i64,
    pub comments: i64,
    pub changelog_entries: i64,
    pub projects: i64,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        let db = Database { conn };
        db.ensure_schema()?;
        Ok(db)
    }

    /// Create tables, indexes, and the FTS5 virtual table if absent.
    /// Additive only; safe to run against a live database and against
    /// databases created by earlier versions (missing indexes are added).
    pub fn ensure_schema(&self) -> Result<(), ExportError> {
        self.conn
            .execute_batch(SCHEMA)
            .map_err(ExportError::Schema)?;

        // FTS5 CREATE is not idempotent natively, so check by name first.
        let fts_exists: bool = self
            .conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='tickets_fts'",
                [],
                |row| row.get(0),
            )
            .map_err(ExportError::Schema)?;

        if !fts_exists {
            self.conn
                .execute_batch(
                    "CREATE VIRTUAL TABLE tickets_fts USING fts5(
                        key,
                        summary,
                        description,
                        comments
                    )",
                )
                .map_err(ExportError::Schema)?;
        }

        self.conn
            .execute_batch(&format!(
                "PRAGMA user_version = {}; PRAGMA foreign_keys = ON;",
                SCHEMA_VERSION
            ))
            .map_err(ExportError::Schema)?;

        Ok(())
    }

    /// Commit one ticket's full row set as a single atomic unit: replace
    /// the ticket row, drop all prior child rows for the key, insert the
    /// new ones. A failure rolls the whole ticket back, leaving either the
    /// prior complete state or nothing.
    pub fn upsert_ticket(&self, bundle: &TicketBundle) -> Result<(), ExportError> {
        let key = &bundle.ticket.key;
        self.write_ticket_tx(bundle)
            .map_err(|source| ExportError::WriteFailure {
                key: key.clone(),
                source,
            })
    }

    fn write_ticket_tx(&self, bundle: &TicketBundle) -> Result<(), rusqlite::Error> {
        let tx = self.conn.unchecked_transaction()?;
        let t = &bundle.ticket;
        let key = &t.key;

        // Child rows are owned by the ticket and mirror the latest fetched
        // state exactly: wholesale replace, never merge. They also must go
        // before the REPLACE of the ticket row, which re-creates the parent
        // key under enforced foreign keys.
        tx.execute("DELETE FROM comments WHERE ticket_key = ?1", [key])?;
        tx.execute("DELETE FROM changelog WHERE ticket_key = ?1", [key])?;
        tx.execute("DELETE FROM issue_links WHERE ticket_key = ?1", [key])?;
        tx.execute("DELETE FROM subtasks WHERE ticket_key = ?1", [key])?;

        tx.execute(
            "INSERT OR REPLACE INTO tickets (
                key, id, summary, description, description_raw,
                status, status_category, priority, issue_type, is_subtask,
                project_key, project_name,
                creator_id, creator_name, creator_email,
                reporter_id, reporter_name, reporter_email,
                assignee_id, assignee_name, assignee_email,
                created, updated, resolved, resolution,
                labels, components, fix_versions, affects_versions,
                parent_key, parent_summary, custom_fields, raw_json, exported_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                      ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24,
                      ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34)",
            params![
                t.key,
                t.id,
                t.summary,
                t.description,
                t.description_raw,
                t.status,
                t.status_category,
                t.priority,
                t.issue_type,
                t.is_subtask as i64,
                t.project_key,
                t.project_name,
                t.creator.id,
                t.creator.name,
                t.creator.email,
                t.reporter.id,
                t.reporter.name,
                t.reporter.email,
                t.assignee.id,
                t.assignee.name,
                t.assignee.email,
                t.created,
                t.updated,
                t.resolved,
                t.resolution,
                t.labels,
                t.components,
                t.fix_versions,
                t.affects_versions,
                t.parent_key,
                t.parent_summary,
                t.custom_fields,
                t.raw_json,
                t.exported_at,
            ],
        )?;

        for c in &bundle.comments {
            tx.execute(
                "INSERT INTO comments (id, ticket_key, author_id, author_name,
                     author_email, body, body_raw, created, updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    c.id,
                    key,
                    c.author.id,
                    c.author.name,
                    c.author.email,
                    c.body,
                    c.body_raw,
                    c.created,
                    c.updated,
                ],
            )?;
        }

        for ch in &bundle.changelog {
            tx.execute(
                "INSERT INTO changelog (ticket_key, field, field_type, from_value,
                     to_value, author_id, author_name, author_email, created)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    key,
                    ch.field,
                    ch.field_type,
                    ch.from_value,
                    ch.to_value,
                    ch.author.id,
                    ch.author.name,
                    ch.author.email,
                    ch.created,
                ],
            )?;
        }

        for link in &bundle.links {
            tx.execute(
                "INSERT INTO issue_links (ticket_key, link_type, inward_key, outward_key)
                 VALUES (?1, ?2, ?3, ?4)",
                params![key, link.link_type, link.inward_key, link.outward_key],
            )?;
        }

        for st in &bundle.subtasks {
            tx.execute(
                "INSERT INTO subtasks (ticket_key, subtask_key, subtask_summary)
                 VALUES (?1, ?2, ?3)",
                params![key, st.key, st.summary],
            )?;
        }

        tx.commit()
    }

    /// Refresh the full-text index entries for the given ticket keys,
    /// re-deriving them from the relational tables. Called after each
    /// committed batch; an empty key set is a no-op.
    pub fn sync_fts(&self, keys: &[String]) -> Result<()> {
        for chunk in keys.chunks(KEY_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let tx = self.conn.unchecked_transaction()?;

            tx.execute(
                &format!("DELETE FROM tickets_fts WHERE key IN ({})", placeholders),
                params_from_iter(chunk.iter()),
            )?;
            tx.execute(
                &format!("{} WHERE t.key IN ({})", FTS_INSERT_SELECT, placeholders),
                params_from_iter(chunk.iter()),
            )?;

            tx.commit()?;
        }
        Ok(())
    }

    /// Drop and fully reconstruct the full-text index from current table
    /// contents. The recovery path, and the only path that removes index
    /// entries for tickets deleted outside this tool.
    pub fn rebuild_fts(&self) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM tickets_fts", [])?;
        tx.execute(FTS_INSERT_SELECT, [])?;
        tx.commit()?;
        Ok(())
    }

    /// Schema top-up plus full index rebuild, then ANALYZE and VACUUM.
    /// Used to migrate databases created by earlier versions.
    pub fn optimize(&self) -> Result<()> {
        self.ensure_schema()?;
        self.rebuild_fts()?;
        self.conn.execute_batch("ANALYZE")?;
        // VACUUM must run outside any transaction.
        self.conn.execute_batch("VACUUM")?;
        Ok(())
    }

    /// Full-text search over key, summary, description, and comment
    /// bodies. Multi-word input is matched as a phrase, single words as a
    /// prefix.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let fts_query = if query.contains(' ') {
            format!("\"{}\"", query.replace('"', ""))
        } else {
            format!("{}*", query)
        };

        let mut stmt = self.conn.prepare(
            "SELECT t.key, t.status, t.summary
             FROM tickets t
             JOIN tickets_fts ON t.key = tickets_fts.key
             WHERE tickets_fts MATCH ?1
             ORDER BY tickets_fts.rank
             LIMIT ?2",
        )?;

        let hits = stmt
            .query_map(params![fts_query, limit as i64], |row| {
                Ok(SearchHit {
                    key: row.get(0)?,
                    status: row.get(1)?,
                    summary: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(hits)
    }

    pub fn ticket_keys(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT key FROM tickets ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    pub fn stats(&self) -> Result<Stats> {
        let count = |sql: &str| -> Result<i64> {
            Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
        };
        Ok(Stats {
            tickets: count("SELECT COUNT(*) FROM tickets")?,
            comments: count("SELECT COUNT(*) FROM comments")?,
            changelog_entries: count("SELECT COUNT(*) FROM changelog")?,
            projects: count("SELECT COUNT(DISTINCT project_key) FROM tickets")?,
        })
    }
}

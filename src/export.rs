//! Pagination driver: pulls pages from the upstream source and pushes each
//! issue through the mapper and the writer, one ticket transaction at a
//! time. A fetch failure abandons the rest of the query but keeps every
//! ticket already committed.

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::db::Database;
use crate::error::ExportError;
use crate::mapper;
use crate::models::{ExportReport, IssuePage, QuerySpec};

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// The upstream collaborator: returns one page of raw issues for a query.
/// Retry and backoff for transient errors are its own responsibility; an
/// error here means the page is unfetchable.
pub trait IssueSource {
    fn fetch_page(
        &self,
        query: &QuerySpec,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<IssuePage>;
}

/// Run one export query to completion (or until a page fetch fails).
///
/// Pages are processed strictly in order and one at a time; within a page,
/// issues are written in the order received. The full-text index is synced
/// after each page's commits, so it never reflects an uncommitted write.
pub fn export_query(
    source: &dyn IssueSource,
    db: &Database,
    query: &QuerySpec,
    page_size: usize,
) -> Result<ExportReport> {
    let mut report = ExportReport::default();
    let mut cursor: Option<String> = None;
    let mut page = 0usize;

    loop {
        page += 1;
        let batch = match source.fetch_page(query, cursor.as_deref(), page_size) {
            Ok(batch) => batch,
            Err(err) => {
                let failure = ExportError::FetchFailure {
                    page,
                    detail: format!("{:#}", err),
                };
                warn!("{}; keeping {} tickets from prior pages", failure, report.count);
                report.fetch_error = Some(failure.to_string());
                return Ok(report);
            }
        };

        if let Some(total) = batch.total {
            if page == 1 {
                info!("upstream reports {} issues for query", total);
            }
        }

        let exported_at = Utc::now().to_rfc3339();
        let mut synced_keys = Vec::with_capacity(batch.issues.len());

        for issue in &batch.issues {
            let bundle = match mapper::map_issue(issue, &exported_at) {
                Ok(bundle) => bundle,
                Err(err) => {
                    warn!("skipping issue: {}", err);
                    report.failed_keys.push(issue_label(issue));
                    continue;
                }
            };

            let key = bundle.ticket.key.clone();
            match db.upsert_ticket(&bundle) {
                Ok(()) => {
                    report.count += 1;
                    synced_keys.push(key);
                }
                Err(err) => {
                    warn!("{}", err);
                    report.failed_keys.push(key);
                }
            }
        }

        db.sync_fts(&synced_keys)?;
        info!(
            "page {}: committed {} of {} issues",
            page,
            synced_keys.len(),
            batch.issues.len()
        );

        let exhausted = batch.issues.len() < page_size || batch.next_cursor.is_none();
        if exhausted {
            return Ok(report);
        }
        cursor = batch.next_cursor;
    }
}

/// Best-effort identifier for an issue that failed mapping, for the run
/// summary. Malformed issues by definition lack a key.
fn issue_label(issue: &serde_json::Value) -> String {
    issue
        .get("key")
        .or_else(|| issue.get("id"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or("<unknown>")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use serde_json::{json, Value};
    use std::cell::RefCell;
    use tempfile::tempdir;

    /// Scripted source: a fixed sequence of pages, any of which can be an
    /// injected fetch failure.
    struct FakeSource {
        pages: RefCell<Vec<Result<Vec<Value>, String>>>,
    }

    impl FakeSource {
        fn new(pages: Vec<Result<Vec<Value>, String>>) -> Self {
            FakeSource {
                pages: RefCell::new(pages),
            }
        }
    }

    impl IssueSource for FakeSource {
        fn fetch_page(
            &self,
            _query: &QuerySpec,
            _cursor: Option<&str>,
            _page_size: usize,
        ) -> Result<IssuePage> {
            let mut pages = self.pages.borrow_mut();
            if pages.is_empty() {
                return Ok(IssuePage::default());
            }
            match pages.remove(0) {
                Ok(issues) => {
                    let next_cursor = if pages.is_empty() {
                        None
                    } else {
                        Some("next".to_string())
                    };
                    Ok(IssuePage {
                        issues,
                        next_cursor,
                        total: None,
                    })
                }
                Err(msg) => bail!(msg),
            }
        }
    }

    fn issue(key: &str, summary: &str) -> Value {
        json!({"key": key, "fields": {"summary": summary}})
    }

    fn setup_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        (db, dir)
    }

    fn query() -> QuerySpec {
        QuerySpec::Jql("project = T".to_string())
    }

    #[test]
    fn test_exports_all_pages() {
        let (db, _dir) = setup_test_db();
        let source = FakeSource::new(vec![
            Ok(vec![issue("T-1", "one"), issue("T-2", "two")]),
            Ok(vec![issue("T-3", "three")]),
        ]);

        let report = export_query(&source, &db, &query(), 2).unwrap();

        assert_eq!(report.count, 3);
        assert!(report.failed_keys.is_empty());
        assert!(!report.aborted());
        assert_eq!(db.ticket_keys().unwrap(), vec!["T-1", "T-2", "T-3"]);
    }

    #[test]
    fn test_partial_run_salvage_on_fetch_failure() {
        let (db, _dir) = setup_test_db();
        let source = FakeSource::new(vec![
            Ok(vec![issue("T-1", "one"), issue("T-2", "two")]),
            Err("502 from upstream".to_string()),
            Ok(vec![issue("T-3", "never reached")]),
        ]);

        let report = export_query(&source, &db, &query(), 2).unwrap();

        // Page 1 committed, pages 2-3 absent, failure reported.
        assert_eq!(report.count, 2);
        assert!(report.aborted());
        assert!(report.fetch_error.as_ref().unwrap().contains("page 2"));
        assert_eq!(db.ticket_keys().unwrap(), vec!["T-1", "T-2"]);
    }

    #[test]
    fn test_malformed_record_is_skipped_not_fatal() {
        let (db, _dir) = setup_test_db();
        let source = FakeSource::new(vec![Ok(vec![
            issue("T-1", "fine"),
            json!({"id": "10010", "fields": {"summary": "no key"}}),
            issue("T-2", "also fine"),
        ])]);

        let report = export_query(&source, &db, &query(), 10).unwrap();

        assert_eq!(report.count, 2);
        assert_eq!(report.failed_keys, vec!["10010"]);
        assert_eq!(db.ticket_keys().unwrap(), vec!["T-1", "T-2"]);
    }

    #[test]
    fn test_write_failure_records_key_and_continues() {
        let (db, _dir) = setup_test_db();
        // Duplicate comment ids within one issue make its transaction fail.
        let bad = json!({
            "key": "T-2",
            "fields": {"summary": "bad"},
            "comments": [{"id": "1", "body": "a"}, {"id": "1", "body": "b"}],
        });
        let source = FakeSource::new(vec![Ok(vec![
            issue("T-1", "fine"),
            bad,
            issue("T-3", "fine"),
        ])]);

        let report = export_query(&source, &db, &query(), 10).unwrap();

        assert_eq!(report.count, 2);
        assert_eq!(report.failed_keys, vec!["T-2"]);
        assert_eq!(db.ticket_keys().unwrap(), vec!["T-1", "T-3"]);
    }

    #[test]
    fn test_index_synced_after_each_page() {
        let (db, _dir) = setup_test_db();
        let source = FakeSource::new(vec![Ok(vec![issue("T-1", "unique xylophone term")])]);

        export_query(&source, &db, &query(), 10).unwrap();

        let hits = db.search("xylophone", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "T-1");
    }

    #[test]
    fn test_short_page_ends_run() {
        let (db, _dir) = setup_test_db();
        // Second scripted page would yield a cursor, but the short first
        // page already signals end-of-results.
        let source = FakeSource::new(vec![
            Ok(vec![issue("T-1", "only")]),
            Ok(vec![issue("T-2", "should not be fetched")]),
        ]);

        let report = export_query(&source, &db, &query(), 5).unwrap();

        assert_eq!(report.count, 1);
        assert_eq!(db.ticket_keys().unwrap(), vec!["T-1"]);
    }

    #[test]
    fn test_rerun_converges_to_same_state() {
        let (db, _dir) = setup_test_db();
        let pages = || {
            FakeSource::new(vec![Ok(vec![
                json!({
                    "key": "T-1",
                    "fields": {"summary": "s"},
                    "comments": [{"id": "1", "body": "hello"}],
                }),
                issue("T-2", "two"),
            ])])
        };

        export_query(&pages(), &db, &query(), 10).unwrap();
        let first = db.stats().unwrap();
        export_query(&pages(), &db, &query(), 10).unwrap();
        let second = db.stats().unwrap();

        assert_eq!(first.tickets, second.tickets);
        assert_eq!(first.comments, second.comments);
        assert_eq!(second.comments, 1);
    }
}

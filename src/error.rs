use thiserror::Error;

/// Errors produced by the export engine.
///
/// Per-record errors (`MalformedRecord`, `WriteFailure`) are recovered
/// locally by the pagination driver: the record is skipped, its key is
/// recorded, and the run continues. `FetchFailure` abandons the remainder
/// of the current query only. `Schema` is fatal for the run.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("malformed issue record: {0}")]
    MalformedRecord(String),

    #[error("failed to write ticket {key}: {source}")]
    WriteFailure {
        key: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to fetch page {page}: {detail}")]
    FetchFailure { page: usize, detail: String },

    #[error("schema error: {0}")]
    Schema(#[source] rusqlite::Error),
}

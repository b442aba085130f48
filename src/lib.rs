//! Export JIRA Cloud tickets into self-contained SQLite databases with a
//! full-text search index.
//!
//! The export engine is batch-sequential: the pagination driver
//! ([`export`]) pulls one page at a time from the upstream source
//! ([`jira`]), the mapper ([`mapper`]) normalizes each issue into row
//! sets, and the store ([`db`]) commits each ticket in a single
//! transaction before the next is processed. The full-text index is
//! synced after each page and can always be rebuilt from the relational
//! tables.

pub mod db;
pub mod error;
pub mod export;
pub mod jira;
pub mod mapper;
pub mod models;

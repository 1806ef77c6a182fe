//! Error taxonomy for the temporal schema engine.
//!
//! Every error kind named in the design corresponds to exactly one variant here;
//! there is no catch-all "Other" bucket. DDL errors abort the enclosing transaction,
//! query-rewrite errors propagate to the caller without side effects, and timestamp
//! parse errors in the enumerator (C8) are filtered rather than surfaced.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemporalError {
    #[error("unsupported database backend: {0} (requires PostgreSQL >= 9.0)")]
    UnsupportedDatabase(String),

    #[error("table '{0}' is not temporal")]
    NonTemporalTable(String),

    #[error("create_table({0}, temporal: true) requires a primary key")]
    PrimaryKeyRequired(String),

    #[error("malformed timestamp: {0:?}")]
    MalformedTimestamp(String),

    #[error("timestamp is not tagged UTC: {0}")]
    NonUtcTimestamp(String),

    #[error("history row {0} is read-only")]
    ReadOnlyRecord(u64),

    #[error("search_path restoration deferred: enclosing transaction is aborted")]
    AbortedTransactionPathRestore,

    #[error("database driver error: {0}")]
    Driver(#[from] postgres::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TemporalError>;

use std::path::PathBuf;

use crate::backend::BackendError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("operator '{operator}' is not supported on field '{field}'")]
    InvalidOperatorKind {
        field: &'static str,
        operator: &'static str,
    },

    #[error("operator '{0}' has no negation")]
    UnsupportedNegation(&'static str),

    #[error("unknown condition operation: {0}")]
    UnknownOperationKind(String),

    #[error("malformed condition: {0}")]
    MalformedCondition(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(&'static str),

    #[error("unknown field '{field}' for schema '{schema}'")]
    UnknownField { schema: &'static str, field: String },

    #[error("field '{field}' cannot hold a {found} value")]
    FieldValueMismatch {
        field: &'static str,
        found: &'static str,
    },

    #[error("unknown file format: {}", .0.display())]
    UnknownFileFormat(PathBuf),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("background task failed: {0}")]
    Task(String),
}

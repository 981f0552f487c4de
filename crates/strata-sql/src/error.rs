//! The engine error taxonomy.
//!
//! Every error the engine can surface is enumerated here and returned
//! verbatim to callers; none are wrapped or re-classified on the way out.

use thiserror::Error;

use strata_kv::StoreError;

/// Errors surfaced by the SQL engine.
#[derive(Debug, Error)]
pub enum SqlError {
    /// A statement needing an implicit database ran before USE DATABASE.
    #[error("no database selected")]
    NoDatabaseSelected,

    /// CREATE DATABASE with a name already in the catalog.
    #[error("database already exists")]
    DatabaseAlreadyExists,

    /// A statement referenced an unknown database.
    #[error("database does not exist")]
    DatabaseDoesNotExist,

    /// CREATE TABLE with a name already in the database.
    #[error("table already exists")]
    TableAlreadyExists,

    /// A statement referenced an unknown table.
    #[error("table does not exist")]
    TableDoesNotExist,

    /// A statement referenced an unknown column.
    #[error("column does not exist")]
    ColumnDoesNotExist,

    /// A column definition collided with an existing column.
    #[error("column already exists")]
    ColumnAlreadyExists,

    /// The same column was named twice in one statement.
    #[error("duplicated column")]
    DuplicatedColumn,

    /// The declared primary key is missing or of an unsupported type.
    #[error("invalid primary key")]
    InvalidPK,

    /// UPSERT without a value for the primary-key column.
    #[error("primary key can not be null")]
    PKCanNotBeNull,

    /// CREATE INDEX on an already-indexed column.
    #[error("index already exists")]
    IndexAlreadyExists,

    /// UPSERT with a VALUES list whose length differs from the column list.
    #[error("invalid number of values")]
    InvalidNumberOfValues,

    /// A value was incompatible with its column type or operation.
    #[error("invalid value")]
    InvalidValue,

    /// A comparison between values of incompatible types.
    #[error("values are not comparable")]
    NotComparableValues,

    /// A named parameter was not present in the parameter map.
    #[error("unresolved parameter '@{0}'")]
    UnresolvedParameter(String),

    /// An unqualified column name matched more than one table in scope.
    #[error("ambiguous selector")]
    AmbiguousSelector,

    /// A join ON clause did not reference a column from each side.
    #[error("joint column not found")]
    JointColumnNotFound,

    /// Expected terminator of a row stream; not a failure.
    #[error("no more rows")]
    NoMoreRows,

    /// The statement text failed to parse.
    #[error("syntax error at offset {offset}: {message}")]
    Syntax {
        /// Byte offset of the offending token.
        offset: usize,
        /// Human-readable description.
        message: String,
    },

    /// The persisted catalog is inconsistent.
    #[error("corrupted catalog: {0}")]
    CorruptedCatalog(String),

    /// An error from the underlying store.
    #[error("store error")]
    Store(#[from] StoreError),
}

impl SqlError {
    /// Builds a syntax error at the given byte offset.
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        SqlError::Syntax {
            offset,
            message: message.into(),
        }
    }
}

/// Result type for engine operations.
pub type SqlResult<T> = Result<T, SqlError>;

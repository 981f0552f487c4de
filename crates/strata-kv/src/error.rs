//! Error types for store operations.

use thiserror::Error;

/// Errors surfaced by a key-value store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A scan was requested with `from >= to`.
    #[error("invalid scan range")]
    InvalidRange,

    /// A key exceeded the store's key size limit.
    #[error("key too large: {0} bytes")]
    KeyTooLarge(usize),

    /// A value exceeded the store's value size limit.
    #[error("value too large: {0} bytes")]
    ValueTooLarge(usize),

    /// An operation was attempted on a closed cursor.
    #[error("cursor already closed")]
    CursorClosed,

    /// Backend-specific failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

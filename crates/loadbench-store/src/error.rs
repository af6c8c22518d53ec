//! Destination store error types.

/// Errors produced by [`DestinationStore`](crate::DestinationStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A row value could not be serialized for storage.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Rows were written to a table whose staging area was never prepared.
    #[error("no staging table prepared for {0}")]
    MissingStaging(String),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("destination lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StoreError>;

use std::path::PathBuf;

use thiserror::Error;

/// Failures from `TaskStore` operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("task {0} not found")]
    NotFound(i64),

    #[error("stored timestamp {0} is out of range")]
    Timestamp(i64),
}

/// Failures from reading or writing the durable flag file.
#[derive(Debug, Error)]
pub enum FlagError {
    #[error("flag storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("flag file is malformed: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failures on the one-time import path. None of these leave partial rows
/// in the store or set the seed flag.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("seed resource not found: {}", .0.display())]
    ResourceNotFound(PathBuf),

    #[error("failed to read seed resource: {0}")]
    Io(#[source] std::io::Error),

    #[error("failed to decode seed data: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Flag(#[from] FlagError),

    #[error("seed import failed: {0}")]
    Store(#[from] StoreError),

    #[error("seed worker exited without reporting a result")]
    WorkerLost,
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_readable() {
        assert_eq!(StoreError::NotFound(7).to_string(), "task 7 not found");
        let e = SeedError::ResourceNotFound(PathBuf::from("/tmp/todos.json"));
        assert_eq!(e.to_string(), "seed resource not found: /tmp/todos.json");
    }
}

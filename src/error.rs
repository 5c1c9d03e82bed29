//! Crate-wide error type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (catalog files, report output).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed catalog input that cannot be skipped (e.g. missing header).
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Rejected configuration (depth ordering, encoding limits).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Storage backend failure: connect, shard creation, batch write, or query.
    #[error("storage error: {0}")]
    Storage(String),

    /// Pool construction established zero connections.
    #[error("connection pool is empty: no connection could be established")]
    NoConnections,
}

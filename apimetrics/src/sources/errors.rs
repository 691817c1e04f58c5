use std::{path::PathBuf, time::Duration};
use thiserror::Error;

/// I/O and connectivity failures at the data source boundary.
///
/// These are opaque to the engine: they are never retried here and are surfaced as-is.
#[derive(Error, Debug)]
pub enum DataSourceError {
    /// The source is not configured well enough to be contacted
    #[error("Data source not configured: {message}")]
    NotConfigured { message: String },

    /// The log file could not be opened or read
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The log file could not be read as delimited text
    #[error("Failed to parse {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: ::csv::Error,
    },

    /// The database could not be reached (connection refused, TLS, pool exhausted or closed)
    #[error("Database unreachable: {0}")]
    Unreachable(anyhow::Error),

    /// The database was reached but the query failed
    #[error("Database query failed: {0}")]
    Query(anyhow::Error),

    /// The query did not complete in time
    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    /// The blocking loader task panicked or was cancelled
    #[error("Data source task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Categorise sqlx errors into "could not reach" and "reached but failed"
impl From<sqlx::Error> for DataSourceError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_)
            | sqlx::Error::WorkerCrashed => DataSourceError::Unreachable(anyhow::Error::from(err)),
            _ => DataSourceError::Query(anyhow::Error::from(err)),
        }
    }
}

/// Type alias for data source results
pub type Result<T> = std::result::Result<T, DataSourceError>;

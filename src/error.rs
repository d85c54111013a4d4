// ABOUTME: Error taxonomy for the ingestion pipeline
// ABOUTME: Typed failures for connection, query, mapping, validation, retry and cancellation

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EtlError>;

/// Errors raised by the core pipeline components.
///
/// Commands wrap these in `anyhow` with phase/table context; the original
/// variant stays reachable through `downcast_ref::<EtlError>()`.
#[derive(Error, Debug)]
pub enum EtlError {
    /// Source or destination unreachable
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed query, catalog lookup failure or undecodable value
    #[error("query error: {0}")]
    Query(String),

    /// Declared source type has no destination type in the mapping table
    #[error("unsupported column type '{declared_type}' for column '{column}'")]
    TypeMapping {
        column: String,
        declared_type: String,
    },

    /// Identifier or configuration value rejected before any query is built
    #[error("validation error: {0}")]
    Validation(String),

    /// Operation still failing after the configured number of attempts
    #[error("retry exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<EtlError>,
    },

    /// Cooperative shutdown
    #[error("operation cancelled")]
    Cancelled,

    /// A load aborted at one batch; earlier batches stay committed
    #[error("failed to insert batch {batch}/{total} into {table}: {source}")]
    BatchFailed {
        table: String,
        batch: usize,
        total: usize,
        #[source]
        source: Box<EtlError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    /// True if this error, or the error it wraps, is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            EtlError::Cancelled => true,
            EtlError::BatchFailed { source, .. } => source.is_cancelled(),
            EtlError::RetryExhausted { last, .. } => last.is_cancelled(),
            _ => false,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        EtlError::Validation(message.into())
    }
}

impl From<tokio_postgres::Error> for EtlError {
    fn from(err: tokio_postgres::Error) -> Self {
        // A closed connection surfaces as a driver error without a SQLSTATE
        if err.is_closed() {
            EtlError::Connection(err.to_string())
        } else {
            EtlError::Query(format!("{:?}", err))
        }
    }
}

impl From<reqwest::Error> for EtlError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            EtlError::Connection(err.to_string())
        } else {
            EtlError::Query(err.to_string())
        }
    }
}

use thiserror::Error;

use crate::BackendKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the backend adapters and the sample dataset.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Opening the connection to a backend failed. Connections are never retried.
    #[error("could not connect to {backend}: {source}")]
    Connect {
        backend: BackendKind,
        #[source]
        source: Box<Error>,
    },
    #[error("mysql: {0}")]
    Mysql(#[from] mysql::Error),
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    HandlerSocket(#[from] handlersocket::Error),
    #[error("sample file: {0}")]
    Io(#[from] std::io::Error),
    #[error("sample file: {0}")]
    Csv(#[from] csv::Error),
    /// A line of an exported sample could not be read back.
    #[error("sample file line {line}: {detail}")]
    SampleFormat { line: u64, detail: String },
    /// A bulk load was requested before the sample was written to disk.
    #[error("sample has not been exported, {0} bulk loads from a file")]
    NotExported(BackendKind),
    #[error("invalid {what} {value:?}: {reason}")]
    InvalidConfig {
        what: &'static str,
        value: String,
        reason: &'static str,
    },
    /// A backend returned a row that does not look like a sample row.
    #[error("unexpected row from {backend}: {detail}")]
    BadRow { backend: BackendKind, detail: String },
}

impl Error {
    pub(crate) fn connect(backend: BackendKind, source: impl Into<Error>) -> Self {
        Self::Connect {
            backend,
            source: Box::new(source.into()),
        }
    }
}

use bstr::BString;
use thiserror::Error;

/// Errors returned by the [`Client`][crate::Client].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The socket failed while connecting, writing or reading.
    #[error("handlersocket i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// The server answered with a non-zero error code.
    #[error("handlersocket error {code}: {message}")]
    Server { code: u32, message: String },
    /// The server sent something that is not a valid response line.
    #[error("malformed handlersocket response {0:?}")]
    Malformed(BString),
    /// The server closed the connection before answering.
    #[error("handlersocket connection closed by server")]
    Closed,
    /// A request referenced an index slot that was never opened on this connection.
    #[error("index {0} has not been opened on this connection")]
    UnknownIndex(u32),
}

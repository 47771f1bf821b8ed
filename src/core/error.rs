//! Errors a downstream handler can return through the tracker.

use thiserror::Error;

/// Failure reported by the downstream handler.
///
/// The tracker records the request as a 500 and hands the error back to
/// the caller unchanged.
#[derive(Debug, Error)]
pub enum Error {
    #[error("handler error: {0}")]
    Handler(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Handler(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Handler(msg.to_owned())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Network error types

use std::io;

use crate::protocol::ErrorCode;

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection rejected: {0}")]
    Rejected(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Hub error ({code:?}): {message}")]
    Remote { code: ErrorCode, message: String },
}

impl From<Error> for huddle_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Remote {
                code: ErrorCode::NotFound,
                message,
            } => huddle_core::Error::NotFound(message),
            Error::Remote {
                code: ErrorCode::InvalidOperation,
                message,
            } => huddle_core::Error::InvalidOperation(message),
            Error::Remote { message, .. } => huddle_core::Error::Store(message),
            other => huddle_core::Error::Transport(other.to_string()),
        }
    }
}

use std::path::PathBuf;

use thiserror::Error;

/// Errors from session state handling.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Session id failed validation; refuses path traversal through the
    /// state directory.
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),

    /// A state file exists but cannot be parsed.
    #[error("corrupt session state at {}: {reason}", path.display())]
    CorruptSessionState { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;

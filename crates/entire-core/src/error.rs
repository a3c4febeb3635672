use thiserror::Error;

/// Errors raised by the shared primitives.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A transcript line could not be parsed as JSON.
    #[error("unparseable transcript at {path} line {line}")]
    TranscriptUnparseable { path: String, line: usize },

    /// A checkpoint id string is not 12 lowercase hex characters.
    #[error("malformed checkpoint id: {0:?}")]
    MalformedCheckpointId(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

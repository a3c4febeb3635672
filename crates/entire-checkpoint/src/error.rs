use thiserror::Error;

/// Errors from checkpoint, condensation, attribution and rewind flows.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// A rebase is replaying commits; checkpoint work is deferred.
    #[error("rebase in progress")]
    RebaseInProgress,

    /// Lost the shadow-ref advance race twice in a row.
    #[error("lost shadow ref race on {0}")]
    ShadowRefLostRace(String),

    /// The metadata branch could not be advanced within the retry budget.
    #[error("metadata branch conflict after {attempts} attempts")]
    MetadataRefConflict { attempts: u32 },

    /// `content_hash.txt` disagrees with `full.jsonl` (invariant I3).
    #[error("content hash mismatch: expected {expected}, got {actual}")]
    ContentHashMismatch { expected: String, actual: String },

    /// A rewind point references a commit that no longer exists.
    #[error("rewind point not found: {0}")]
    RewindPointNotFound(String),

    #[error(transparent)]
    Git(#[from] entire_git::GitError),

    #[error(transparent)]
    Session(#[from] entire_session::SessionError),

    #[error(transparent)]
    Core(#[from] entire_core::CoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

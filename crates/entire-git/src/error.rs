use thiserror::Error;

/// Errors from the repository adapter.
#[derive(Error, Debug)]
pub enum GitError {
    /// The working directory is not inside a git repository (or the
    /// repository is bare).
    #[error("not inside a git repository")]
    RepoUnavailable,

    /// A named ref does not exist.
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// The session's base commit can no longer be read (gc, corrupted
    /// object store).
    #[error("base commit unreadable: {0}")]
    BaseCommitUnreadable(String),

    #[error("git error: {0}")]
    Raw(#[from] git2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GitError>;

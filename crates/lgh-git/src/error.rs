//! Git transport error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while inspecting repositories or delegating to git.
#[derive(Debug, Error)]
pub enum GitError {
    /// The `git` executable could not be located or run.
    #[error("git is not available: {0}")]
    GitUnavailable(String),

    /// `git-http-backend` is missing from the git exec path.
    #[error("git-http-backend not found at {0}")]
    BackendNotFound(PathBuf),

    /// A git subcommand exited unsuccessfully.
    #[error("`{command}` failed: {stderr}")]
    CommandFailed {
        /// The command line that was run.
        command: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The backend produced output that is not a valid CGI response.
    #[error("malformed CGI response: {0}")]
    Cgi(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

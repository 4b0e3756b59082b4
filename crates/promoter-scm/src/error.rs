//! Error types for SCM provider drivers.

use thiserror::Error;

/// Errors produced by SCM driver operations.
#[derive(Debug, Error)]
pub enum ScmError {
    /// Transport-level failure talking to the provider.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The provider rejected the request.
    #[error("provider API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The referenced pull request does not exist on the provider.
    #[error("pull request not found on provider: {0}")]
    PullRequestNotFound(String),

    /// The credential secret is missing the required key.
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    /// The ScmProvider names no known driver variant. The user must fix
    /// the spec.
    #[error("ScmProvider {name} does not configure a known provider variant")]
    UnknownProvider { name: String },
}

impl From<reqwest::Error> for ScmError {
    fn from(err: reqwest::Error) -> Self {
        ScmError::Http(err.to_string())
    }
}

/// Result type for SCM driver operations.
pub type ScmResult<T> = std::result::Result<T, ScmError>;

//! SCM provider drivers for the promotion controller.
//!
//! The driver contract ([`PullRequestProvider`], [`CommitStatusProvider`]),
//! the GitHub implementation, the in-process fake used for testing, and the
//! factory that picks a driver from an `ScmProvider` record.

mod error;
mod fake;
mod github;
mod provider;

pub use error::{ScmError, ScmResult};
pub use fake::{FakeCommitStatus, FakePullRequest, FakeScm};
pub use github::GithubScm;
pub use provider::{
    CommitStatusProvider, DefaultProviderFactory, ProviderFactory, PullRequestProvider,
};

//! Branch SHA resolution from git.
//!
//! The proposed-commit reconciler needs, for each branch, the hydrated head
//! commit and the dry (pre-hydration) commit it was rendered from. The
//! hydrated SHA is the branch head; the dry SHA is read from a
//! `hydrator.metadata` file committed on the branch, falling back to the
//! branch head when the file is absent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

use promoter_model::proposed_commit::ShaState;
use promoter_model::scm_provider::{RepositoryReference, ScmProvider};

use crate::path_lookup::PathLookup;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to run git: {0}")]
    Spawn(String),

    #[error("git {args} failed: {stderr}")]
    CommandFailed { args: String, stderr: String },

    #[error("failed to parse commit time {value}: {source}")]
    CommitTime {
        value: String,
        source: chrono::ParseError,
    },

    #[error("invalid hydrator metadata: {0}")]
    Metadata(serde_json::Error),

    #[error("no SHA recorded for branch {branch}")]
    UnknownBranch { branch: String },

    #[error("ScmProvider {name} does not configure a known provider variant")]
    UnsupportedProvider { name: String },
}

/// Resolved dry and hydrated state of one branch.
#[derive(Debug, Clone)]
pub struct BranchShas {
    pub dry: ShaState,
    pub hydrated: ShaState,
}

/// Resolves the dry/hydrated SHA pair for a branch of a repository.
#[async_trait]
pub trait ShaResolver: Send + Sync {
    async fn resolve(
        &self,
        repo: &RepositoryReference,
        scm: &ScmProvider,
        branch: &str,
    ) -> Result<BranchShas, GitError>;
}

/// Metadata file written by the hydrator on rendered branches.
#[derive(Debug, Deserialize)]
struct HydratorMetadata {
    #[serde(rename = "drySha")]
    dry_sha: String,
    #[serde(rename = "commitTime", default)]
    commit_time: Option<DateTime<Utc>>,
}

/// Resolver shelling out to the `git` binary.
///
/// Clones each repository once into a workdir under `root` and fetches on
/// subsequent calls. Workdirs are tracked in the shared [`PathLookup`] so
/// the daemon can remove them on shutdown.
pub struct GitCliResolver {
    paths: PathLookup,
    root: PathBuf,
}

impl GitCliResolver {
    pub fn new(paths: PathLookup, root: impl Into<PathBuf>) -> Self {
        Self {
            paths,
            root: root.into(),
        }
    }

    fn clone_url(repo: &RepositoryReference, scm: &ScmProvider) -> Result<String, GitError> {
        if let Some(github) = &scm.spec.github {
            let domain = if github.domain.is_empty() {
                "github.com"
            } else {
                &github.domain
            };
            return Ok(format!("https://{domain}/{}/{}.git", repo.owner, repo.name));
        }
        if scm.spec.fake.is_some() {
            // The fake provider addresses repositories on the local
            // filesystem: owner is the parent directory.
            return Ok(format!("{}/{}", repo.owner, repo.name));
        }
        Err(GitError::UnsupportedProvider {
            name: scm.metadata.name.clone(),
        })
    }

    async fn workdir(&self, url: &str) -> Result<PathBuf, GitError> {
        if let Some(existing) = self.paths.get(url) {
            run_git(Some(&existing), &["fetch", "--quiet", "origin"]).await?;
            return Ok(existing);
        }
        let dir = self.root.join(format!("repo-{}", Uuid::new_v4()));
        let dir_str = dir.to_string_lossy().into_owned();
        run_git(None, &["clone", "--quiet", url, &dir_str]).await?;
        debug!(url = %url, dir = %dir.display(), "cloned repository");
        self.paths.set(url, dir.clone());
        Ok(dir)
    }

    async fn branch_head(dir: &Path, branch: &str) -> Result<ShaState, GitError> {
        let sha = run_git(
            Some(dir),
            &["rev-parse", &format!("refs/remotes/origin/{branch}")],
        )
        .await?;
        let time = run_git(Some(dir), &["show", "-s", "--format=%cI", &sha]).await?;
        let commit_time = DateTime::parse_from_rfc3339(&time)
            .map_err(|source| GitError::CommitTime {
                value: time.clone(),
                source,
            })?
            .with_timezone(&Utc);
        Ok(ShaState::new(sha, commit_time))
    }

    async fn dry_state(dir: &Path, hydrated: &ShaState) -> Result<ShaState, GitError> {
        let shown = run_git(
            Some(dir),
            &["show", &format!("{}:hydrator.metadata", hydrated.sha)],
        )
        .await;
        match shown {
            Ok(raw) => {
                let meta: HydratorMetadata =
                    serde_json::from_str(&raw).map_err(GitError::Metadata)?;
                Ok(ShaState::new(
                    meta.dry_sha,
                    meta.commit_time.unwrap_or(hydrated.commit_time),
                ))
            }
            // No metadata file on this branch: the branch is its own source.
            Err(GitError::CommandFailed { .. }) => Ok(hydrated.clone()),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl ShaResolver for GitCliResolver {
    async fn resolve(
        &self,
        repo: &RepositoryReference,
        scm: &ScmProvider,
        branch: &str,
    ) -> Result<BranchShas, GitError> {
        let url = Self::clone_url(repo, scm)?;
        let dir = self.workdir(&url).await?;
        let hydrated = Self::branch_head(&dir, branch).await?;
        let dry = Self::dry_state(&dir, &hydrated).await?;
        Ok(BranchShas { dry, hydrated })
    }
}

async fn run_git(dir: Option<&Path>, args: &[&str]) -> Result<String, GitError> {
    let mut cmd = Command::new("git");
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    let output = cmd
        .args(args)
        .output()
        .await
        .map_err(|e| GitError::Spawn(e.to_string()))?;
    if !output.status.success() {
        return Err(GitError::CommandFailed {
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Programmable resolver for tests.
#[derive(Debug, Default)]
pub struct FakeShaResolver {
    branches: Mutex<HashMap<String, BranchShas>>,
}

impl FakeShaResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, branch: impl Into<String>, shas: BranchShas) {
        self.branches.lock().unwrap().insert(branch.into(), shas);
    }

    /// Record a branch whose dry and hydrated sides resolve independently.
    pub fn set_branch(
        &self,
        branch: &str,
        dry_sha: &str,
        dry_time: DateTime<Utc>,
        hydrated_sha: &str,
        hydrated_time: DateTime<Utc>,
    ) {
        self.set(
            branch,
            BranchShas {
                dry: ShaState::new(dry_sha, dry_time),
                hydrated: ShaState::new(hydrated_sha, hydrated_time),
            },
        );
    }
}

#[async_trait]
impl ShaResolver for FakeShaResolver {
    async fn resolve(
        &self,
        _repo: &RepositoryReference,
        _scm: &ScmProvider,
        branch: &str,
    ) -> Result<BranchShas, GitError> {
        self.branches
            .lock()
            .unwrap()
            .get(branch)
            .cloned()
            .ok_or_else(|| GitError::UnknownBranch {
                branch: branch.to_string(),
            })
    }
}

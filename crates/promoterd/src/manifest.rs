//! JSON manifest loading.
//!
//! The daemon runs against the in-process store; a manifest directory is the
//! stand-in for the external declarative API. Each `*.json` file holds one
//! object tagged by `kind`.

use std::path::Path;

use anyhow::Context as _;
use serde::Deserialize;
use tracing::info;

use promoter_model::commit_status::CommitStatus;
use promoter_model::promotion_strategy::PromotionStrategy;
use promoter_model::proposed_commit::ProposedCommit;
use promoter_model::pull_request::PullRequest;
use promoter_model::scm_provider::{GitRepository, ScmProvider, Secret};
use promoter_store::{ObjectStore, Stores};

#[derive(Debug, Deserialize)]
#[serde(tag = "kind")]
enum Manifest {
    PromotionStrategy(PromotionStrategy),
    ProposedCommit(ProposedCommit),
    PullRequest(PullRequest),
    CommitStatus(CommitStatus),
    ScmProvider(ScmProvider),
    GitRepository(GitRepository),
    Secret(Secret),
}

/// Load every `*.json` manifest under `dir` into the store, in path order.
pub async fn load_dir(stores: &Stores, dir: &Path) -> anyhow::Result<usize> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read manifest directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().map(|ext| ext == "json").unwrap_or(false))
        .collect();
    paths.sort();

    let mut count = 0;
    for path in paths {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let manifest: Manifest = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        apply(stores, manifest)
            .await
            .with_context(|| format!("failed to apply {}", path.display()))?;
        count += 1;
    }
    info!(count, directory = %dir.display(), "loaded manifests");
    Ok(count)
}

async fn apply(stores: &Stores, manifest: Manifest) -> anyhow::Result<()> {
    match manifest {
        Manifest::PromotionStrategy(obj) => {
            stores.promotion_strategies.create(obj).await?;
        }
        Manifest::ProposedCommit(obj) => {
            stores.proposed_commits.create(obj).await?;
        }
        Manifest::PullRequest(obj) => {
            stores.pull_requests.create(obj).await?;
        }
        Manifest::CommitStatus(obj) => {
            stores.commit_statuses.create(obj).await?;
        }
        Manifest::ScmProvider(obj) => {
            stores.scm_providers.create(obj).await?;
        }
        Manifest::GitRepository(obj) => {
            stores.git_repositories.create(obj).await?;
        }
        Manifest::Secret(obj) => {
            stores.secrets.create(obj).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use promoter_store::{MemoryStore, ObjectStore};

    use super::*;

    #[tokio::test]
    async fn loads_tagged_manifests() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("provider.json"),
            r#"{
                "kind": "ScmProvider",
                "metadata": {"name": "fake-provider", "namespace": "default"},
                "spec": {"fake": {}, "secretRef": {"name": "scm-secret"}}
            }"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("secret.json"),
            r#"{
                "kind": "Secret",
                "metadata": {"name": "scm-secret", "namespace": "default"},
                "data": {"token": "t0ken"}
            }"#,
        )
        .unwrap();
        // Non-JSON files are ignored.
        std::fs::write(dir.path().join("README.md"), "not a manifest").unwrap();

        let store = Arc::new(MemoryStore::new());
        let stores = Stores::memory(store);
        let count = load_dir(&stores, dir.path()).await.unwrap();
        assert_eq!(count, 2);

        let provider = stores
            .scm_providers
            .get("default", "fake-provider")
            .await
            .unwrap();
        assert!(provider.spec.fake.is_some());

        let secret = stores.secrets.get("default", "scm-secret").await.unwrap();
        assert_eq!(secret.token(), Some("t0ken"));
    }

    #[tokio::test]
    async fn rejects_malformed_manifests() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{\"kind\": \"Nope\"}").unwrap();

        let store = Arc::new(MemoryStore::new());
        let stores = Stores::memory(store);
        assert!(load_dir(&stores, dir.path()).await.is_err());
    }
}

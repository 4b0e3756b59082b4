//! SCM provider bindings: which driver talks to which repository.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, Resource};

/// Reference to a Git repository and the provider that owns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryReference {
    pub owner: String,
    pub name: String,
    pub scm_provider_ref: NamespacedObjectReference,
}

/// Reference to an object by name, optionally in another namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedObjectReference {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Reference to an object by name in the same namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalObjectReference {
    pub name: String,
}

/// Names one of the driver variants. Exactly one of the variant fields is
/// expected to be set; neither set is a misconfiguration surfaced at
/// reconcile time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScmProviderSpec {
    #[serde(default)]
    pub github: Option<GitHubSpec>,
    #[serde(default)]
    pub fake: Option<FakeSpec>,
    pub secret_ref: LocalObjectReference,
}

/// GitHub driver configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubSpec {
    /// Empty means github.com; anything else is treated as a GitHub
    /// Enterprise domain.
    #[serde(default)]
    pub domain: String,
}

/// In-process fake driver, used for testing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FakeSpec {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScmProvider {
    pub metadata: ObjectMeta,
    pub spec: ScmProviderSpec,
}

impl Resource for ScmProvider {
    const KIND: &'static str = "ScmProvider";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Binds a repository's owner/name to an [`ScmProvider`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRepositorySpec {
    pub owner: String,
    pub name: String,
    pub scm_provider_ref: NamespacedObjectReference,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitRepository {
    pub metadata: ObjectMeta,
    pub spec: GitRepositorySpec,
}

impl Resource for GitRepository {
    const KIND: &'static str = "GitRepository";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Credential material referenced by an [`ScmProvider`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Secret {
    /// The bearer token used by SCM drivers, if present.
    pub fn token(&self) -> Option<&str> {
        self.data.get("token").map(String::as_str)
    }
}

impl Resource for Secret {
    const KIND: &'static str = "Secret";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

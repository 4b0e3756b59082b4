//! CommitStatus: a status check published for one commit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::labels::LABEL_COMMIT_STATUS_COPY;
use crate::meta::{ObjectMeta, Resource};
use crate::scm_provider::RepositoryReference;

/// Field path of the equality index on the annotated sha.
pub const COMMIT_STATUS_SHA_FIELD: &str = ".spec.sha";

/// State of a published status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitStatusState {
    Pending,
    Success,
    Failure,
}

impl std::fmt::Display for CommitStatusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommitStatusState::Pending => "pending",
            CommitStatusState::Success => "success",
            CommitStatusState::Failure => "failure",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitStatusSpec {
    pub repository: RepositoryReference,
    /// The commit being annotated.
    pub sha: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub state: CommitStatusState,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitStatusStatus {
    /// Provider-assigned id of the published status.
    #[serde(default)]
    pub id: String,
    /// The state last pushed to the provider.
    #[serde(default)]
    pub state: Option<CommitStatusState>,
    #[serde(default)]
    pub observed_generation: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitStatus {
    pub metadata: ObjectMeta,
    pub spec: CommitStatusSpec,
    #[serde(default)]
    pub status: CommitStatusStatus,
}

impl CommitStatus {
    /// Whether this record is a copy-forward of another status. Copies are
    /// excluded from gating evaluation.
    pub fn is_copy(&self) -> bool {
        self.metadata.labels.get(LABEL_COMMIT_STATUS_COPY).map(String::as_str) == Some("true")
    }
}

impl Resource for CommitStatus {
    const KIND: &'static str = "CommitStatus";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn indexed_fields(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([(COMMIT_STATUS_SHA_FIELD, self.spec.sha.clone())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serializes_lowercase() {
        let json = serde_json::to_string(&CommitStatusState::Success).unwrap();
        assert_eq!(json, "\"success\"");
    }

    #[test]
    fn copy_detection_by_label() {
        let mut cs = CommitStatus {
            metadata: ObjectMeta::new("default", "health-check"),
            spec: CommitStatusSpec {
                repository: RepositoryReference::default(),
                sha: "abc".into(),
                name: "health".into(),
                description: String::new(),
                state: CommitStatusState::Pending,
                url: String::new(),
            },
            status: CommitStatusStatus::default(),
        };
        assert!(!cs.is_copy());

        cs.metadata
            .labels
            .insert(LABEL_COMMIT_STATUS_COPY.to_string(), "true".to_string());
        assert!(cs.is_copy());
    }

    #[test]
    fn sha_is_indexed() {
        let cs = CommitStatus {
            metadata: ObjectMeta::new("default", "health-check"),
            spec: CommitStatusSpec {
                repository: RepositoryReference::default(),
                sha: "abc123".into(),
                name: "health".into(),
                description: String::new(),
                state: CommitStatusState::Pending,
                url: String::new(),
            },
            status: CommitStatusStatus::default(),
        };
        assert_eq!(
            cs.indexed_fields().get(COMMIT_STATUS_SHA_FIELD),
            Some(&"abc123".to_string())
        );
    }
}

//! GitHub driver for pull requests and commit statuses.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use promoter_model::commit_status::CommitStatus;
use promoter_model::pull_request::PullRequest;

use crate::error::{ScmError, ScmResult};
use crate::provider::{CommitStatusProvider, PullRequestProvider};

const USER_AGENT: &str = concat!("gitops-promoter/", env!("CARGO_PKG_VERSION"));

/// GitHub REST driver. An empty domain targets github.com; anything else is
/// treated as a GitHub Enterprise host.
pub struct GithubScm {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    id: u64,
}

/// API base URL for `domain`.
fn api_base_for(domain: &str) -> String {
    if domain.is_empty() || domain == "github.com" {
        "https://api.github.com".to_string()
    } else {
        format!("https://{domain}/api/v3")
    }
}

impl GithubScm {
    pub fn new(domain: &str, token: &str) -> ScmResult<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            api_base: api_base_for(domain),
            token: token.to_string(),
        })
    }

    fn repo_url(&self, pr_owner: &str, pr_name: &str, tail: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.api_base, pr_owner, pr_name, tail)
    }

    async fn check(&self, response: reqwest::Response) -> ScmResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ScmError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// The provider-side PR number, from status when recorded, otherwise by
    /// listing open PRs for the branch pair.
    async fn resolve_number(&self, pr: &PullRequest) -> ScmResult<u64> {
        if let Ok(number) = pr.status.id.parse::<u64>() {
            return Ok(number);
        }
        let repo = &pr.spec.repository;
        let url = self.repo_url(&repo.owner, &repo.name, "pulls");
        let head = format!("{}:{}", repo.owner, pr.spec.source_branch);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[
                ("state", "open"),
                ("head", head.as_str()),
                ("base", pr.spec.target_branch.as_str()),
            ])
            .send()
            .await?;
        let found: Vec<PullRequestResponse> = self.check(response).await?.json().await?;
        found
            .first()
            .map(|p| p.number)
            .ok_or_else(|| ScmError::PullRequestNotFound(pr.metadata.name.clone()))
    }
}

#[async_trait]
impl PullRequestProvider for GithubScm {
    async fn find_open(&self, pr: &PullRequest) -> ScmResult<bool> {
        let repo = &pr.spec.repository;
        let url = self.repo_url(&repo.owner, &repo.name, "pulls");
        let head = format!("{}:{}", repo.owner, pr.spec.source_branch);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[
                ("state", "open"),
                ("head", head.as_str()),
                ("base", pr.spec.target_branch.as_str()),
            ])
            .send()
            .await?;
        let found: Vec<PullRequestResponse> = self.check(response).await?.json().await?;
        Ok(!found.is_empty())
    }

    async fn create(
        &self,
        title: &str,
        source_branch: &str,
        target_branch: &str,
        description: &str,
        pr: &PullRequest,
    ) -> ScmResult<String> {
        let repo = &pr.spec.repository;
        let url = self.repo_url(&repo.owner, &repo.name, "pulls");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({
                "title": title,
                "head": source_branch,
                "base": target_branch,
                "body": description,
            }))
            .send()
            .await?;
        let created: PullRequestResponse = self.check(response).await?.json().await?;
        debug!(number = created.number, "opened pull request");
        Ok(created.number.to_string())
    }

    async fn update(&self, title: &str, description: &str, pr: &PullRequest) -> ScmResult<()> {
        let repo = &pr.spec.repository;
        let number = self.resolve_number(pr).await?;
        let url = self.repo_url(&repo.owner, &repo.name, &format!("pulls/{number}"));
        let response = self
            .client
            .patch(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "title": title, "body": description }))
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    async fn merge(&self, commit_message: &str, pr: &PullRequest) -> ScmResult<()> {
        let repo = &pr.spec.repository;
        let number = self.resolve_number(pr).await?;
        let url = self.repo_url(&repo.owner, &repo.name, &format!("pulls/{number}/merge"));
        let mut body = json!({});
        if !commit_message.is_empty() {
            body = json!({ "commit_message": commit_message });
        }
        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    async fn close(&self, pr: &PullRequest) -> ScmResult<()> {
        let repo = &pr.spec.repository;
        let number = self.resolve_number(pr).await?;
        let url = self.repo_url(&repo.owner, &repo.name, &format!("pulls/{number}"));
        let response = self
            .client
            .patch(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "state": "closed" }))
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl CommitStatusProvider for GithubScm {
    async fn publish(&self, cs: &CommitStatus) -> ScmResult<String> {
        let repo = &cs.spec.repository;
        let url = self.repo_url(
            &repo.owner,
            &repo.name,
            &format!("statuses/{}", cs.spec.sha),
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({
                "state": cs.spec.state.to_string(),
                "context": cs.spec.name,
                "description": cs.spec.description,
                "target_url": cs.spec.url,
            }))
            .send()
            .await?;
        let published: StatusResponse = self.check(response).await?.json().await?;
        Ok(published.id.to_string())
    }
}

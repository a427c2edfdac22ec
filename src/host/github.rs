//! GitHub implementation of the change-request host

use super::{ChangeRequest, ChangeRequestHost, ChangeRequestRef, RepoLocator};
use crate::workflow::{FailureKind, StepFailure};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const FALLBACK_BRANCH: &str = "main";

/// GitHub REST API client for pull requests
pub struct GitHubHost {
    client: Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryInfo {
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    html_url: String,
    number: u64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

impl GitHubHost {
    /// Create a client against `api_base` (normally `https://api.github.com`)
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Result<Self, StepFailure> {
        let client = Client::builder()
            .user_agent(concat!("patchpilot/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| StepFailure::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn repo_endpoint(&self, repo: &RepoLocator) -> String {
        format!("{}/repos/{}/{}", self.api_base, repo.owner, repo.name)
    }

    /// Turn a non-success response into a categorized failure
    async fn failure_from_response(response: Response) -> StepFailure {
        let status = response.status().as_u16();
        let quota_exhausted = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim() == "0");
        let message = response
            .json::<ApiErrorBody>()
            .await
            .ok()
            .and_then(|body| body.message)
            .unwrap_or_else(|| "no error message".to_string());

        StepFailure::from_http_status(status, quota_exhausted, format!("GitHub API {status}: {message}"))
    }
}

#[async_trait]
impl ChangeRequestHost for GitHubHost {
    async fn default_branch(
        &self,
        repo: &RepoLocator,
        token: &str,
    ) -> Result<String, StepFailure> {
        let response = self
            .client
            .get(self.repo_endpoint(repo))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;

        if !response.status().is_success() {
            let failure = Self::failure_from_response(response).await;
            // Only credential and quota problems matter here; anything else falls back.
            if matches!(failure.kind, FailureKind::Auth | FailureKind::Quota) {
                return Err(failure);
            }
            warn!(
                "Could not read repository info for {}, using '{}': {}",
                repo, FALLBACK_BRANCH, failure
            );
            return Ok(FALLBACK_BRANCH.to_string());
        }

        let info: RepositoryInfo = response.json().await?;
        let branch = info
            .default_branch
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| FALLBACK_BRANCH.to_string());
        debug!("Repository {} default branch: {}", repo, branch);
        Ok(branch)
    }

    async fn open_change_request(
        &self,
        repo: &RepoLocator,
        token: &str,
        request: &ChangeRequest,
    ) -> Result<ChangeRequestRef, StepFailure> {
        info!(
            "Opening pull request on {} from {} into {}",
            repo, request.head, request.base
        );

        let response = self
            .client
            .post(format!("{}/pulls", self.repo_endpoint(repo)))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .json(&serde_json::json!({
                "title": request.title,
                "body": request.body,
                "head": request.head,
                "base": request.base,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::failure_from_response(response).await);
        }

        let created: PullRequestResponse = response.json().await?;
        Ok(ChangeRequestRef {
            url: created.html_url,
            number: created.number,
        })
    }

    async fn find_open_change_request(
        &self,
        repo: &RepoLocator,
        token: &str,
        head: &str,
    ) -> Result<Option<ChangeRequestRef>, StepFailure> {
        let response = self
            .client
            .get(format!("{}/pulls", self.repo_endpoint(repo)))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .query(&[
                ("head", format!("{}:{}", repo.owner, head)),
                ("state", "open".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::failure_from_response(response).await);
        }

        let open: Vec<PullRequestResponse> = response.json().await?;
        Ok(open.into_iter().next().map(|pr| ChangeRequestRef {
            url: pr.html_url,
            number: pr.number,
        }))
    }
}

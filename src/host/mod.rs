//! Repository host abstraction
//!
//! The change-request API of the repository host is an external collaborator:
//! given a pushed branch and some metadata it opens a change-request and
//! reports where it lives.

pub mod github;

pub use github::GitHubHost;

use crate::error::{ErrorCode, PilotError};
use crate::workflow::StepFailure;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

const GITHUB_HOST: &str = "github.com";

/// Parsed, canonical repository location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoLocator {
    /// Canonical `https://github.com/<owner>/<name>` URL
    pub url: String,
    pub owner: String,
    pub name: String,
}

impl RepoLocator {
    /// Parse an https or scp-style GitHub repository location
    pub fn parse(input: &str) -> Result<Self, PilotError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(PilotError::missing_field("repoLocator"));
        }

        let path = if let Some(rest) = input.strip_prefix("git@github.com:") {
            rest.to_string()
        } else {
            let url = Url::parse(input).map_err(|e| {
                PilotError::validation(
                    ErrorCode::VALIDATION_INVALID_FORMAT,
                    format!("repoLocator is not a valid URL: {e}"),
                    Some("repoLocator"),
                )
            })?;
            if url.scheme() != "https" && url.scheme() != "http" {
                return Err(PilotError::validation(
                    ErrorCode::VALIDATION_INVALID_FORMAT,
                    format!("unsupported URL scheme '{}'", url.scheme()),
                    Some("repoLocator"),
                ));
            }
            if url.host_str() != Some(GITHUB_HOST) {
                return Err(PilotError::validation(
                    ErrorCode::VALIDATION_UNSUPPORTED_HOST,
                    format!(
                        "repository host '{}' is not supported",
                        url.host_str().unwrap_or_default()
                    ),
                    Some("repoLocator"),
                ));
            }
            url.path().to_string()
        };

        let mut segments = path
            .trim_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty());
        let owner = segments.next().unwrap_or_default();
        let name = segments
            .next()
            .map(|name| name.trim_end_matches(".git"))
            .unwrap_or_default();

        if owner.is_empty() || name.is_empty() || segments.next().is_some() {
            return Err(PilotError::validation(
                ErrorCode::VALIDATION_INVALID_FORMAT,
                "repoLocator must name exactly <owner>/<repo>",
                Some("repoLocator"),
            ));
        }

        Ok(Self {
            url: format!("https://{GITHUB_HOST}/{owner}/{name}"),
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// Clone URL with an embedded access token
    pub fn authenticated_clone_url(&self, token: &str) -> String {
        format!(
            "https://x-access-token:{token}@{GITHUB_HOST}/{}/{}.git",
            self.owner, self.name
        )
    }
}

impl fmt::Display for RepoLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Metadata for a change-request to open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub title: String,
    pub body: String,
    /// Branch holding the changes
    pub head: String,
    /// Branch the changes should merge into
    pub base: String,
}

/// Identifier and location of an opened change-request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequestRef {
    pub url: String,
    pub number: u64,
}

/// Trait for the repository host's change-request API
#[async_trait]
pub trait ChangeRequestHost: Send + Sync {
    /// Name of the repository's default branch
    async fn default_branch(&self, repo: &RepoLocator, token: &str)
        -> Result<String, StepFailure>;

    /// Open a change-request from an already pushed branch
    async fn open_change_request(
        &self,
        repo: &RepoLocator,
        token: &str,
        request: &ChangeRequest,
    ) -> Result<ChangeRequestRef, StepFailure>;

    /// The open change-request whose source branch is `head`, if any
    async fn find_open_change_request(
        &self,
        repo: &RepoLocator,
        token: &str,
        head: &str,
    ) -> Result<Option<ChangeRequestRef>, StepFailure>;
}

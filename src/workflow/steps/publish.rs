//! Publish: open a change-request for the pushed branch

use super::execute::{truncate_chars, ChangeSummary};
use crate::credentials::{CredentialRef, CredentialVault};
use crate::host::{ChangeRequest, ChangeRequestHost, RepoLocator};
use crate::workflow::{FailureKind, StepFailure};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutput {
    pub pr_url: String,
    pub pr_number: u64,
    pub branch: String,
}

/// Title and body for the change-request; `base` is filled in by the caller
pub fn compose_request(changes: &ChangeSummary, base: String) -> ChangeRequest {
    let files = if changes.files_modified.is_empty() {
        &changes.candidate_files
    } else {
        &changes.files_modified
    };
    ChangeRequest {
        title: format!("AI Change: {}", truncate_chars(&changes.prompt, 60)),
        body: format!(
            "Automated changes by coding agent.\n\nPrompt: {}\n\nFiles modified: {}",
            changes.prompt,
            files.join(", ")
        ),
        head: changes.branch.clone(),
        base,
    }
}

pub async fn run(
    host: &dyn ChangeRequestHost,
    credentials: &CredentialVault,
    repo: &RepoLocator,
    credential: &CredentialRef,
    changes: &ChangeSummary,
) -> Result<PublishOutput, StepFailure> {
    let token = credentials.resolve(credential)?;
    let base = host
        .default_branch(repo, &token)
        .await
        .map_err(|f| f.context("Failed to create PR"))?;
    let request = compose_request(changes, base);

    let created = match host.open_change_request(repo, &token, &request).await {
        Ok(created) => {
            info!("Pull request created: {}", created.url);
            created
        }
        // A retried or resumed publish finds the request it already opened
        Err(failure) if failure.kind == FailureKind::Validation => {
            let existing = host
                .find_open_change_request(repo, &token, &request.head)
                .await
                .map_err(|f| f.context("Failed to create PR"))?;
            match existing {
                Some(existing) => {
                    warn!(
                        "Pull request for {} already open, reusing {}",
                        request.head, existing.url
                    );
                    existing
                }
                None => return Err(failure.context("Failed to create PR")),
            }
        }
        Err(failure) => return Err(failure.context("Failed to create PR")),
    };

    Ok(PublishOutput {
        pr_url: created.url,
        pr_number: created.number,
        branch: changes.branch.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_request_content() {
        let changes = ChangeSummary {
            prompt: "x".repeat(80),
            files_modified: vec!["README.md".into()],
            candidate_files: vec!["app/".into()],
            branch: "ai-change-1".into(),
            timestamp: Utc::now(),
            agent_response: String::new(),
        };
        let request = compose_request(&changes, "develop".into());
        assert_eq!(request.title.chars().count(), "AI Change: ".len() + 60);
        assert!(request.body.ends_with("Files modified: README.md"));
        assert_eq!(request.head, "ai-change-1");
        assert_eq!(request.base, "develop");
    }
}

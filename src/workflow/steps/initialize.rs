//! Initialize: prove the credential is accepted and the repository can be
//! checked out

use crate::credentials::CredentialVault;
use crate::host::ChangeRequestHost;
use crate::session::{SessionDescriptor, SessionFactory};
use crate::workflow::StepFailure;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeOutput {
    pub repo_url: String,
    /// `git remote -v` of the fresh checkout, credentials redacted
    pub repo_info: String,
}

pub async fn run(
    sessions: &dyn SessionFactory,
    host: &dyn ChangeRequestHost,
    credentials: &CredentialVault,
    descriptor: &SessionDescriptor,
) -> Result<InitializeOutput, StepFailure> {
    info!("Initializing session for {}", descriptor.repo);

    // A rejected token surfaces here as Auth instead of an opaque clone failure
    let token = credentials.resolve(&descriptor.credential)?;
    host.default_branch(&descriptor.repo, &token)
        .await
        .map_err(|f| f.context("Repository access check failed"))?;

    let session = sessions
        .open(descriptor)
        .await
        .map_err(|f| f.context("Failed to initialize sandbox"))?;
    let remotes = session
        .run_checked("git", &["remote", "-v"], "git remote")
        .await
        .map_err(|f| f.context("Failed to read repository info"))?;

    Ok(InitializeOutput {
        repo_url: descriptor.repo.url.clone(),
        repo_info: remotes.stdout.trim().to_string(),
    })
}

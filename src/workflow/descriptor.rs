//! Run descriptor: the validated request a run is started from

use crate::credentials::CredentialRef;
use crate::error::{ErrorCode, PilotError};
use crate::host::RepoLocator;
use crate::session::SessionDescriptor;
use crate::status::StepId;
use serde::{Deserialize, Serialize};

/// Everything a run needs, as plain data safe to checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDescriptor {
    pub prompt: String,
    pub repo: RepoLocator,
    pub credential: CredentialRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

impl RunDescriptor {
    /// Validate raw request fields into a descriptor
    pub fn new(
        prompt: &str,
        repo_locator: &str,
        credential: CredentialRef,
        recipient: Option<&str>,
    ) -> Result<Self, PilotError> {
        let descriptor = Self {
            prompt: prompt.trim().to_string(),
            repo: RepoLocator::parse(repo_locator)?,
            credential,
            recipient: recipient
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn validate(&self) -> Result<(), PilotError> {
        if self.prompt.trim().is_empty() {
            return Err(PilotError::missing_field("prompt"));
        }
        match &self.credential {
            CredentialRef::Env { var } if var.trim().is_empty() => {
                Err(PilotError::missing_field("credential"))
            }
            CredentialRef::Vault { handle } if handle.trim().is_empty() => {
                Err(PilotError::missing_field("credential"))
            }
            _ => Ok(()),
        }?;
        if let Some(recipient) = &self.recipient {
            if !recipient.contains('@') {
                return Err(PilotError::validation(
                    ErrorCode::VALIDATION_INVALID_FORMAT,
                    format!("recipient '{recipient}' is not an email address"),
                    Some("recipient"),
                ));
            }
        }
        Ok(())
    }

    /// Steps this run executes, in order
    pub fn steps(&self) -> Vec<StepId> {
        StepId::pipeline(self.recipient.is_some())
    }

    pub fn session(&self) -> SessionDescriptor {
        SessionDescriptor {
            repo: self.repo.clone(),
            credential: self.credential.clone(),
        }
    }
}

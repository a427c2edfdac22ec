//! Ephemeral execution sessions
//!
//! A [`Session`] is a live handle bound to one checkout of the target
//! repository. It is never serialized and never crosses a step boundary: each
//! step opens its own session from a plain [`SessionDescriptor`] and drops it
//! when the step ends, whatever the outcome.

pub mod local;

pub use local::{LocalGitSession, LocalGitSessionFactory};

use crate::credentials::CredentialRef;
use crate::host::RepoLocator;
use crate::workflow::StepFailure;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Plain data needed to (re)open a session for a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub repo: RepoLocator,
    pub credential: CredentialRef,
}

/// Output of a command executed inside a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }
}

/// A live handle to one repository checkout
#[async_trait]
pub trait Session: Send + Sync {
    /// Run a program inside the checkout
    async fn run_command(&self, program: &str, args: &[&str]) -> Result<CommandOutput, StepFailure>;

    /// Read a file relative to the checkout root
    async fn read_file(&self, path: &str) -> Result<String, StepFailure>;

    /// Write a file relative to the checkout root, creating parent directories
    async fn write_file(&self, path: &str, contents: &str) -> Result<(), StepFailure>;

    /// Run a command and turn a non-zero exit into a failure
    async fn run_checked(
        &self,
        program: &str,
        args: &[&str],
        what: &str,
    ) -> Result<CommandOutput, StepFailure> {
        let output = self.run_command(program, args).await?;
        if !output.success() {
            let detail = if output.stderr.trim().is_empty() {
                output.stdout.trim()
            } else {
                output.stderr.trim()
            };
            return Err(StepFailure::unknown(format!(
                "{what} exited with status {}: {detail}",
                output.status_code
            )));
        }
        Ok(output)
    }
}

/// Opens fresh sessions; implementations must never hand out a cached handle
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, descriptor: &SessionDescriptor) -> Result<Box<dyn Session>, StepFailure>;
}

/// Reject absolute paths and parent-directory traversal
pub(crate) fn checked_relative_path(path: &str) -> Result<&std::path::Path, StepFailure> {
    let candidate = std::path::Path::new(path);
    let escapes = candidate.is_absolute()
        || candidate
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
    if path.is_empty() || escapes {
        return Err(StepFailure::validation(format!(
            "path '{path}' must be relative to the repository root"
        )));
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_path_guard() {
        assert!(checked_relative_path("app/page.tsx").is_ok());
        assert!(checked_relative_path(".ai-activity.md").is_ok());
        assert!(checked_relative_path("/etc/passwd").is_err());
        assert!(checked_relative_path("../outside").is_err());
        assert!(checked_relative_path("").is_err());
    }

    #[test]
    fn test_descriptor_holds_reference_not_secret() {
        let descriptor = SessionDescriptor {
            repo: RepoLocator::parse("https://github.com/acme/widgets").unwrap(),
            credential: CredentialRef::env("GITHUB_TOKEN"),
        };
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["credential"]["var"], "GITHUB_TOKEN");
    }
}

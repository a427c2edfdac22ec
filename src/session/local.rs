//! Session provider backed by a local `git clone` in a temporary directory

use super::{checked_relative_path, CommandOutput, Session, SessionDescriptor, SessionFactory};
use crate::credentials::CredentialVault;
use crate::workflow::{FailureKind, StepFailure};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

/// Opens a fresh clone of the target repository for every session
pub struct LocalGitSessionFactory {
    vault: Arc<CredentialVault>,
    command_timeout: Duration,
    workspace_root: Option<PathBuf>,
}

impl LocalGitSessionFactory {
    pub fn new(vault: Arc<CredentialVault>, command_timeout: Duration) -> Self {
        Self {
            vault,
            command_timeout,
            workspace_root: None,
        }
    }

    /// Place session checkouts under `root` instead of the system temp dir
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    fn create_workspace(&self) -> Result<TempDir, StepFailure> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("patchpilot-");
        let workspace = match &self.workspace_root {
            Some(root) => std::fs::create_dir_all(root).and_then(|_| builder.tempdir_in(root)),
            None => builder.tempdir(),
        };
        workspace
            .map_err(|e| StepFailure::config(format!("failed to create session workspace: {e}")))
    }
}

#[async_trait]
impl SessionFactory for LocalGitSessionFactory {
    async fn open(&self, descriptor: &SessionDescriptor) -> Result<Box<dyn Session>, StepFailure> {
        let token = self.vault.resolve(&descriptor.credential)?;
        let workspace = self.create_workspace()?;
        let root = workspace.path().join("repo");

        info!("Cloning {} into {}", descriptor.repo, root.display());
        let clone_url = descriptor.repo.authenticated_clone_url(&token);
        let root_arg = root.to_string_lossy().into_owned();
        let output = run_process(
            "git",
            &["clone", "--quiet", &clone_url, &root_arg],
            workspace.path(),
            self.command_timeout,
        )
        .await
        .map_err(|failure| redact_failure(failure, &token))?;

        if !output.success() {
            return Err(StepFailure::unknown(format!(
                "git clone of {} failed: {}",
                descriptor.repo,
                redact(output.stderr.trim(), &token)
            )));
        }

        Ok(Box::new(LocalGitSession {
            _workspace: workspace,
            root,
            command_timeout: self.command_timeout,
            secret: token,
        }))
    }
}

/// A cloned checkout; the workspace directory is removed on drop
pub struct LocalGitSession {
    _workspace: TempDir,
    root: PathBuf,
    command_timeout: Duration,
    secret: String,
}

impl LocalGitSession {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Session for LocalGitSession {
    async fn run_command(&self, program: &str, args: &[&str]) -> Result<CommandOutput, StepFailure> {
        let mut output = run_process(program, args, &self.root, self.command_timeout)
            .await
            .map_err(|failure| redact_failure(failure, &self.secret))?;
        output.stdout = redact(&output.stdout, &self.secret);
        output.stderr = redact(&output.stderr, &self.secret);
        Ok(output)
    }

    async fn read_file(&self, path: &str) -> Result<String, StepFailure> {
        let relative = checked_relative_path(path)?;
        tokio::fs::read_to_string(self.root.join(relative))
            .await
            .map_err(|e| io_failure("read", path, e))
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), StepFailure> {
        let relative = checked_relative_path(path)?;
        let target = self.root.join(relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure("create directory for", path, e))?;
        }
        tokio::fs::write(&target, contents)
            .await
            .map_err(|e| io_failure("write", path, e))
    }
}

async fn run_process(
    program: &str,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> Result<CommandOutput, StepFailure> {
    debug!("Running {} {:?} in {}", program, args.first(), cwd.display());

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(StepFailure::from_spawn_error(program, &e)),
        Err(_) => {
            return Err(StepFailure::new(
                FailureKind::NetworkTimeout,
                format!("{program} did not finish within {}s", timeout.as_secs()),
            ))
        }
    };

    Ok(CommandOutput {
        status_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

fn io_failure(action: &str, path: &str, err: std::io::Error) -> StepFailure {
    let kind = match err.kind() {
        std::io::ErrorKind::NotFound => FailureKind::Validation,
        std::io::ErrorKind::PermissionDenied => FailureKind::Config,
        _ => FailureKind::Unknown,
    };
    StepFailure::new(kind, format!("failed to {action} {path}: {err}"))
}

fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, "***")
}

fn redact_failure(mut failure: StepFailure, secret: &str) -> StepFailure {
    failure.message = redact(&failure.message, secret);
    failure
}

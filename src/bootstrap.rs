//! Wires configured collaborators into a [`WorkflowEngine`]

use crate::agent::ClaudeCliAgent;
use crate::config::PilotConfig;
use crate::credentials::CredentialVault;
use crate::host::GitHubHost;
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::session::LocalGitSessionFactory;
use crate::status::{RunStatusStore, StatusProjector};
use crate::workflow::{FileCheckpointStore, Pipeline, WorkflowEngine};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

/// A ready engine plus the vault the API stores submitted tokens in
pub struct Services {
    pub engine: WorkflowEngine,
    pub credentials: Arc<CredentialVault>,
}

pub fn build(config: &PilotConfig) -> Result<Services> {
    let credentials = Arc::new(CredentialVault::new());

    let mut sessions =
        LocalGitSessionFactory::new(Arc::clone(&credentials), config.session.command_timeout);
    if let Some(root) = &config.session.workspace_root {
        sessions = sessions.with_workspace_root(root);
    }

    let host = GitHubHost::new(&config.host.api_base, config.host.request_timeout)
        .context("Failed to build repository host client")?;

    let notifier: Arc<dyn Notifier> = match &config.notify.webhook_url {
        Some(url) => Arc::new(
            WebhookNotifier::new(url, config.host.request_timeout)
                .context("Failed to build webhook notifier")?,
        ),
        None => {
            debug!("No webhook configured, notifications will be logged");
            Arc::new(LogNotifier)
        }
    };

    let pipeline = Pipeline::new(
        Arc::new(sessions),
        Arc::new(ClaudeCliAgent::new(&config.agent.program)),
        Arc::new(host),
        notifier,
        Arc::clone(&credentials),
        config.git.clone(),
    );

    let projector = Arc::new(StatusProjector::new(
        Arc::new(RunStatusStore::new()),
        config.watchdog.clone(),
    ));

    let checkpoints = FileCheckpointStore::new(&config.storage.checkpoint_dir);
    debug!(
        "Checkpoints stored in {}",
        config.storage.checkpoint_dir.display()
    );

    let engine = WorkflowEngine::new(
        Arc::new(pipeline),
        projector,
        Arc::new(checkpoints),
        Arc::clone(&credentials),
        config.retry.clone(),
    );

    Ok(Services {
        engine,
        credentials,
    })
}

//! Test doubles and fixtures shared by unit and integration tests

pub mod mocks;
pub mod runner;

pub use mocks::{FailureQueue, MockAgent, MockHost, MockNotifier, MockSessionFactory};
pub use runner::{sample_output, ScriptedRunner};

use crate::credentials::{CredentialRef, CredentialVault};
use crate::status::{RunStatusStore, StatusProjector, WatchdogBounds};
use crate::workflow::steps::GitSettings;
use crate::workflow::{
    CheckpointStore, InMemoryCheckpointStore, Pipeline, RetryPolicy, RunDescriptor, StepRunner,
    WorkflowEngine,
};
use std::sync::Arc;
use std::time::Duration;

pub const TEST_REPO: &str = "https://github.com/acme/widgets";
pub const TEST_TOKEN: &str = "ghp_test_token";

/// Retry schedule short enough for tests
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        ..RetryPolicy::default()
    }
}

pub fn descriptor(credential: CredentialRef, recipient: Option<&str>) -> RunDescriptor {
    RunDescriptor::new("Fix the README", TEST_REPO, credential, recipient)
        .unwrap_or_else(|e| panic!("fixture descriptor is invalid: {e}"))
}

/// Engine over `runner` with a fresh status store
pub fn engine_with(
    runner: Arc<dyn StepRunner>,
    checkpoints: Arc<dyn CheckpointStore>,
    credentials: Arc<CredentialVault>,
) -> WorkflowEngine {
    let projector = StatusProjector::new(Arc::new(RunStatusStore::new()), WatchdogBounds::default());
    WorkflowEngine::new(
        runner,
        Arc::new(projector),
        checkpoints,
        credentials,
        fast_retry(),
    )
}

/// Every collaborator mocked, sharing one credential vault
pub struct MockCollaborators {
    pub credentials: Arc<CredentialVault>,
    pub sessions: Arc<MockSessionFactory>,
    pub agent: Arc<MockAgent>,
    pub host: Arc<MockHost>,
    pub notifier: Arc<MockNotifier>,
}

impl MockCollaborators {
    pub fn new() -> Self {
        Self::with_agent(MockAgent::new().with_edit("README.md", "# widgets\n"))
    }

    pub fn with_agent(agent: MockAgent) -> Self {
        let credentials = Arc::new(CredentialVault::new());
        Self {
            sessions: Arc::new(MockSessionFactory::new(Arc::clone(&credentials))),
            credentials,
            agent: Arc::new(agent),
            host: Arc::new(MockHost::default()),
            notifier: Arc::new(MockNotifier::new()),
        }
    }

    /// A descriptor whose credential resolves to [`TEST_TOKEN`]
    pub fn descriptor(&self, recipient: Option<&str>) -> RunDescriptor {
        descriptor(self.credentials.store(TEST_TOKEN), recipient)
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            self.sessions.clone(),
            self.agent.clone(),
            self.host.clone(),
            self.notifier.clone(),
            Arc::clone(&self.credentials),
            GitSettings::default(),
        )
    }

    pub fn engine(&self) -> WorkflowEngine {
        self.engine_with_checkpoints(Arc::new(InMemoryCheckpointStore::new()))
    }

    pub fn engine_with_checkpoints(&self, checkpoints: Arc<dyn CheckpointStore>) -> WorkflowEngine {
        engine_with(
            Arc::new(self.pipeline()),
            checkpoints,
            Arc::clone(&self.credentials),
        )
    }
}

impl Default for MockCollaborators {
    fn default() -> Self {
        Self::new()
    }
}

//! In-memory stand-ins for the pipeline collaborators

use crate::agent::{AgentRequest, AgentResponse, CodingAgent};
use crate::credentials::CredentialVault;
use crate::host::{ChangeRequest, ChangeRequestHost, ChangeRequestRef, RepoLocator};
use crate::notify::{DeliveryReceipt, Notification, Notifier};
use crate::session::{checked_relative_path, CommandOutput, Session, SessionDescriptor, SessionFactory};
use crate::workflow::StepFailure;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Failures handed out one per call, oldest first
#[derive(Debug, Default)]
pub struct FailureQueue(Mutex<VecDeque<StepFailure>>);

impl FailureQueue {
    pub fn push(&self, failure: StepFailure) {
        lock(&self.0).push_back(failure);
    }

    pub fn next(&self) -> Option<StepFailure> {
        lock(&self.0).pop_front()
    }
}

#[derive(Debug, Default)]
struct SandboxState {
    commands: Vec<String>,
    files: HashMap<String, String>,
    staged: VecDeque<String>,
    command_failures: Vec<(String, StepFailure)>,
}

/// Session factory whose sessions share one recorded sandbox
pub struct MockSessionFactory {
    credentials: Arc<CredentialVault>,
    state: Arc<Mutex<SandboxState>>,
    opens: AtomicU32,
    pub open_failures: FailureQueue,
}

impl MockSessionFactory {
    pub fn new(credentials: Arc<CredentialVault>) -> Self {
        Self {
            credentials,
            state: Arc::default(),
            opens: AtomicU32::new(0),
            open_failures: FailureQueue::default(),
        }
    }

    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Every command line run so far, e.g. `git push origin ai-change-...`
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    pub fn file(&self, path: &str) -> Option<String> {
        lock(&self.state).files.get(path).cloned()
    }

    /// Output of the next `git diff --cached --name-only`
    pub fn stage_diff(&self, names: &[&str]) {
        lock(&self.state).staged.push_back(names.join("\n"));
    }

    /// Fail the next command line starting with `prefix`
    pub fn fail_command(&self, prefix: &str, failure: StepFailure) {
        lock(&self.state)
            .command_failures
            .push((prefix.to_string(), failure));
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    async fn open(&self, descriptor: &SessionDescriptor) -> Result<Box<dyn Session>, StepFailure> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.open_failures.next() {
            return Err(failure);
        }
        self.credentials.resolve(&descriptor.credential)?;
        Ok(Box::new(MockSession {
            repo: descriptor.repo.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockSession {
    repo: RepoLocator,
    state: Arc<Mutex<SandboxState>>,
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput {
        status_code: 0,
        stdout: stdout.into(),
        stderr: String::new(),
    }
}

#[async_trait]
impl Session for MockSession {
    async fn run_command(&self, program: &str, args: &[&str]) -> Result<CommandOutput, StepFailure> {
        let line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");

        let mut state = lock(&self.state);
        state.commands.push(line.clone());
        if let Some(index) = state
            .command_failures
            .iter()
            .position(|(prefix, _)| line.starts_with(prefix.as_str()))
        {
            return Err(state.command_failures.remove(index).1);
        }

        let output = match line.as_str() {
            "git remote -v" => ok(format!(
                "origin\t{url} (fetch)\norigin\t{url} (push)\n",
                url = self.repo.url
            )),
            "git diff --cached --name-only" => ok(state.staged.pop_front().unwrap_or_default()),
            l if l.starts_with("ls") => ok("README.md\nsrc\n"),
            _ => ok(""),
        };
        Ok(output)
    }

    async fn read_file(&self, path: &str) -> Result<String, StepFailure> {
        checked_relative_path(path)?;
        lock(&self.state)
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| StepFailure::validation(format!("{path} does not exist")))
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), StepFailure> {
        checked_relative_path(path)?;
        lock(&self.state)
            .files
            .insert(path.to_string(), contents.to_string());
        Ok(())
    }
}

/// Agent that writes a fixed set of files
#[derive(Default)]
pub struct MockAgent {
    edits: Vec<(String, String)>,
    calls: AtomicU32,
    requests: Mutex<Vec<AgentRequest>>,
    pub failures: FailureQueue,
}

impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_edit(mut self, path: &str, contents: &str) -> Self {
        self.edits.push((path.to_string(), contents.to_string()));
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl CodingAgent for MockAgent {
    async fn apply(
        &self,
        session: &dyn Session,
        request: &AgentRequest,
    ) -> Result<AgentResponse, StepFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());
        if let Some(failure) = self.failures.next() {
            return Err(failure);
        }
        for (path, contents) in &self.edits {
            session.write_file(path, contents).await?;
        }
        Ok(AgentResponse {
            summary: format!("edited {} files", self.edits.len()),
        })
    }
}

/// Change-request host that numbers requests from 1
pub struct MockHost {
    default_branch: String,
    opened: Mutex<Vec<ChangeRequest>>,
    tokens: Mutex<Vec<String>>,
    pub branch_failures: FailureQueue,
    pub failures: FailureQueue,
    /// Failures returned after the change-request was opened, as when the
    /// response is lost on the way back
    pub lost_responses: FailureQueue,
}

impl MockHost {
    pub fn new(default_branch: &str) -> Self {
        Self {
            default_branch: default_branch.to_string(),
            opened: Mutex::default(),
            tokens: Mutex::default(),
            branch_failures: FailureQueue::default(),
            failures: FailureQueue::default(),
            lost_responses: FailureQueue::default(),
        }
    }

    pub fn opened(&self) -> Vec<ChangeRequest> {
        lock(&self.opened).clone()
    }

    pub fn tokens(&self) -> Vec<String> {
        lock(&self.tokens).clone()
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new("main")
    }
}

#[async_trait]
impl ChangeRequestHost for MockHost {
    async fn default_branch(&self, _repo: &RepoLocator, token: &str) -> Result<String, StepFailure> {
        lock(&self.tokens).push(token.to_string());
        match self.branch_failures.next() {
            Some(failure) => Err(failure),
            None => Ok(self.default_branch.clone()),
        }
    }

    async fn open_change_request(
        &self,
        repo: &RepoLocator,
        _token: &str,
        request: &ChangeRequest,
    ) -> Result<ChangeRequestRef, StepFailure> {
        if let Some(failure) = self.failures.next() {
            return Err(failure);
        }
        let mut opened = lock(&self.opened);
        if opened.iter().any(|pr| pr.head == request.head) {
            return Err(StepFailure::from_http_status(
                422,
                false,
                format!("A pull request already exists for {}", request.head),
            ));
        }
        opened.push(request.clone());
        let number = opened.len() as u64;
        if let Some(failure) = self.lost_responses.next() {
            return Err(failure);
        }
        Ok(ChangeRequestRef {
            url: format!("https://github.com/{repo}/pull/{number}"),
            number,
        })
    }

    async fn find_open_change_request(
        &self,
        repo: &RepoLocator,
        _token: &str,
        head: &str,
    ) -> Result<Option<ChangeRequestRef>, StepFailure> {
        let opened = lock(&self.opened);
        Ok(opened
            .iter()
            .position(|pr| pr.head == head)
            .map(|index| {
                let number = index as u64 + 1;
                ChangeRequestRef {
                    url: format!("https://github.com/{repo}/pull/{number}"),
                    number,
                }
            }))
    }
}

#[derive(Default)]
pub struct MockNotifier {
    delivered: Mutex<Vec<Notification>>,
    pub failures: FailureQueue,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Notification> {
        lock(&self.delivered).clone()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<DeliveryReceipt, StepFailure> {
        if let Some(failure) = self.failures.next() {
            return Err(failure);
        }
        let mut delivered = lock(&self.delivered);
        delivered.push(notification.clone());
        Ok(DeliveryReceipt {
            notification_id: format!("notif_mock_{}", delivered.len()),
            status: "sent".to_string(),
        })
    }
}

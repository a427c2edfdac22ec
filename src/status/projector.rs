//! Projects step progress into the [`RunStatusStore`]
//!
//! The projector is the only writer the pipeline uses. It also arms a
//! watchdog per step; the watchdog only ever reports a stall, it never
//! changes a status.

use super::run::{FailureClassification, RunError, StepId, StepStatus};
use super::store::RunStatusStore;
use crate::workflow::StepFailure;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const STALL_CHANNEL_CAPACITY: usize = 64;

/// Expected upper bound for each step, after which a stall is reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogBounds {
    #[serde(default = "default_initialize", with = "humantime_serde")]
    pub initialize: Duration,
    #[serde(default = "default_analyze", with = "humantime_serde")]
    pub analyze: Duration,
    #[serde(default = "default_execute", with = "humantime_serde")]
    pub execute: Duration,
    #[serde(default = "default_publish", with = "humantime_serde")]
    pub publish: Duration,
    #[serde(default = "default_notify", with = "humantime_serde")]
    pub notify: Duration,
}

impl Default for WatchdogBounds {
    fn default() -> Self {
        Self {
            initialize: default_initialize(),
            analyze: default_analyze(),
            execute: default_execute(),
            publish: default_publish(),
            notify: default_notify(),
        }
    }
}

impl WatchdogBounds {
    pub fn for_step(&self, step: StepId) -> Duration {
        match step {
            StepId::InitializeSandbox => self.initialize,
            StepId::AnalyzeRepository => self.analyze,
            StepId::ExecuteChanges => self.execute,
            StepId::CreatePullRequest => self.publish,
            StepId::NotifyUser => self.notify,
        }
    }

    /// Same bound for every step
    pub fn uniform(bound: Duration) -> Self {
        Self {
            initialize: bound,
            analyze: bound,
            execute: bound,
            publish: bound,
            notify: bound,
        }
    }
}

fn default_initialize() -> Duration {
    Duration::from_secs(10)
}

fn default_analyze() -> Duration {
    Duration::from_secs(15)
}

fn default_execute() -> Duration {
    Duration::from_secs(60)
}

fn default_publish() -> Duration {
    Duration::from_secs(30)
}

fn default_notify() -> Duration {
    Duration::from_secs(15)
}

/// Diagnostic emitted when a step outlives its expected bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StallSignal {
    pub run_id: String,
    pub step: StepId,
    pub bound: Duration,
}

pub struct StatusProjector {
    store: Arc<RunStatusStore>,
    bounds: WatchdogBounds,
    stalls: broadcast::Sender<StallSignal>,
}

impl StatusProjector {
    pub fn new(store: Arc<RunStatusStore>, bounds: WatchdogBounds) -> Self {
        let (stalls, _) = broadcast::channel(STALL_CHANNEL_CAPACITY);
        Self {
            store,
            bounds,
            stalls,
        }
    }

    pub fn store(&self) -> &Arc<RunStatusStore> {
        &self.store
    }

    /// Receive stall diagnostics from now on
    pub fn subscribe_stalls(&self) -> broadcast::Receiver<StallSignal> {
        self.stalls.subscribe()
    }

    /// Mark a step running. The watchdog is armed only on the first start,
    /// so retries of the same step do not stack timers.
    pub async fn step_started(&self, run_id: &str, step: StepId) {
        let was_pending = self
            .store
            .get(run_id)
            .await
            .and_then(|run| run.step(step).map(|s| s.status == StepStatus::Pending))
            .unwrap_or(false);

        let Some(run) = self
            .store
            .update_step(run_id, step, StepStatus::Running, None)
            .await
        else {
            warn!("Status update for unknown run {}", run_id);
            return;
        };

        let now_running = run
            .step(step)
            .is_some_and(|s| s.status == StepStatus::Running);
        if was_pending && now_running {
            info!(run_id, step = %step, "Step started");
            self.arm_watchdog(run_id, step);
        }
    }

    pub async fn step_completed(&self, run_id: &str, step: StepId) {
        self.store
            .update_step(run_id, step, StepStatus::Completed, None)
            .await;
        info!(run_id, step = %step, "Step completed");
    }

    /// A failed attempt that will be retried; the step stays running
    pub fn step_retrying(&self, run_id: &str, step: StepId, failure: &StepFailure, attempt: u32, delay: Duration) {
        warn!(
            run_id,
            step = %step,
            attempt,
            category = %failure.kind,
            "Attempt failed, retrying in {:?}: {}",
            delay,
            failure
        );
    }

    /// The step aborted the run; marks the step and the run failed
    pub async fn step_failed(&self, run_id: &str, step: StepId, failure: &StepFailure, attempts: u32) {
        warn!(
            run_id,
            step = %step,
            attempts,
            category = %failure.kind,
            "Step failed: {}",
            failure
        );
        let error = RunError::new(failure.message.clone(), Some(step)).with_classification(
            FailureClassification {
                category: failure.kind,
                verdict: crate::workflow::Verdict::Fatal,
                attempts,
            },
        );
        self.store.fail_run(run_id, error).await;
    }

    pub async fn run_completed(&self, run_id: &str) {
        self.store.complete_run(run_id).await;
        info!(run_id, "Run completed");
    }

    fn arm_watchdog(&self, run_id: &str, step: StepId) {
        let bound = self.bounds.for_step(step);
        let store = Arc::clone(&self.store);
        let stalls = self.stalls.clone();
        let run_id = run_id.to_string();

        tokio::spawn(async move {
            tokio::time::sleep(bound).await;
            let still_running = store
                .get(&run_id)
                .await
                .and_then(|run| run.step(step).map(|s| s.status == StepStatus::Running))
                .unwrap_or(false);
            if still_running {
                warn!(
                    run_id = %run_id,
                    step = %step,
                    "Step still running after {:?}, possibly stalled",
                    bound
                );
                // No subscribers is fine; the log line is the primary signal.
                let _ = stalls.send(StallSignal {
                    run_id,
                    step,
                    bound,
                });
            } else {
                debug!(run_id = %run_id, step = %step, "Watchdog disarmed");
            }
        });
    }
}

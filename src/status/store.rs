//! Process-wide store of run progress documents

use super::run::{Run, RunError, StepId, StepStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock as SyncRwLock};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// One run's current document. The lock doubles as the per-run write lock;
/// readers only hold it long enough to clone the `Arc`.
type RunSlot = Arc<SyncRwLock<Arc<Run>>>;

/// Keyed store of [`Run`] documents.
///
/// Every operation is idempotent and tolerant of out-of-order delivery:
/// transitions that would move a step backwards, or touch a run that already
/// reached a terminal state, leave the document unchanged. All operations
/// return `None` for an unknown run.
#[derive(Default)]
pub struct RunStatusStore {
    runs: RwLock<HashMap<String, RunSlot>>,
}

impl RunStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a run with every step pending; an existing run is returned as is
    pub async fn create_run(&self, run_id: &str, steps: &[StepId]) -> Arc<Run> {
        self.insert_if_absent(Run::new(run_id, steps, Utc::now())).await
    }

    /// Insert a prebuilt document (used when rebuilding state from checkpoints)
    pub async fn insert_if_absent(&self, run: Run) -> Arc<Run> {
        let mut runs = self.runs.write().await;
        let slot = runs
            .entry(run.run_id.clone())
            .or_insert_with(|| Arc::new(SyncRwLock::new(Arc::new(run))));
        let current = slot.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&current)
    }

    pub async fn get(&self, run_id: &str) -> Option<Arc<Run>> {
        let slot = self.runs.read().await.get(run_id).cloned()?;
        let current = slot.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Some(Arc::clone(&current))
    }

    pub async fn update_step(
        &self,
        run_id: &str,
        step: StepId,
        status: StepStatus,
        error: Option<&str>,
    ) -> Option<Arc<Run>> {
        self.mutate(run_id, |run, now| run.with_step_status(step, status, error, now))
            .await
    }

    /// Freeze the run as failed with a plain message
    pub async fn set_run_error(
        &self,
        run_id: &str,
        message: &str,
        step: Option<StepId>,
    ) -> Option<Arc<Run>> {
        self.fail_run(run_id, RunError::new(message, step)).await
    }

    /// Freeze the run as failed with full error details
    pub async fn fail_run(&self, run_id: &str, error: RunError) -> Option<Arc<Run>> {
        self.mutate(run_id, move |run, now| run.with_error(error, now))
            .await
    }

    /// Mark the run completed; see [`Run::with_completion`] for the backfill rule
    pub async fn complete_run(&self, run_id: &str) -> Option<Arc<Run>> {
        self.mutate(run_id, |run, now| run.with_completion(now)).await
    }

    /// Snapshot of every run, newest first
    pub async fn list(&self) -> Vec<Arc<Run>> {
        let runs = self.runs.read().await;
        let mut snapshot: Vec<Arc<Run>> = runs
            .values()
            .map(|slot| Arc::clone(&slot.read().unwrap_or_else(|p| p.into_inner())))
            .collect();
        snapshot.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshot
    }

    /// Drop terminal runs that finished more than `ttl` ago; running runs are kept
    pub async fn purge_expired(&self, ttl: Duration) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };
        let cutoff = Utc::now() - ttl;
        let mut runs = self.runs.write().await;
        let before = runs.len();
        runs.retain(|_, slot| {
            let run = slot.read().unwrap_or_else(|p| p.into_inner());
            !is_expired(&run, cutoff)
        });
        let purged = before - runs.len();
        if purged > 0 {
            debug!("Purged {} expired runs", purged);
        }
        purged
    }

    async fn mutate<F>(&self, run_id: &str, apply: F) -> Option<Arc<Run>>
    where
        F: FnOnce(&Run, DateTime<Utc>) -> Option<Run>,
    {
        let slot = self.runs.read().await.get(run_id).cloned()?;
        let mut current = slot.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(next) = apply(&current, Utc::now()) {
            *current = Arc::new(next);
        }
        Some(Arc::clone(&current))
    }
}

fn is_expired(run: &Run, cutoff: DateTime<Utc>) -> bool {
    run.status.is_terminal() && run.completed_at.unwrap_or(run.updated_at) < cutoff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::run::RunStatus;

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let store = RunStatusStore::new();
        let first = store.create_run("r1", &StepId::pipeline(false)).await;
        store
            .update_step("r1", StepId::InitializeSandbox, StepStatus::Running, None)
            .await;
        let second = store.create_run("r1", &StepId::pipeline(true)).await;

        assert_eq!(second.steps.len(), 4);
        assert_eq!(second.steps[0].status, StepStatus::Running);
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn test_unknown_run_is_none() {
        let store = RunStatusStore::new();
        assert!(store.get("nope").await.is_none());
        assert!(store
            .update_step("nope", StepId::InitializeSandbox, StepStatus::Running, None)
            .await
            .is_none());
        assert!(store.complete_run("nope").await.is_none());
        assert!(store.set_run_error("nope", "x", None).await.is_none());
    }

    #[tokio::test]
    async fn test_repeated_update_does_not_touch_document() {
        let store = RunStatusStore::new();
        store.create_run("r1", &StepId::pipeline(false)).await;
        let once = store
            .update_step("r1", StepId::InitializeSandbox, StepStatus::Running, None)
            .await
            .unwrap();
        let twice = store
            .update_step("r1", StepId::InitializeSandbox, StepStatus::Running, None)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&once, &twice));
    }

    #[tokio::test]
    async fn test_purge_keeps_running_runs() {
        let store = RunStatusStore::new();
        store.create_run("running", &StepId::pipeline(false)).await;
        store.create_run("done", &StepId::pipeline(false)).await;
        store.complete_run("done").await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let purged = store.purge_expired(Duration::from_millis(1)).await;

        assert_eq!(purged, 1);
        assert!(store.get("done").await.is_none());
        assert_eq!(
            store.get("running").await.unwrap().status,
            RunStatus::Running
        );
    }
}

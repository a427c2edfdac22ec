//! Durable step orchestration
//!
//! A run is a fixed linear pipeline of steps. Only plain serializable values
//! cross step boundaries and land in checkpoints; live sessions are opened
//! inside each step and dropped with it.

pub mod checkpoint;
pub mod classifier;
pub mod descriptor;
pub mod engine;
pub mod retry;
pub mod steps;

pub use checkpoint::{
    CheckpointStatus, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore,
    RunCheckpoint, CHECKPOINT_VERSION,
};
pub use classifier::{classify, FailureKind, StepFailure, Verdict};
pub use descriptor::RunDescriptor;
pub use engine::{RunOutcome, WorkflowEngine};
pub use retry::{AbortReason, RetryDecision, RetryPolicy};
pub use steps::{Pipeline, StepInput, StepOutput, StepRunner};

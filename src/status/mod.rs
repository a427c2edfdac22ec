//! Run status tracking for polling clients

pub mod projector;
pub mod run;
pub mod store;

pub use projector::{StallSignal, StatusProjector, WatchdogBounds};
pub use run::{
    FailureClassification, Run, RunError, RunStatus, StepId, StepRecord, StepStatus,
};
pub use store::RunStatusStore;

//! Multi-stage batch pipeline engine.
//!
//! Moves work items through an ordered list of stages. Each stage is bound to
//! a fixed-size worker pool; consecutive stages are joined by a bounded
//! admission channel whose blocking put is the only backpressure mechanism:
//!
//! ```text
//! [items] → intake → Stage 1 (W₁ threads) → channel (Q) → Stage 2 (W₂ threads) → … → results
//! ```
//!
//! Cancellation is cooperative: stages receive a [`CancellationToken`] and
//! poll it between sub-steps (see [`ItemSteps`]). A panic inside a stage is
//! caught at the item boundary and recorded as `Failed`; the batch continues.

pub mod cancel;
pub mod channel;
pub mod orchestrator;
pub mod pool;
pub mod state;
pub mod steps;
pub mod types;

pub use cancel::CancellationToken;
pub use channel::{AdmissionChannel, ChannelClosed};
pub use orchestrator::{PipelineOrchestrator, RunHandle};
pub use state::{RunStats, SharedRunState, StageStats};
pub use steps::{ItemSteps, StepFault};
pub use types::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Pipeline requires at least one stage")]
    NoStages,

    #[error("Stage '{stage}' must have at least one worker")]
    ZeroWorkers { stage: String },

    #[error("Admission channel capacity must be at least 1")]
    ZeroCapacity,

    #[error("A run is already in progress")]
    AlreadyRunning,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Pipeline run thread panicked")]
    RunPanicked,
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::cancel::CancellationToken;

// ═══════════════════════════════════════════════════════════
// Work items
// ═══════════════════════════════════════════════════════════

/// One document or image scheduled through a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    /// Identity derived from the source filename.
    pub id: String,
    /// Backing resource. Left untouched on stop, relocated on terminal success/failure.
    pub source: PathBuf,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// An item travelling between stages together with the payload the previous
/// stage produced. Ownership moves with the envelope; nothing is shared.
#[derive(Debug)]
pub struct Envelope<P> {
    pub item: WorkItem,
    pub payload: Option<P>,
}

// ═══════════════════════════════════════════════════════════
// Stage results
// ═══════════════════════════════════════════════════════════

/// Terminal-or-continuable status of one stage invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Failed,
    Stopped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a single stage invocation.
#[derive(Debug)]
pub struct StageResult<P> {
    pub status: StageStatus,
    pub payload: Option<P>,
    pub error: Option<String>,
}

impl<P> StageResult<P> {
    pub fn success(payload: P) -> Self {
        Self {
            status: StageStatus::Success,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Failed,
            payload: None,
            error: Some(error.into()),
        }
    }

    pub fn stopped(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Stopped,
            payload: None,
            error: Some(reason.into()),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Stage contract
// ═══════════════════════════════════════════════════════════

/// A unit of work bound to one worker pool.
///
/// `input` is `None` for the first stage and the previous stage's payload
/// otherwise. Implementations poll `token` between their own sub-steps;
/// the engine never interrupts a running invocation.
pub trait Stage<P>: Send + Sync {
    fn process(
        &self,
        item: &WorkItem,
        input: Option<P>,
        token: &CancellationToken,
    ) -> StageResult<P>;
}

/// Relocates an item's backing resource once it reaches a terminal status.
///
/// Called exactly once per item, after the stage that produced the terminal
/// result and before the run counters are updated.
pub trait ItemDisposer: Send + Sync {
    fn dispose(&self, item: &WorkItem, status: StageStatus, error: Option<&str>);
}

/// Disposer that never touches the backing resource.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeaveInPlace;

impl ItemDisposer for LeaveInPlace {
    fn dispose(&self, _item: &WorkItem, _status: StageStatus, _error: Option<&str>) {}
}

/// One entry in the ordered stage list handed to the orchestrator.
pub struct StageSpec<P> {
    pub name: String,
    pub workers: usize,
    pub stage: Arc<dyn Stage<P>>,
}

impl<P> StageSpec<P> {
    pub fn new(name: impl Into<String>, workers: usize, stage: Arc<dyn Stage<P>>) -> Self {
        Self {
            name: name.into(),
            workers,
            stage,
        }
    }
}

impl<P> std::fmt::Debug for StageSpec<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSpec")
            .field("name", &self.name)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

/// Run-wide tuning shared by all stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineConfig {
    /// Capacity of every admission channel between consecutive stages.
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { queue_capacity: 2 }
    }
}

// ═══════════════════════════════════════════════════════════
// Run results
// ═══════════════════════════════════════════════════════════

/// Terminal record for one item.
#[derive(Debug, Serialize)]
pub struct ItemResult<P> {
    pub item: WorkItem,
    /// Name of the stage that produced the terminal status.
    pub stage: String,
    pub status: StageStatus,
    pub payload: Option<P>,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

/// Returned by a completed run. `results` is in completion order.
#[derive(Debug, Serialize)]
pub struct RunSummary<P> {
    pub run_id: Uuid,
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub stopped: usize,
    pub duration_ms: u64,
    pub results: Vec<ItemResult<P>>,
}

impl<P> RunSummary<P> {
    /// Results with the given terminal status.
    pub fn with_status(&self, status: StageStatus) -> impl Iterator<Item = &ItemResult<P>> {
        self.results.iter().filter(move |r| r.status == status)
    }
}

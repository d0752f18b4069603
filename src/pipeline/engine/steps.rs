//! Single-item state machine used inside domain stages.
//!
//! A stage runs an ordered list of sub-steps. Before each one, [`ItemSteps`]
//! re-checks the cancellation token:
//! - token set → abort with `Stopped` and a human-readable reason
//! - sub-step error → abort with `Failed`
//! - every step done → `Success`
//!
//! The engine's [`ItemDisposer`](super::ItemDisposer) decides what happens to
//! the backing resource afterwards.

use std::fmt::Display;
use std::marker::PhantomData;

use super::cancel::CancellationToken;
use super::types::{StageResult, WorkItem};

/// Why a step sequence ended early.
#[derive(Debug)]
pub enum StepFault<E> {
    Stopped(String),
    Failed(E),
}

impl<E> From<E> for StepFault<E> {
    fn from(err: E) -> Self {
        Self::Failed(err)
    }
}

/// Checkpointed step runner for one item inside one stage.
pub struct ItemSteps<'a, E> {
    stage: &'a str,
    item: &'a WorkItem,
    token: &'a CancellationToken,
    _err: PhantomData<fn() -> E>,
}

impl<'a, E: Display> ItemSteps<'a, E> {
    pub fn new(stage: &'a str, item: &'a WorkItem, token: &'a CancellationToken) -> Self {
        Self {
            stage,
            item,
            token,
            _err: PhantomData,
        }
    }

    pub fn item(&self) -> &WorkItem {
        self.item
    }

    /// Abort with `Stopped` if a stop was requested.
    pub fn checkpoint(&self, next_step: &str) -> Result<(), StepFault<E>> {
        if self.token.is_cancelled() {
            return Err(StepFault::Stopped(format!("Stopped before {next_step}")));
        }
        tracing::debug!(
            document_id = %self.item.id,
            stage = self.stage,
            step = next_step,
            "Running step"
        );
        Ok(())
    }

    /// Checkpoint, then run `f`. Errors from `f` become `Failed`.
    pub fn step<T>(
        &self,
        name: &str,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, StepFault<E>> {
        self.checkpoint(name)?;
        f().map_err(StepFault::Failed)
    }

    /// Map the sequence outcome to a stage result, logging the terminal reason.
    pub fn finish<P>(&self, outcome: Result<P, StepFault<E>>) -> StageResult<P> {
        match outcome {
            Ok(payload) => StageResult::success(payload),
            Err(StepFault::Stopped(reason)) => {
                tracing::info!(
                    document_id = %self.item.id,
                    stage = self.stage,
                    "{reason}"
                );
                StageResult::stopped(reason)
            }
            Err(StepFault::Failed(err)) => {
                tracing::warn!(
                    document_id = %self.item.id,
                    stage = self.stage,
                    error = %err,
                    "Stage failed"
                );
                StageResult::failed(err.to_string())
            }
        }
    }
}

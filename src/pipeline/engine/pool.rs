//! Stage worker loop.
//!
//! Every thread in a stage pool runs [`Worker::run`]: take the next item,
//! invoke the stage, then either hand the item to the next admission channel
//! or record it as terminal. A worker blocked on a full channel holds its
//! item and takes nothing new until the put completes.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use chrono::Utc;
use crossbeam::channel::{Receiver, Sender};

use super::cancel::CancellationToken;
use super::channel::{AdmissionChannel, ChannelClosed};
use super::state::SharedRunState;
use super::types::{Envelope, ItemDisposer, ItemResult, Stage, StageResult, StageStatus, WorkItem};

pub(crate) const STOPPED_BEFORE_FIRST_STAGE: &str = "Stopped before Stage 1";

/// Where a pool takes its items from.
pub(crate) enum Intake<'a, P> {
    /// Stage 1: the unbounded list of pending items.
    Pending(&'a Receiver<WorkItem>),
    /// Later stages: the admission channel filled by the previous stage.
    Channel {
        channel: &'a AdmissionChannel<Envelope<P>>,
        index: usize,
    },
}

impl<P> Clone for Intake<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for Intake<'_, P> {}

/// Records terminal items: dispose, count, publish. In that order.
pub(crate) struct TerminalSink<'a, P> {
    pub state: &'a SharedRunState,
    pub disposer: &'a dyn ItemDisposer,
    pub results: &'a Sender<ItemResult<P>>,
}

impl<P> Clone for TerminalSink<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for TerminalSink<'_, P> {}

impl<P> TerminalSink<'_, P> {
    pub fn record(&self, stage: &str, item: WorkItem, result: StageResult<P>) {
        let disposed = panic::catch_unwind(AssertUnwindSafe(|| {
            self.disposer
                .dispose(&item, result.status, result.error.as_deref())
        }));
        if let Err(panic) = disposed {
            tracing::error!(
                document_id = %item.id,
                stage,
                panic = %panic_message(panic.as_ref()),
                "Disposer panicked; source left in place"
            );
        }

        self.state.record_terminal(result.status);

        let entry = ItemResult {
            item,
            stage: stage.to_string(),
            status: result.status,
            payload: result.payload,
            error: result.error,
            finished_at: Utc::now(),
        };
        if self.results.send(entry).is_err() {
            tracing::warn!(stage, "Result collector gone; dropping item result");
        }
    }
}

/// One thread's view of its pool.
pub(crate) struct Worker<'a, P> {
    pub stage_index: usize,
    pub stage_name: &'a str,
    pub stage: &'a dyn Stage<P>,
    pub intake: Intake<'a, P>,
    pub next: Option<&'a AdmissionChannel<Envelope<P>>>,
    pub token: &'a CancellationToken,
    pub state: &'a SharedRunState,
    pub sink: TerminalSink<'a, P>,
}

impl<P> Clone for Worker<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for Worker<'_, P> {}

impl<P> Worker<'_, P> {
    pub fn run(&self) {
        while let Some(envelope) = self.take() {
            let Envelope { item, payload } = envelope;

            if matches!(self.intake, Intake::Pending(_)) && self.token.is_cancelled() {
                self.sink.record(
                    self.stage_name,
                    item,
                    StageResult::stopped(STOPPED_BEFORE_FIRST_STAGE),
                );
                continue;
            }

            let result = self.invoke(&item, payload);
            match (result.status, self.next) {
                (StageStatus::Success, Some(next)) => self.forward(next, item, result.payload),
                _ => self.sink.record(self.stage_name, item, result),
            }
        }
        tracing::debug!(stage = self.stage_name, "Worker exiting, intake drained");
    }

    fn take(&self) -> Option<Envelope<P>> {
        match self.intake {
            Intake::Pending(rx) => rx.recv().ok().map(|item| Envelope {
                item,
                payload: None,
            }),
            Intake::Channel { channel, index } => channel.recv(|| self.state.taken(index)),
        }
    }

    fn invoke(&self, item: &WorkItem, input: Option<P>) -> StageResult<P> {
        self.state.stage_started(self.stage_index, &item.id);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.stage.process(item, input, self.token)
        }));
        self.state.stage_finished(self.stage_index, &item.id);

        outcome.unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            tracing::error!(
                document_id = %item.id,
                stage = self.stage_name,
                panic = %message,
                "Unexpected error in stage"
            );
            StageResult::failed(format!("Unexpected error: {message}"))
        })
    }

    /// Blocking put into the next stage's channel.
    fn forward(&self, next: &AdmissionChannel<Envelope<P>>, item: WorkItem, payload: Option<P>) {
        let index = self.stage_index;
        let envelope = Envelope { item, payload };
        if let Err(ChannelClosed(rejected)) = next.send(envelope, || self.state.admitted(index)) {
            tracing::warn!(
                document_id = %rejected.item.id,
                stage = self.stage_name,
                "Next stage unavailable; item not admitted"
            );
            self.sink.record(
                self.stage_name,
                rejected.item,
                StageResult::failed("Next stage unavailable"),
            );
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_handles_both_payload_kinds() {
        let literal = panic::catch_unwind(|| panic!("literal")).unwrap_err();
        assert_eq!(panic_message(literal.as_ref()), "literal");

        let formatted = panic::catch_unwind(|| panic!("item {}", 7)).unwrap_err();
        assert_eq!(panic_message(formatted.as_ref()), "item 7");

        let other = panic::catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}

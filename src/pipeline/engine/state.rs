//! Run-wide counters shared by every worker thread.
//!
//! All mutation goes through one `Mutex`, held only for the duration of the
//! update. Readers receive a cloned [`RunStats`], so a snapshot never mixes
//! two half-applied updates.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use super::cancel::CancellationToken;
use super::types::StageStatus;

/// Per-stage view inside a [`RunStats`] snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageStats {
    pub name: String,
    /// Configured pool size.
    pub workers: usize,
    /// Invocations currently executing the stage function.
    pub active: usize,
}

/// Point-in-time copy of the run state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct RunStats {
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub stopped: usize,
    pub stages: Vec<StageStats>,
    /// Occupancy of each admission channel; `queued[i]` sits between stage `i` and `i + 1`.
    pub queued: Vec<usize>,
    pub current_item: Option<String>,
    pub running: bool,
    pub stop_requested: bool,
}

impl RunStats {
    /// Items that have not reached a terminal status yet.
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.processed)
    }

    pub fn active_total(&self) -> usize {
        self.stages.iter().map(|s| s.active).sum()
    }
}

/// Cloneable handle to the single run-state mutex.
#[derive(Debug, Clone, Default)]
pub struct SharedRunState {
    inner: Arc<Mutex<RunStats>>,
}

impl SharedRunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset counters and clear `token` for a new run. Fails if a run is
    /// already marked running.
    ///
    /// The token is cleared under the state lock, so a stop requested once
    /// the run is visible as running always sticks.
    pub(crate) fn begin(
        &self,
        total: usize,
        stages: &[(String, usize)],
        token: &CancellationToken,
    ) -> bool {
        let mut s = self.lock();
        if s.running {
            return false;
        }
        token.reset();
        *s = RunStats {
            total,
            stages: stages
                .iter()
                .map(|(name, workers)| StageStats {
                    name: name.clone(),
                    workers: *workers,
                    active: 0,
                })
                .collect(),
            queued: vec![0; stages.len().saturating_sub(1)],
            running: true,
            ..RunStats::default()
        };
        true
    }

    pub(crate) fn finish(&self) {
        let mut s = self.lock();
        s.running = false;
        s.current_item = None;
    }

    pub(crate) fn request_stop(&self, token: &CancellationToken) {
        let mut s = self.lock();
        token.cancel();
        s.stop_requested = true;
    }

    pub(crate) fn stage_started(&self, stage: usize, item_id: &str) {
        let mut s = self.lock();
        if let Some(st) = s.stages.get_mut(stage) {
            st.active += 1;
        }
        s.current_item = Some(item_id.to_string());
    }

    pub(crate) fn stage_finished(&self, stage: usize, item_id: &str) {
        let mut s = self.lock();
        if let Some(st) = s.stages.get_mut(stage) {
            st.active = st.active.saturating_sub(1);
        }
        if s.current_item.as_deref() == Some(item_id) {
            s.current_item = None;
        }
    }

    pub(crate) fn admitted(&self, channel: usize) {
        if let Some(q) = self.lock().queued.get_mut(channel) {
            *q += 1;
        }
    }

    pub(crate) fn taken(&self, channel: usize) {
        if let Some(q) = self.lock().queued.get_mut(channel) {
            *q = q.saturating_sub(1);
        }
    }

    pub(crate) fn record_terminal(&self, status: StageStatus) {
        let mut s = self.lock();
        s.processed += 1;
        match status {
            StageStatus::Success => s.successful += 1,
            StageStatus::Failed => s.failed += 1,
            StageStatus::Stopped => s.stopped += 1,
        }
    }

    pub fn snapshot(&self) -> RunStats {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, RunStats> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

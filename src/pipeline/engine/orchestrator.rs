//! Composes stage pools and admission channels into one run.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use uuid::Uuid;

use super::cancel::CancellationToken;
use super::channel::AdmissionChannel;
use super::pool::{Intake, TerminalSink, Worker, STOPPED_BEFORE_FIRST_STAGE};
use super::state::{RunStats, SharedRunState};
use super::types::{
    Envelope, ItemDisposer, LeaveInPlace, PipelineConfig, RunSummary, StageResult, StageSpec,
    WorkItem,
};
use super::PipelineError;

/// Multi-stage pipeline over a fixed stage list.
///
/// One orchestrator runs one batch at a time. `stats` and `request_stop` may
/// be called from any thread while a run is in progress.
pub struct PipelineOrchestrator<P> {
    stages: Vec<StageSpec<P>>,
    config: PipelineConfig,
    token: CancellationToken,
    state: SharedRunState,
    disposer: Arc<dyn ItemDisposer>,
}

impl<P: Send + 'static> PipelineOrchestrator<P> {
    pub fn new(stages: Vec<StageSpec<P>>, config: PipelineConfig) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::NoStages);
        }
        if let Some(spec) = stages.iter().find(|s| s.workers == 0) {
            return Err(PipelineError::ZeroWorkers {
                stage: spec.name.clone(),
            });
        }
        if config.queue_capacity == 0 && stages.len() > 1 {
            return Err(PipelineError::ZeroCapacity);
        }

        Ok(Self {
            stages,
            config,
            token: CancellationToken::new(),
            state: SharedRunState::new(),
            disposer: Arc::new(LeaveInPlace),
        })
    }

    /// Route terminal items through `disposer` instead of leaving them in place.
    pub fn with_disposer(mut self, disposer: Arc<dyn ItemDisposer>) -> Self {
        self.disposer = disposer;
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Ask the current run to stop at the next checkpoint of every item.
    pub fn request_stop(&self) {
        self.state.request_stop(&self.token);
        tracing::info!("Pipeline stop requested");
    }

    pub fn stats(&self) -> RunStats {
        self.state.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.state.snapshot().running
    }

    /// Process `items` on the calling thread, returning once every item is terminal.
    pub fn run(&self, items: Vec<WorkItem>) -> Result<RunSummary<P>, PipelineError> {
        self.reserve(items.len())?;
        self.execute(items)
    }

    /// Reserve the orchestrator and run `items` on a background thread.
    pub fn start(self: &Arc<Self>, items: Vec<WorkItem>) -> Result<RunHandle<P>, PipelineError> {
        self.reserve(items.len())?;

        let this = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("pipeline-run".into())
            .spawn(move || this.execute(items));

        match spawned {
            Ok(join) => Ok(RunHandle { join }),
            Err(err) => {
                self.state.finish();
                Err(PipelineError::Spawn(err))
            }
        }
    }

    fn reserve(&self, total: usize) -> Result<(), PipelineError> {
        let layout: Vec<(String, usize)> = self
            .stages
            .iter()
            .map(|s| (s.name.clone(), s.workers))
            .collect();
        if !self.state.begin(total, &layout, &self.token) {
            return Err(PipelineError::AlreadyRunning);
        }
        Ok(())
    }

    fn execute(&self, items: Vec<WorkItem>) -> Result<RunSummary<P>, PipelineError> {
        let _finish = FinishOnDrop(&self.state);
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let total = items.len();

        tracing::info!(
            %run_id,
            total,
            stages = ?self.stage_names(),
            queue_capacity = self.config.queue_capacity,
            "Pipeline run started"
        );

        let (intake_tx, intake_rx) = crossbeam::channel::unbounded::<WorkItem>();
        for item in items {
            // Receiver is alive for the whole run.
            let _ = intake_tx.send(item);
        }
        drop(intake_tx);

        let channels: Vec<AdmissionChannel<Envelope<P>>> = (1..self.stages.len())
            .map(|_| AdmissionChannel::new(self.config.queue_capacity))
            .collect();
        let (results_tx, results_rx) = crossbeam::channel::unbounded();
        let sink = TerminalSink {
            state: &self.state,
            disposer: self.disposer.as_ref(),
            results: &results_tx,
        };

        let spawned = thread::scope(|scope| -> std::io::Result<()> {
            for (index, spec) in self.stages.iter().enumerate() {
                let intake = match index {
                    0 => Intake::Pending(&intake_rx),
                    _ => Intake::Channel {
                        channel: &channels[index - 1],
                        index: index - 1,
                    },
                };
                let worker = Worker {
                    stage_index: index,
                    stage_name: spec.name.as_str(),
                    stage: spec.stage.as_ref(),
                    intake,
                    next: channels.get(index),
                    token: &self.token,
                    state: &self.state,
                    sink,
                };

                for n in 0..spec.workers {
                    let producer = worker.next.map(AdmissionChannel::add_producer);
                    let handle = thread::Builder::new()
                        .name(format!("{}-{}", spec.name, n))
                        .spawn_scoped(scope, move || {
                            let _producer = producer;
                            worker.run();
                        });

                    if let Err(err) = handle {
                        tracing::error!(
                            stage = %spec.name,
                            worker = n,
                            error = %err,
                            "Failed to spawn stage worker; cancelling run"
                        );
                        self.token.cancel();
                        channels.iter().for_each(AdmissionChannel::close);
                        return Err(err);
                    }
                }
            }
            Ok(())
        });

        // Only non-empty when a pool failed to come up.
        for (index, channel) in channels.iter().enumerate() {
            for envelope in channel.drain(|| self.state.taken(index)) {
                sink.record(
                    &self.stages[index + 1].name,
                    envelope.item,
                    StageResult::failed("Stage pool unavailable"),
                );
            }
        }
        for item in intake_rx.try_iter() {
            sink.record(
                &self.stages[0].name,
                item,
                StageResult::stopped(STOPPED_BEFORE_FIRST_STAGE),
            );
        }

        let results: Vec<_> = results_rx.try_iter().collect();
        let stats = self.state.snapshot();
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        tracing::info!(
            %run_id,
            total,
            successful = stats.successful,
            failed = stats.failed,
            stopped = stats.stopped,
            duration_ms,
            "Pipeline run finished"
        );

        spawned?;

        Ok(RunSummary {
            run_id,
            total,
            processed: stats.processed,
            successful: stats.successful,
            failed: stats.failed,
            stopped: stats.stopped,
            duration_ms,
            results,
        })
    }
}

impl<P> std::fmt::Debug for PipelineOrchestrator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("stages", &self.stages)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Clears the running flag even if the run unwinds.
struct FinishOnDrop<'a>(&'a SharedRunState);

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Background run started with [`PipelineOrchestrator::start`].
pub struct RunHandle<P> {
    join: JoinHandle<Result<RunSummary<P>, PipelineError>>,
}

impl<P> RunHandle<P> {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Block until the run completes.
    pub fn wait(self) -> Result<RunSummary<P>, PipelineError> {
        self.join.join().map_err(|_| PipelineError::RunPanicked)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::engine::steps::{ItemSteps, StepFault};
    use crate::pipeline::engine::types::{Stage, StageStatus};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Condvar, Mutex};
    use std::time::Duration;

    // ── Test helpers ─────────────────────────────────────────

    struct FnStage<F>(F);

    impl<F> Stage<u32> for FnStage<F>
    where
        F: Fn(&WorkItem, Option<u32>, &CancellationToken) -> StageResult<u32> + Send + Sync,
    {
        fn process(
            &self,
            item: &WorkItem,
            input: Option<u32>,
            token: &CancellationToken,
        ) -> StageResult<u32> {
            (self.0)(item, input, token)
        }
    }

    fn stage<F>(name: &str, workers: usize, f: F) -> StageSpec<u32>
    where
        F: Fn(&WorkItem, Option<u32>, &CancellationToken) -> StageResult<u32>
            + Send
            + Sync
            + 'static,
    {
        StageSpec::new(name, workers, Arc::new(FnStage(f)))
    }

    fn items(n: u32) -> Vec<WorkItem> {
        (0..n)
            .map(|i| WorkItem::new(i.to_string(), format!("/tmp/{i}.pdf")))
            .collect()
    }

    fn index_of(item: &WorkItem) -> u32 {
        item.id.parse().unwrap()
    }

    #[derive(Default)]
    struct Gate {
        open: Mutex<bool>,
        cv: Condvar,
    }

    impl Gate {
        fn wait(&self) {
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.cv.wait(open).unwrap();
            }
        }

        fn open(&self) {
            *self.open.lock().unwrap() = true;
            self.cv.notify_all();
        }
    }

    fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[derive(Default)]
    struct RecordingDisposer {
        seen: Mutex<HashMap<String, Vec<StageStatus>>>,
    }

    impl ItemDisposer for RecordingDisposer {
        fn dispose(&self, item: &WorkItem, status: StageStatus, _error: Option<&str>) {
            self.seen
                .lock()
                .unwrap()
                .entry(item.id.clone())
                .or_default()
                .push(status);
        }
    }

    fn assert_drained<P>(summary: &RunSummary<P>) {
        assert_eq!(summary.processed, summary.total);
        assert_eq!(
            summary.successful + summary.failed + summary.stopped,
            summary.total
        );
        assert_eq!(summary.results.len(), summary.total);
    }

    // ── Configuration ────────────────────────────────────────

    #[test]
    fn rejects_invalid_configuration() {
        let err = PipelineOrchestrator::<u32>::new(vec![], PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::NoStages));

        let err = PipelineOrchestrator::new(
            vec![stage("ocr", 0, |_, _, _| StageResult::success(0))],
            PipelineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::ZeroWorkers { ref stage } if stage == "ocr"));

        let err = PipelineOrchestrator::new(
            vec![
                stage("a", 1, |_, _, _| StageResult::success(0)),
                stage("b", 1, |_, _, _| StageResult::success(0)),
            ],
            PipelineConfig { queue_capacity: 0 },
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::ZeroCapacity));
    }

    // ── Flow ─────────────────────────────────────────────────

    #[test]
    fn empty_batch_completes_immediately() {
        let orch = PipelineOrchestrator::new(
            vec![stage("only", 2, |_, _, _| StageResult::success(1))],
            PipelineConfig::default(),
        )
        .unwrap();
        let summary = orch.run(vec![]).unwrap();
        assert_eq!(summary.total, 0);
        assert!(summary.results.is_empty());
        assert!(!orch.is_running());
    }

    #[test]
    fn single_stage_mode_processes_everything() {
        let orch = PipelineOrchestrator::new(
            vec![stage("full", 2, |item, input, _| {
                assert!(input.is_none());
                StageResult::success(index_of(item) * 10)
            })],
            PipelineConfig::default(),
        )
        .unwrap();

        let summary = orch.run(items(5)).unwrap();
        assert_drained(&summary);
        assert_eq!(summary.successful, 5);
        assert!(orch.stats().queued.is_empty());

        let mut payloads: Vec<u32> = summary.results.iter().filter_map(|r| r.payload).collect();
        payloads.sort_unstable();
        assert_eq!(payloads, vec![0, 10, 20, 30, 40]);
    }

    #[test]
    fn payload_is_handed_to_next_stage() {
        let orch = PipelineOrchestrator::new(
            vec![
                stage("double", 2, |item, _, _| StageResult::success(index_of(item) * 2)),
                stage("inc", 2, |_, input, _| match input {
                    Some(v) => StageResult::success(v + 1),
                    None => StageResult::failed("missing payload"),
                }),
            ],
            PipelineConfig::default(),
        )
        .unwrap();

        let summary = orch.run(items(6)).unwrap();
        assert_drained(&summary);
        for r in &summary.results {
            assert_eq!(r.stage, "inc");
            assert_eq!(r.payload, Some(index_of(&r.item) * 2 + 1));
        }
    }

    #[test]
    fn backpressure_bounds_items_in_flight() {
        let gate = Arc::new(Gate::default());
        let first_starts = Arc::new(AtomicUsize::new(0));

        let orch = {
            let starts = Arc::clone(&first_starts);
            let gate = Arc::clone(&gate);
            Arc::new(
                PipelineOrchestrator::new(
                    vec![
                        stage("ocr", 3, move |_, _, _| {
                            starts.fetch_add(1, Ordering::SeqCst);
                            StageResult::success(0)
                        }),
                        stage("llm", 2, move |_, input, _| {
                            gate.wait();
                            StageResult::success(input.unwrap_or_default())
                        }),
                    ],
                    PipelineConfig { queue_capacity: 2 },
                )
                .unwrap(),
            )
        };

        let handle = orch.start(items(10)).unwrap();

        // 2 held by stage 2, 2 queued, 3 held by stage-1 workers blocked on put.
        wait_until("pipeline to saturate", || {
            let s = orch.stats();
            first_starts.load(Ordering::SeqCst) == 7
                && s.queued == vec![2]
                && s.stages[1].active == 2
        });
        thread::sleep(Duration::from_millis(100));

        let snap = orch.stats();
        assert_eq!(first_starts.load(Ordering::SeqCst), 7);
        assert_eq!(snap.stages[0].active, 0, "blocked puts are not active invocations");
        assert_eq!(snap.stages[1].active, 2);
        assert_eq!(snap.queued, vec![2]);
        assert_eq!(snap.processed, 0);
        assert!(snap.running);

        gate.open();
        let summary = handle.wait().unwrap();
        assert_drained(&summary);
        assert_eq!(summary.successful, 10);
        assert_eq!(first_starts.load(Ordering::SeqCst), 10);
        assert!(!orch.stats().running);
    }

    #[test]
    fn concurrency_never_exceeds_pool_size() {
        #[derive(Default)]
        struct Meter {
            current: AtomicUsize,
            peak: AtomicUsize,
        }

        impl Meter {
            fn enter(&self) {
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
            }
            fn leave(&self) {
                self.current.fetch_sub(1, Ordering::SeqCst);
            }
        }

        let first = Arc::new(Meter::default());
        let second = Arc::new(Meter::default());
        let (m1, m2) = (Arc::clone(&first), Arc::clone(&second));

        let orch = PipelineOrchestrator::new(
            vec![
                stage("a", 3, move |_, _, _| {
                    m1.enter();
                    thread::sleep(Duration::from_millis(3));
                    m1.leave();
                    StageResult::success(0)
                }),
                stage("b", 2, move |_, _, _| {
                    m2.enter();
                    thread::sleep(Duration::from_millis(5));
                    m2.leave();
                    StageResult::success(0)
                }),
            ],
            PipelineConfig::default(),
        )
        .unwrap();

        let summary = orch.run(items(30)).unwrap();
        assert_drained(&summary);
        assert!(first.peak.load(Ordering::SeqCst) <= 3);
        assert!(second.peak.load(Ordering::SeqCst) <= 2);
    }

    // ── Failures ─────────────────────────────────────────────

    #[test]
    fn failed_items_never_reach_next_stage() {
        let seen_by_second = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&seen_by_second);

        let orch = PipelineOrchestrator::new(
            vec![
                stage("ocr", 2, |item, _, _| {
                    if index_of(item) % 2 == 1 {
                        StageResult::failed("Insufficient text extracted")
                    } else {
                        StageResult::success(0)
                    }
                }),
                stage("llm", 2, move |item, _, _| {
                    seen.lock().unwrap().push(index_of(item));
                    StageResult::success(0)
                }),
            ],
            PipelineConfig::default(),
        )
        .unwrap();

        let summary = orch.run(items(10)).unwrap();
        assert_drained(&summary);
        assert_eq!(summary.failed, 5);
        assert_eq!(summary.successful, 5);
        assert!(seen_by_second.lock().unwrap().iter().all(|i| i % 2 == 0));
        for r in summary.with_status(StageStatus::Failed) {
            assert_eq!(r.stage, "ocr");
            assert_eq!(r.error.as_deref(), Some("Insufficient text extracted"));
        }
    }

    #[test]
    fn panic_in_stage_is_isolated_to_its_item() {
        let orch = PipelineOrchestrator::new(
            vec![
                stage("ocr", 2, |_, _, _| StageResult::success(0)),
                stage("llm", 1, |item, _, _| {
                    if item.id == "3" {
                        panic!("model returned garbage");
                    }
                    StageResult::success(1)
                }),
            ],
            PipelineConfig::default(),
        )
        .unwrap();

        let summary = orch.run(items(6)).unwrap();
        assert_drained(&summary);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.successful, 5);

        let failed = summary.with_status(StageStatus::Failed).next().unwrap();
        assert_eq!(failed.item.id, "3");
        assert!(failed.error.as_deref().unwrap().contains("model returned garbage"));
        assert_eq!(orch.stats().active_total(), 0);
    }

    #[test]
    fn disposer_sees_each_item_exactly_once() {
        let disposer = Arc::new(RecordingDisposer::default());
        let orch = PipelineOrchestrator::new(
            vec![
                stage("a", 2, |item, _, _| {
                    if item.id == "0" {
                        StageResult::failed("bad")
                    } else {
                        StageResult::success(0)
                    }
                }),
                stage("b", 2, |_, _, _| StageResult::success(0)),
            ],
            PipelineConfig::default(),
        )
        .unwrap()
        .with_disposer(Arc::clone(&disposer) as Arc<dyn ItemDisposer>);

        orch.run(items(8)).unwrap();

        let seen = disposer.seen.lock().unwrap();
        assert_eq!(seen.len(), 8);
        assert!(seen.values().all(|v| v.len() == 1));
        assert_eq!(seen["0"], vec![StageStatus::Failed]);
        assert_eq!(seen["5"], vec![StageStatus::Success]);
    }

    // ── Cancellation ─────────────────────────────────────────

    #[test]
    fn stop_leaves_pending_items_undispatched() {
        let gate = Arc::new(Gate::default());
        let starts = Arc::new(AtomicUsize::new(0));

        let orch = {
            let gate = Arc::clone(&gate);
            let starts = Arc::clone(&starts);
            Arc::new(
                PipelineOrchestrator::new(
                    vec![
                        stage("ocr", 2, move |item, _, token| {
                            starts.fetch_add(1, Ordering::SeqCst);
                            let steps = ItemSteps::<String>::new("ocr", item, token);
                            let outcome = (|| -> Result<u32, StepFault<String>> {
                                steps.step("OCR", || {
                                    gate.wait();
                                    Ok(())
                                })?;
                                steps.checkpoint("handoff")?;
                                Ok(0)
                            })();
                            steps.finish(outcome)
                        }),
                        stage("llm", 1, |_, _, _| StageResult::success(0)),
                    ],
                    PipelineConfig::default(),
                )
                .unwrap(),
            )
        };

        let handle = orch.start(items(20)).unwrap();
        wait_until("both OCR workers busy", || orch.stats().stages[0].active == 2);

        orch.request_stop();
        assert!(orch.stats().stop_requested);
        gate.open();

        let summary = handle.wait().unwrap();
        assert_drained(&summary);
        assert_eq!(summary.successful, 0);
        assert_eq!(summary.stopped, 20);
        assert_eq!(starts.load(Ordering::SeqCst), 2, "no stage-1 start after stop");

        let in_flight: Vec<_> = summary
            .results
            .iter()
            .filter(|r| r.error.as_deref() == Some("Stopped before handoff"))
            .collect();
        assert_eq!(in_flight.len(), 2);
    }

    #[test]
    fn queued_items_drain_into_next_stage_after_stop() {
        let gate = Arc::new(Gate::default());
        let second_calls = Arc::new(AtomicUsize::new(0));
        let disposer = Arc::new(RecordingDisposer::default());

        let orch = {
            let gate = Arc::clone(&gate);
            let calls = Arc::clone(&second_calls);
            Arc::new(
                PipelineOrchestrator::new(
                    vec![
                        stage("ocr", 1, |_, _, _| StageResult::success(0)),
                        stage("llm", 1, move |item, _, token| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            let steps = ItemSteps::<String>::new("llm", item, token);
                            let outcome = (|| -> Result<u32, StepFault<String>> {
                                steps.step("LLM extraction", || {
                                    gate.wait();
                                    Ok(())
                                })?;
                                steps.checkpoint("database save")?;
                                Ok(1)
                            })();
                            steps.finish(outcome)
                        }),
                    ],
                    PipelineConfig { queue_capacity: 2 },
                )
                .unwrap()
                .with_disposer(Arc::clone(&disposer) as Arc<dyn ItemDisposer>),
            )
        };

        let handle = orch.start(items(10)).unwrap();
        wait_until("queue full and LLM busy", || {
            let s = orch.stats();
            s.queued == vec![2] && s.stages[1].active == 1
        });
        // Let the lone OCR worker finish its fourth item and block on the put.
        thread::sleep(Duration::from_millis(50));

        orch.request_stop();
        gate.open();

        let summary = handle.wait().unwrap();
        assert_drained(&summary);
        assert_eq!(summary.stopped, 10);
        // 1 in flight + 2 queued + 1 blocked on put.
        assert_eq!(second_calls.load(Ordering::SeqCst), 4);

        let from_llm = summary.results.iter().filter(|r| r.stage == "llm").count();
        assert_eq!(from_llm, 4);
        assert!(summary
            .results
            .iter()
            .filter(|r| r.stage == "ocr")
            .all(|r| r.error.as_deref() == Some(STOPPED_BEFORE_FIRST_STAGE)));

        let seen = disposer.seen.lock().unwrap();
        assert_eq!(seen.len(), 10);
        assert!(seen.values().all(|v| v == &vec![StageStatus::Stopped]));
    }

    #[test]
    fn second_run_rejected_while_busy_then_allowed() {
        let gate = Arc::new(Gate::default());
        let orch = {
            let gate = Arc::clone(&gate);
            Arc::new(
                PipelineOrchestrator::new(
                    vec![stage("only", 1, move |_, _, _| {
                        gate.wait();
                        StageResult::success(0)
                    })],
                    PipelineConfig::default(),
                )
                .unwrap(),
            )
        };

        let handle = orch.start(items(2)).unwrap();
        assert!(matches!(orch.run(items(1)), Err(PipelineError::AlreadyRunning)));

        gate.open();
        handle.wait().unwrap();

        let again = orch.run(items(3)).unwrap();
        assert_eq!(again.successful, 3);
    }

    #[test]
    fn stop_flag_is_cleared_for_next_run() {
        let orch = PipelineOrchestrator::new(
            vec![stage("only", 1, |_, _, _| StageResult::success(0))],
            PipelineConfig::default(),
        )
        .unwrap();

        orch.request_stop();
        let summary = orch.run(items(3)).unwrap();
        assert_eq!(summary.successful, 3);
        assert!(!orch.stats().stop_requested);
    }

    #[test]
    fn stop_right_after_reserve_is_honoured() {
        let orch = PipelineOrchestrator::new(
            vec![stage("only", 1, |_, _, _| StageResult::success(0))],
            PipelineConfig::default(),
        )
        .unwrap();

        orch.reserve(3).unwrap();
        assert!(orch.is_running());
        orch.request_stop();
        assert!(matches!(orch.reserve(3), Err(PipelineError::AlreadyRunning)));

        let summary = orch.execute(items(3)).unwrap();
        assert_drained(&summary);
        assert_eq!(summary.stopped, 3);
        assert!(summary
            .results
            .iter()
            .all(|r| r.error.as_deref() == Some(STOPPED_BEFORE_FIRST_STAGE)));
        assert!(!orch.is_running());
    }
}

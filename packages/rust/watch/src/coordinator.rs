//! Debounced rebuild loop.
//!
//! ```text
//! Idle --event--> Debouncing --timer--> Rebuilding --done--> Idle
//!                  ^  |  event resets         | events queue
//!                  +--+  the timer            v
//!                                       Debouncing (if queued)
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, instrument, warn};

use assetforge_graph::RunReport;
use assetforge_shared::{CancelToken, Result, WatchEvent, WatchEventKind};

use crate::matcher::InputMatcher;

/// Boxed future returned by a [`Rebuilder`].
pub type RebuildFuture = Pin<Box<dyn Future<Output = Result<RunReport>> + Send>>;

/// Runs an incremental build of exactly `tasks`.
pub trait Rebuilder: Send + Sync + 'static {
    fn rebuild(&self, tasks: BTreeSet<String>, cancel: CancelToken) -> RebuildFuture;
}

/// Where the coordinator currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Debouncing,
    Rebuilding,
}

/// Totals reported when the coordinator exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub events: usize,
    pub rebuilds: usize,
    pub failed_rebuilds: usize,
}

struct InFlight {
    handle: JoinHandle<Result<RunReport>>,
    cancel: CancelToken,
    tasks: usize,
}

/// Turns a stream of [`WatchEvent`]s into debounced incremental rebuilds.
pub struct WatchCoordinator {
    matcher: InputMatcher,
    rebuilder: Arc<dyn Rebuilder>,
    debounce: Duration,
    state: WatchState,
}

impl WatchCoordinator {
    pub fn new(matcher: InputMatcher, rebuilder: Arc<dyn Rebuilder>, debounce: Duration) -> Self {
        Self {
            matcher,
            rebuilder,
            debounce,
            state: WatchState::Idle,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    fn transition(&mut self, next: WatchState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "watch state");
            self.state = next;
        }
    }

    /// Process events until `shutdown` fires or the event source closes.
    ///
    /// On shutdown the debounce timer is abandoned and an in-flight rebuild is
    /// cancelled. When the source closes, pending changes are rebuilt first.
    #[instrument(skip_all, fields(debounce_ms = self.debounce.as_millis()))]
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<WatchEvent>,
        shutdown: CancelToken,
    ) -> Result<WatchSummary> {
        let mut summary = WatchSummary::default();
        let mut pending: BTreeMap<PathBuf, WatchEventKind> = BTreeMap::new();
        let mut deadline: Option<Instant> = None;
        let mut in_flight: Option<InFlight> = None;
        let mut source_open = true;

        info!("watching for changes");

        loop {
            if !source_open && in_flight.is_none() {
                if pending.is_empty() {
                    break;
                }
                // Nothing else can arrive; skip the rest of the quiet period.
                deadline = Some(Instant::now());
            }

            let debounce_armed = deadline.is_some() && in_flight.is_none();
            let timer = sleep_until(deadline.unwrap_or_else(Instant::now));

            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    if let Some(flight) = in_flight.take() {
                        info!(tasks = flight.tasks, "shutdown: cancelling in-flight rebuild");
                        flight.cancel.cancel();
                        let _ = flight.handle.await;
                    }
                    if !pending.is_empty() {
                        debug!(paths = pending.len(), "shutdown: dropping pending changes");
                    }
                    break;
                }

                result = async {
                    match in_flight.as_mut() {
                        Some(flight) => (&mut flight.handle).await,
                        None => std::future::pending().await,
                    }
                }, if in_flight.is_some() => {
                    in_flight = None;
                    summary.rebuilds += 1;
                    match result {
                        Ok(Ok(report)) if report.is_success() => {
                            info!(tasks = report.outcomes.len(), elapsed_ms = report.elapsed.as_millis(), "rebuild complete");
                        }
                        Ok(Ok(report)) => {
                            summary.failed_rebuilds += 1;
                            let failed: Vec<&str> = report.failed().map(|o| o.id.as_str()).collect();
                            warn!(?failed, "rebuild failed; still watching");
                        }
                        Ok(Err(err)) => {
                            summary.failed_rebuilds += 1;
                            warn!(error = %err, "rebuild failed; still watching");
                        }
                        Err(join_err) => {
                            summary.failed_rebuilds += 1;
                            warn!(error = %join_err, "rebuild task panicked; still watching");
                        }
                    }
                    if pending.is_empty() {
                        self.transition(WatchState::Idle);
                    } else {
                        debug!(paths = pending.len(), "changes arrived during rebuild");
                        deadline = Some(Instant::now() + self.debounce);
                        self.transition(WatchState::Debouncing);
                    }
                }

                event = events.recv(), if source_open => {
                    match event {
                        Some(event) => {
                            summary.events += 1;
                            debug!(path = %event.path.display(), kind = ?event.kind, "change");
                            pending.insert(event.path, event.kind);
                            if in_flight.is_none() {
                                deadline = Some(Instant::now() + self.debounce);
                                self.transition(WatchState::Debouncing);
                            }
                        }
                        None => {
                            debug!("event source closed");
                            source_open = false;
                        }
                    }
                }

                () = timer, if debounce_armed => {
                    deadline = None;
                    let changed = std::mem::take(&mut pending);
                    in_flight = self.start_rebuild(changed);
                    if in_flight.is_some() {
                        self.transition(WatchState::Rebuilding);
                    } else {
                        self.transition(WatchState::Idle);
                    }
                }
            }
        }

        self.transition(WatchState::Idle);
        info!(
            events = summary.events,
            rebuilds = summary.rebuilds,
            failed = summary.failed_rebuilds,
            "watch stopped"
        );
        Ok(summary)
    }

    fn start_rebuild(&self, changed: BTreeMap<PathBuf, WatchEventKind>) -> Option<InFlight> {
        let affected = self.matcher.affected(changed.keys());
        if affected.is_empty() {
            debug!(paths = changed.len(), "no task watches the changed paths");
            return None;
        }

        info!(
            paths = changed.len(),
            tasks = ?affected,
            "rebuilding"
        );
        let cancel = CancelToken::new();
        let tasks = affected.len();
        let future = self.rebuilder.rebuild(affected, cancel.clone());
        Some(InFlight {
            handle: tokio::spawn(future),
            cancel,
            tasks,
        })
    }
}

/// Adapter so plain async closures can act as a [`Rebuilder`].
impl<F, Fut> Rebuilder for F
where
    F: Fn(BTreeSet<String>, CancelToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RunReport>> + Send + 'static,
{
    fn rebuild(&self, tasks: BTreeSet<String>, cancel: CancelToken) -> RebuildFuture {
        Box::pin(self(tasks, cancel))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use assetforge_graph::{Task, TaskContext, TaskRegistry, TaskReport, WatchInputs};
    use assetforge_shared::{ForgeError, RunId};
    use tokio::time::sleep;

    async fn noop(_cx: TaskContext) -> Result<TaskReport> {
        Ok(TaskReport::default())
    }

    fn watching(glob: &str) -> WatchInputs {
        WatchInputs {
            include: vec![glob.to_string()],
            exclude: Vec::new(),
        }
    }

    fn matcher() -> InputMatcher {
        let mut registry = TaskRegistry::new();
        registry
            .insert(Task::new("scripts", noop).watching(watching("src/**/*.js")))
            .unwrap();
        registry
            .insert(Task::new("styles", noop).watching(watching("src/**/*.scss")))
            .unwrap();
        registry
            .insert(Task::new("index", noop).depends_on(["scripts", "styles"]))
            .unwrap();
        InputMatcher::new(Arc::new(registry)).unwrap()
    }

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    /// Records every rebuild; sleeps `delay` unless cancelled.
    #[derive(Default)]
    struct Recorder {
        delay: Duration,
        fail_first: bool,
        calls: Mutex<Vec<(Instant, BTreeSet<String>)>>,
        finished: Mutex<Vec<Instant>>,
        attempts: AtomicUsize,
        cancelled: AtomicBool,
    }

    impl Recorder {
        fn with_delay(delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                delay: Duration::from_millis(delay_ms),
                ..Self::default()
            })
        }

        fn calls(&self) -> Vec<(Instant, BTreeSet<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    struct Shared(Arc<Recorder>);

    impl Rebuilder for Shared {
        fn rebuild(&self, tasks: BTreeSet<String>, cancel: CancelToken) -> RebuildFuture {
            let rec = Arc::clone(&self.0);
            Box::pin(async move {
                rec.calls.lock().unwrap().push((Instant::now(), tasks));
                let attempt = rec.attempts.fetch_add(1, Ordering::SeqCst);
                tokio::select! {
                    () = sleep(rec.delay) => {}
                    () = cancel.cancelled() => {
                        rec.cancelled.store(true, Ordering::SeqCst);
                        return Err(ForgeError::Cancelled);
                    }
                }
                rec.finished.lock().unwrap().push(Instant::now());
                if rec.fail_first && attempt == 0 {
                    return Err(ForgeError::transform("lint-js", "a.js:1: unmatched `)`"));
                }
                Ok(RunReport {
                    run_id: RunId::new(),
                    target: None,
                    outcomes: Vec::new(),
                    elapsed: rec.delay,
                })
            })
        }
    }

    fn start(
        rec: &Arc<Recorder>,
    ) -> (
        mpsc::Sender<WatchEvent>,
        CancelToken,
        JoinHandle<Result<WatchSummary>>,
    ) {
        let (tx, rx) = mpsc::channel(64);
        let shutdown = CancelToken::new();
        let coordinator = WatchCoordinator::new(
            matcher(),
            Arc::new(Shared(Arc::clone(rec))),
            Duration::from_millis(200),
        );
        let handle = tokio::spawn(coordinator.run(rx, shutdown.clone()));
        (tx, shutdown, handle)
    }

    fn change(path: &str) -> WatchEvent {
        WatchEvent::new(path, WatchEventKind::Change)
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_are_coalesced_into_one_rebuild() {
        let rec = Recorder::with_delay(10);
        let (tx, _shutdown, handle) = start(&rec);

        let t0 = Instant::now();
        tx.send(change("src/app.js")).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        tx.send(change("src/util/a.js")).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        tx.send(change("src/app.js")).await.unwrap();
        sleep(Duration::from_millis(1000)).await;

        let calls = rec.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0 - t0 >= Duration::from_millis(300));
        assert_eq!(calls[0].1, set(&["scripts", "index"]));

        drop(tx);
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.events, 3);
        assert_eq!(summary.rebuilds, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn events_during_rebuild_start_a_new_cycle_afterwards() {
        let rec = Recorder::with_delay(500);
        let (tx, _shutdown, handle) = start(&rec);

        tx.send(change("src/app.js")).await.unwrap();
        sleep(Duration::from_millis(300)).await;
        tx.send(change("src/assets/site.scss")).await.unwrap();
        sleep(Duration::from_millis(2000)).await;

        let calls = rec.calls();
        let finished = rec.finished.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(finished.len(), 2);
        // The first rebuild ran to completion before the second started.
        assert!(calls[1].0 >= finished[0] + Duration::from_millis(200));
        assert_eq!(calls[1].1, set(&["styles", "index"]));
        assert!(!rec.cancelled.load(Ordering::SeqCst));

        drop(tx);
        assert_eq!(handle.await.unwrap().unwrap().rebuilds, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_in_flight_rebuild() {
        let rec = Recorder::with_delay(60_000);
        let (tx, shutdown, handle) = start(&rec);

        tx.send(change("src/app.js")).await.unwrap();
        sleep(Duration::from_millis(300)).await;
        assert_eq!(rec.calls().len(), 1);

        shutdown.cancel();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.rebuilds, 0);
        assert!(rec.cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_abandons_debounce_timer() {
        let rec = Recorder::with_delay(10);
        let (tx, shutdown, handle) = start(&rec);

        tx.send(change("src/app.js")).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();
        assert!(rec.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_source_still_rebuilds_pending_changes() {
        let rec = Recorder::with_delay(10);
        let (tx, _shutdown, handle) = start(&rec);

        tx.send(change("src/assets/site.scss")).await.unwrap();
        drop(tx);

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.rebuilds, 1);
        assert_eq!(rec.calls()[0].1, set(&["styles", "index"]));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rebuild_keeps_watching() {
        let rec = Arc::new(Recorder {
            delay: Duration::from_millis(10),
            fail_first: true,
            ..Recorder::default()
        });
        let (tx, _shutdown, handle) = start(&rec);

        tx.send(change("src/app.js")).await.unwrap();
        sleep(Duration::from_millis(1000)).await;
        tx.send(change("src/app.js")).await.unwrap();
        sleep(Duration::from_millis(1000)).await;
        drop(tx);

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.rebuilds, 2);
        assert_eq!(summary.failed_rebuilds, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unwatched_paths_do_not_rebuild() {
        let rec = Recorder::with_delay(10);
        let (tx, _shutdown, handle) = start(&rec);

        tx.send(change("docs/readme.md")).await.unwrap();
        sleep(Duration::from_millis(1000)).await;
        drop(tx);

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.events, 1);
        assert_eq!(summary.rebuilds, 0);
        assert!(rec.calls().is_empty());
    }
}

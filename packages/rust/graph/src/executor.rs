//! Build graph executor.
//!
//! Schedules a [`Plan`] on a bounded pool: a task is spawned once all of its
//! in-plan dependencies finished successfully, and at most `jobs` tasks run
//! at the same time. The run owns the output root through an [`OutputLock`].

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use assetforge_shared::{
    BuildContext, CancelToken, ExecutorConfig, FailurePolicy, ForgeError, LockPolicy, Result,
};

use crate::lock::OutputLock;
use crate::registry::{Plan, TaskRegistry};
use crate::report::{RunReport, TaskOutcome, TaskStatus};
use crate::task::{TaskContext, TaskReport};

/// Default number of parallel jobs (uses available parallelism).
fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Runs task plans.
#[derive(Debug, Clone)]
pub struct Executor {
    jobs: usize,
    failure_policy: FailurePolicy,
    lock_policy: LockPolicy,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self {
            jobs: default_jobs(),
            failure_policy: FailurePolicy::default(),
            lock_policy: LockPolicy::default(),
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        let executor = Self::new()
            .with_failure_policy(config.failure_policy)
            .with_lock_policy(config.lock);
        if config.jobs == 0 {
            executor
        } else {
            executor.with_jobs(config.jobs)
        }
    }

    /// Set the worker pool size (at least one).
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Run `target` and its transitive dependencies.
    ///
    /// Configuration problems (unknown target, unknown dependency, cycle)
    /// are returned as errors before any task starts; task failures are
    /// reported in the [`RunReport`].
    #[instrument(skip_all, fields(target, mode = %ctx.mode, run_id = %ctx.run_id))]
    pub async fn run(
        &self,
        registry: &TaskRegistry,
        target: &str,
        ctx: Arc<BuildContext>,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        let plan = registry.plan(&[target])?;
        self.execute(registry, plan, Some(target.to_string()), ctx, cancel)
            .await
    }

    /// Run exactly `ids`; dependencies outside the set count as satisfied.
    #[instrument(skip_all, fields(tasks = ids.len(), mode = %ctx.mode, run_id = %ctx.run_id))]
    pub async fn run_tasks(
        &self,
        registry: &TaskRegistry,
        ids: &std::collections::BTreeSet<String>,
        ctx: Arc<BuildContext>,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        let plan = registry.plan_subset(ids)?;
        self.execute(registry, plan, None, ctx, cancel).await
    }

    async fn execute(
        &self,
        registry: &TaskRegistry,
        plan: Plan,
        target: Option<String>,
        ctx: Arc<BuildContext>,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        let _lock = OutputLock::acquire(&ctx.output_root, self.lock_policy).await?;
        let start = Instant::now();

        info!(
            tasks = plan.len(),
            jobs = self.jobs,
            policy = ?self.failure_policy,
            "starting run"
        );

        let mut schedule = Schedule::new(&plan);
        let mut join: JoinSet<Result<TaskReport>> = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, (String, Instant)> = HashMap::new();
        let mut outcomes: Vec<TaskOutcome> = Vec::with_capacity(plan.len());
        let mut halted = false;

        loop {
            while !halted && running.len() < self.jobs {
                if cancel.is_cancelled() {
                    info!("run cancelled, not starting further tasks");
                    halted = true;
                    break;
                }
                let Some(id) = schedule.ready.pop_front() else {
                    break;
                };

                let task = registry.resolve(&id)?;
                let cx = TaskContext {
                    task_id: id.clone(),
                    build: Arc::clone(&ctx),
                    cancel: cancel.clone(),
                };
                debug!(task = %id, "starting task");
                let handle = join.spawn(task.action().run(cx));
                running.insert(handle.id(), (id, Instant::now()));
            }

            if running.is_empty() {
                break;
            }

            let joined = tokio::select! {
                joined = join.join_next_with_id() => joined,
                () = cancel.cancelled(), if !halted => {
                    info!("run cancelled, draining in-flight tasks");
                    halted = true;
                    continue;
                }
            };
            let Some(joined) = joined else {
                break;
            };

            let (task_id, result) = match joined {
                Ok((task_id, result)) => (task_id, Ok(result)),
                Err(err) => (err.id(), Err(err)),
            };
            let Some((id, started)) = running.remove(&task_id) else {
                continue;
            };
            let duration = started.elapsed();

            let outcome = match result {
                Ok(Ok(report)) => {
                    let status = if report.up_to_date {
                        TaskStatus::UpToDate
                    } else {
                        TaskStatus::Succeeded
                    };
                    info!(task = %id, %status, elapsed_ms = duration.as_millis(), "task finished");
                    schedule.complete(&id);
                    TaskOutcome {
                        id,
                        status,
                        duration,
                        error: None,
                        outputs: report.outputs,
                    }
                }
                Ok(Err(ForgeError::Cancelled)) => {
                    info!(task = %id, "task cancelled");
                    schedule.block_dependents(&id, "cancelled");
                    cancelled(id, duration, "cancelled")
                }
                Ok(Err(err)) => {
                    warn!(task = %id, error = %err, "task failed");
                    schedule.block_dependents(&id, "failed");
                    halted |= self.halt_on_failure(&mut join);
                    failed(id, duration, err.to_string())
                }
                Err(join_err) if join_err.is_cancelled() => {
                    cancelled(id, duration, "aborted after another task failed")
                }
                Err(join_err) => {
                    warn!(task = %id, error = %join_err, "task panicked");
                    schedule.block_dependents(&id, "failed");
                    halted |= self.halt_on_failure(&mut join);
                    failed(id, duration, format!("task panicked: {join_err}"))
                }
            };
            outcomes.push(outcome);
        }

        let finished: HashSet<String> = outcomes.iter().map(|o| o.id.clone()).collect();
        for id in &plan.order {
            if finished.contains(id) {
                continue;
            }
            let outcome = match schedule.blocked.get(id) {
                Some(reason) => TaskOutcome::not_run(id, TaskStatus::Skipped, reason.clone()),
                None => TaskOutcome::not_run(id, TaskStatus::Cancelled, "not started"),
            };
            outcomes.push(outcome);
        }

        let report = RunReport {
            run_id: ctx.run_id,
            target,
            outcomes,
            elapsed: start.elapsed(),
        };

        info!(
            success = report.is_success(),
            succeeded = report.count(TaskStatus::Succeeded),
            up_to_date = report.count(TaskStatus::UpToDate),
            failed = report.count(TaskStatus::Failed),
            elapsed_ms = report.elapsed.as_millis(),
            "run complete"
        );

        Ok(report)
    }

    /// Apply the failure policy; returns whether scheduling should stop.
    fn halt_on_failure(&self, join: &mut JoinSet<Result<TaskReport>>) -> bool {
        match self.failure_policy {
            FailurePolicy::Drain => true,
            FailurePolicy::Abort => {
                join.abort_all();
                true
            }
            FailurePolicy::KeepGoing => false,
        }
    }
}

fn failed(id: String, duration: Duration, error: String) -> TaskOutcome {
    TaskOutcome {
        id,
        status: TaskStatus::Failed,
        duration,
        error: Some(error),
        outputs: Vec::new(),
    }
}

fn cancelled(id: String, duration: Duration, reason: &str) -> TaskOutcome {
    TaskOutcome {
        id,
        status: TaskStatus::Cancelled,
        duration,
        error: Some(reason.to_string()),
        outputs: Vec::new(),
    }
}

/// Dependency bookkeeping for one run.
struct Schedule {
    /// Unfinished in-plan dependencies per task.
    remaining: HashMap<String, usize>,
    dependents: HashMap<String, Vec<String>>,
    ready: VecDeque<String>,
    /// Tasks that can no longer run, with the reason.
    blocked: BTreeMap<String, String>,
}

impl Schedule {
    fn new(plan: &Plan) -> Self {
        let mut remaining = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

        for id in &plan.order {
            let deps = plan.deps.get(id).map(Vec::as_slice).unwrap_or_default();
            remaining.insert(id.clone(), deps.len());
            for dep in deps {
                dependents.entry(dep.clone()).or_default().push(id.clone());
            }
        }

        let ready = plan
            .order
            .iter()
            .filter(|id| remaining[id.as_str()] == 0)
            .cloned()
            .collect();

        Self {
            remaining,
            dependents,
            ready,
            blocked: BTreeMap::new(),
        }
    }

    fn complete(&mut self, id: &str) {
        let Some(next) = self.dependents.get(id) else {
            return;
        };
        for dependent in next {
            if let Some(count) = self.remaining.get_mut(dependent) {
                *count -= 1;
                if *count == 0 && !self.blocked.contains_key(dependent) {
                    self.ready.push_back(dependent.clone());
                }
            }
        }
    }

    fn block_dependents(&mut self, id: &str, verb: &str) {
        let mut queue: VecDeque<String> = self.dependents.get(id).cloned().unwrap_or_default().into();
        while let Some(dependent) = queue.pop_front() {
            if self.blocked.contains_key(&dependent) {
                continue;
            }
            self.blocked
                .insert(dependent.clone(), format!("dependency `{id}` {verb}"));
            if let Some(next) = self.dependents.get(&dependent) {
                queue.extend(next.iter().cloned());
            }
        }
    }
}

//! Tasks: named units of build work with declared dependencies.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use assetforge_shared::{BuildContext, CancelToken, Result};

/// Boxed future returned by a [`TaskAction`].
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<TaskReport>> + Send>>;

/// Everything a running task may look at.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub build: Arc<BuildContext>,
    /// Observed at transform-step boundaries.
    pub cancel: CancelToken,
}

/// The work a task performs.
///
/// Implemented for any `Fn(TaskContext) -> impl Future<Output = Result<TaskReport>>`.
pub trait TaskAction: Send + Sync {
    fn run(&self, cx: TaskContext) -> TaskFuture;
}

impl<F, Fut> TaskAction for F
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskReport>> + Send + 'static,
{
    fn run(&self, cx: TaskContext) -> TaskFuture {
        Box::pin(self(cx))
    }
}

/// What a successful task produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskReport {
    /// Published files, relative to the output root.
    pub outputs: Vec<PathBuf>,
    /// The task found its previous outputs still valid and did no work.
    pub up_to_date: bool,
}

impl TaskReport {
    pub fn built(outputs: Vec<PathBuf>) -> Self {
        Self {
            outputs,
            up_to_date: false,
        }
    }

    pub fn up_to_date(outputs: Vec<PathBuf>) -> Self {
        Self {
            outputs,
            up_to_date: true,
        }
    }
}

/// Project-relative globs whose changes should re-run a task in watch mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchInputs {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl WatchInputs {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }
}

/// A registered task. Immutable once inserted into a registry.
#[derive(Clone)]
pub struct Task {
    id: String,
    depends_on: Vec<String>,
    inputs: WatchInputs,
    action: Arc<dyn TaskAction>,
}

impl Task {
    pub fn new(id: impl Into<String>, action: impl TaskAction + 'static) -> Self {
        Self {
            id: id.into(),
            depends_on: Vec::new(),
            inputs: WatchInputs::default(),
            action: Arc::new(action),
        }
    }

    /// Declare dependencies. Duplicates are dropped, declaration order kept.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dep in deps {
            let dep = dep.into();
            if !self.depends_on.contains(&dep) {
                self.depends_on.push(dep);
            }
        }
        self
    }

    pub fn watching(mut self, inputs: WatchInputs) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    pub fn inputs(&self) -> &WatchInputs {
        &self.inputs
    }

    pub fn action(&self) -> Arc<dyn TaskAction> {
        Arc::clone(&self.action)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("depends_on", &self.depends_on)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

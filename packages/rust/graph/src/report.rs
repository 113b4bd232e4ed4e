//! Per-task outcomes and the aggregate result of one run.

use std::path::PathBuf;
use std::time::Duration;

use assetforge_shared::{ForgeError, Result, RunId};

/// Final state of one task in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Succeeded,
    /// Previous outputs were still valid; nothing was rewritten.
    UpToDate,
    Failed,
    /// Never ran because a dependency failed.
    Skipped,
    /// Never ran, or was aborted, because the run was halted or cancelled.
    Cancelled,
}

impl TaskStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Succeeded | Self::UpToDate)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "ok",
            Self::UpToDate => "up-to-date",
            Self::Failed => "FAILED",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub id: String,
    pub status: TaskStatus,
    pub duration: Duration,
    pub error: Option<String>,
    /// Published files, relative to the output root.
    pub outputs: Vec<PathBuf>,
}

impl TaskOutcome {
    pub(crate) fn not_run(id: &str, status: TaskStatus, reason: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            status,
            duration: Duration::ZERO,
            error: Some(reason.into()),
            outputs: Vec::new(),
        }
    }
}

/// Aggregate result of one executor run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    /// The requested target, or `None` for a subset run.
    pub target: Option<String>,
    /// Tasks that finished, in completion order, followed by those that never ran.
    pub outcomes: Vec<TaskOutcome>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.status.is_ok())
    }

    pub fn outcome(&self, id: &str) -> Option<&TaskOutcome> {
        self.outcomes.iter().find(|o| o.id == id)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| o.status == TaskStatus::Failed)
    }

    /// Convert a failed run into `ExecutorFailure`.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let mut failed: Vec<String> = self.failed().map(|o| o.id.clone()).collect();
        if failed.is_empty() {
            // Nothing failed outright: the run was cancelled.
            failed = self
                .outcomes
                .iter()
                .filter(|o| !o.status.is_ok())
                .map(|o| o.id.clone())
                .collect();
        }
        Err(ForgeError::ExecutorFailure { failed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &str, status: TaskStatus) -> TaskOutcome {
        TaskOutcome {
            id: id.into(),
            status,
            duration: Duration::from_millis(5),
            error: None,
            outputs: Vec::new(),
        }
    }

    #[test]
    fn success_requires_every_task_ok() {
        let report = RunReport {
            run_id: RunId::new(),
            target: Some("build".into()),
            outcomes: vec![
                outcome("a", TaskStatus::Succeeded),
                outcome("b", TaskStatus::UpToDate),
            ],
            elapsed: Duration::ZERO,
        };
        assert!(report.is_success());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn failure_lists_failed_tasks() {
        let report = RunReport {
            run_id: RunId::new(),
            target: None,
            outcomes: vec![
                outcome("a", TaskStatus::Failed),
                outcome("b", TaskStatus::Skipped),
                outcome("c", TaskStatus::Succeeded),
            ],
            elapsed: Duration::ZERO,
        };
        assert_eq!(report.count(TaskStatus::Skipped), 1);
        match report.into_result() {
            Err(ForgeError::ExecutorFailure { failed }) => assert_eq!(failed, vec!["a"]),
            other => panic!("unexpected: {other:?}"),
        }
    }
}

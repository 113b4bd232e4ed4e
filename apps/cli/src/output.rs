//! Terminal output: build spinner and per-task status table.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use assetforge_graph::{RunReport, TaskStatus};

/// Spinner shown while a run is in progress.
pub(crate) struct BuildSpinner {
    spinner: ProgressBar,
}

impl BuildSpinner {
    pub(crate) fn start(message: impl Into<String>) -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.set_message(message.into());
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    pub(crate) fn finish(self) {
        self.spinner.finish_and_clear();
    }
}

/// Render the status table and the pass/fail summary line.
pub(crate) fn render_report(report: &RunReport) -> String {
    let width = report
        .outcomes
        .iter()
        .map(|o| o.id.len())
        .max()
        .unwrap_or(0)
        .max("TASK".len());

    let mut out = String::new();
    out.push('\n');
    out.push_str(&format!("  {:<width$}  {:<10}  {:>8}  OUTPUTS\n", "TASK", "STATUS", "TIME"));
    for outcome in &report.outcomes {
        out.push_str(&format!(
            "  {:<width$}  {:<10}  {:>8}  {}\n",
            outcome.id,
            outcome.status.label(),
            format_duration(outcome.duration),
            outcome.outputs.len(),
        ));
        if outcome.status == TaskStatus::Failed {
            if let Some(error) = &outcome.error {
                out.push_str(&format!("  {:<width$}  └─ {error}\n", ""));
            }
        }
    }
    out.push('\n');

    let verdict = if report.is_success() {
        "Build succeeded"
    } else {
        "Build FAILED"
    };
    let mut counts = Vec::new();
    for status in [
        TaskStatus::Succeeded,
        TaskStatus::UpToDate,
        TaskStatus::Failed,
        TaskStatus::Skipped,
        TaskStatus::Cancelled,
    ] {
        let n = report.count(status);
        if n > 0 {
            counts.push(format!("{n} {}", status.label()));
        }
    }
    out.push_str(&format!(
        "  {verdict}: {} in {:.2}s\n",
        counts.join(", "),
        report.elapsed.as_secs_f64()
    ));
    out
}

fn format_duration(d: Duration) -> String {
    if d.as_millis() < 1000 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetforge_graph::TaskOutcome;
    use assetforge_shared::RunId;
    use std::path::PathBuf;

    fn outcome(id: &str, status: TaskStatus, error: Option<&str>) -> TaskOutcome {
        TaskOutcome {
            id: id.into(),
            status,
            duration: Duration::from_millis(12),
            error: error.map(String::from),
            outputs: vec![PathBuf::from("js/scripts.js")],
        }
    }

    #[test]
    fn table_lists_tasks_and_failures() {
        let report = RunReport {
            run_id: RunId::new(),
            target: Some("build".into()),
            outcomes: vec![
                outcome("styles", TaskStatus::UpToDate, None),
                outcome("scripts", TaskStatus::Failed, Some("transform `lint-js` failed: app.js:3: unexpected `debugger` statement")),
                outcome("index", TaskStatus::Skipped, Some("dependency `scripts` failed")),
            ],
            elapsed: Duration::from_millis(250),
        };
        let table = render_report(&report);
        assert!(table.contains("up-to-date"));
        assert!(table.contains("└─ transform `lint-js` failed"));
        assert!(!table.contains("dependency `scripts` failed"));
        assert!(table.contains("Build FAILED: 1 up-to-date, 1 FAILED, 1 skipped in 0.25s"));
    }

    #[test]
    fn durations_are_compact() {
        assert_eq!(format_duration(Duration::from_millis(7)), "7ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}

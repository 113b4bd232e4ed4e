//! Delegate `test` to the configured external runner.

use tokio::process::Command;
use tracing::{info, warn};

use assetforge_shared::{ForgeError, Result};

use crate::project::Project;

/// Run `[test].command` in the project root with inherited stdio.
///
/// Returns the runner's exit code; termination by a signal counts as 1.
pub async fn run_tests(project: &Project) -> Result<i32> {
    let command = &project.config().test.command;
    let Some((program, args)) = command.split_first() else {
        return Err(ForgeError::config("test.command must name a program"));
    };

    info!(%program, ?args, "running test runner");
    let status = Command::new(program)
        .args(args)
        .current_dir(project.root())
        .status()
        .await
        .map_err(|e| ForgeError::io(program, e))?;

    let code = status.code().unwrap_or_else(|| {
        warn!(%status, "test runner terminated by signal");
        1
    });
    info!(code, "test runner finished");
    Ok(code)
}

//! Atomic publication of task outputs.
//!
//! Outputs are first written to `.staging-<task>-<uuid>/` inside the output
//! root, then renamed into place one by one. Staging on the same filesystem
//! keeps every rename atomic, so readers never see a half-written file. Files
//! from the task's previous build that are not part of the new set are
//! removed afterwards.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, instrument};

use assetforge_shared::{ForgeError, Result};

/// Prefix of staging directories inside an output root.
pub const STAGING_PREFIX: &str = ".staging-";

/// A file ready to publish, relative to the output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub path: PathBuf,
    pub contents: Vec<u8>,
}

/// Publish `outputs` for `task`, then delete stale files from `previous`.
///
/// Returns the published paths in input order.
#[instrument(skip_all, fields(task, files = outputs.len()))]
pub fn publish(
    output_root: &Path,
    task: &str,
    outputs: Vec<Output>,
    previous: &[PathBuf],
) -> Result<Vec<PathBuf>> {
    for output in &outputs {
        if !is_contained(&output.path) {
            return Err(ForgeError::validation(format!(
                "task `{task}` produced {} outside the output root",
                output.path.display()
            )));
        }
    }

    let staging = output_root.join(format!("{STAGING_PREFIX}{task}-{}", uuid::Uuid::now_v7()));
    let result = stage_and_move(output_root, &staging, &outputs);
    if staging.exists() {
        let _ = std::fs::remove_dir_all(&staging);
    }
    let published = result?;

    let current: HashSet<&PathBuf> = published.iter().collect();
    for stale in previous.iter().filter(|p| !current.contains(p)) {
        if !is_contained(stale) {
            continue;
        }
        let path = output_root.join(stale);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %stale.display(), "removed stale output");
                prune_empty_dirs(output_root, &path);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(ForgeError::io(&path, err)),
        }
    }

    Ok(published)
}

fn stage_and_move(output_root: &Path, staging: &Path, outputs: &[Output]) -> Result<Vec<PathBuf>> {
    for output in outputs {
        let staged = staging.join(&output.path);
        if let Some(parent) = staged.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ForgeError::io(parent, e))?;
        }
        std::fs::write(&staged, &output.contents).map_err(|e| ForgeError::io(&staged, e))?;
    }

    let mut published = Vec::with_capacity(outputs.len());
    for output in outputs {
        let staged = staging.join(&output.path);
        let target = output_root.join(&output.path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ForgeError::io(parent, e))?;
        }
        std::fs::rename(&staged, &target).map_err(|e| ForgeError::io(&target, e))?;
        published.push(output.path.clone());
    }
    Ok(published)
}

/// Remove now-empty directories between `removed` and `output_root`.
fn prune_empty_dirs(output_root: &Path, removed: &Path) {
    let mut dir = removed.parent();
    while let Some(current) = dir {
        if current == output_root || !current.starts_with(output_root) {
            break;
        }
        if std::fs::remove_dir(current).is_err() {
            break;
        }
        dir = current.parent();
    }
}

fn is_contained(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

//! Remove output roots.

use std::path::PathBuf;

use tracing::info;

use assetforge_graph::OutputLock;
use assetforge_shared::{BuildMode, ForgeError, Result};

use crate::project::Project;

/// Delete the output root of each mode; returns the roots that existed.
///
/// Takes the output lock first, so a running build makes this fail (or wait,
/// per the configured lock policy) instead of racing it.
pub async fn clean(project: &Project, modes: &[BuildMode]) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for &mode in modes {
        let root = project.output_root(mode);
        if removed.contains(&root) {
            continue;
        }
        let _lock = OutputLock::acquire(&root, project.config().executor.lock).await?;
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => {
                info!(%mode, path = %root.display(), "removed output root");
                removed.push(root);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(ForgeError::io(&root, err)),
        }
    }
    Ok(removed)
}

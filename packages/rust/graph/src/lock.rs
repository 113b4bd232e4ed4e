//! Advisory lock giving one run exclusive ownership of an output root.
//!
//! The lock file sits next to the output root (not inside it) so that
//! `clean` can remove the whole root while holding the lock.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use assetforge_shared::{ForgeError, LockPolicy, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Held for the duration of a run; released on drop.
#[derive(Debug)]
pub struct OutputLock {
    _file: File,
    lock_path: PathBuf,
}

impl OutputLock {
    /// `<parent>/.<name>.assetforge.lock` for an output root `<parent>/<name>`.
    pub fn lock_path_for(output_root: &Path) -> PathBuf {
        let name = output_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".into());
        let parent = output_root.parent().unwrap_or_else(|| Path::new("."));
        parent.join(format!(".{name}.assetforge.lock"))
    }

    /// Take the lock or fail with `BuildInProgress`.
    pub fn try_acquire(output_root: &Path) -> Result<Self> {
        let lock_path = Self::lock_path_for(output_root);

        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ForgeError::io(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| ForgeError::io(&lock_path, e))?;

        if let Err(err) = try_lock(&file) {
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(ForgeError::BuildInProgress {
                    output_root: output_root.to_path_buf(),
                    lock_path,
                });
            }
            return Err(ForgeError::io(&lock_path, err));
        }

        file.set_len(0)
            .and_then(|()| writeln!(file, "{}", std::process::id()))
            .map_err(|e| ForgeError::io(&lock_path, e))?;

        debug!(lock = %lock_path.display(), "acquired output lock");
        Ok(Self {
            _file: file,
            lock_path,
        })
    }

    /// Take the lock according to `policy`, polling while another run holds it.
    pub async fn acquire(output_root: &Path, policy: LockPolicy) -> Result<Self> {
        let mut announced = false;
        loop {
            match Self::try_acquire(output_root) {
                Err(ForgeError::BuildInProgress { .. }) if policy == LockPolicy::Wait => {
                    if !announced {
                        info!(output_root = %output_root.display(), "waiting for running build to finish");
                        announced = true;
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                other => return other,
            }
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

#[cfg(unix)]
fn try_lock(file: &File) -> io::Result<()> {
    use rustix::fs::{FlockOperation, flock};
    use std::os::unix::io::AsFd;

    flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn try_lock(file: &File) -> io::Result<()> {
    file.try_lock().map_err(|e| match e {
        std::fs::TryLockError::WouldBlock => io::Error::from(io::ErrorKind::WouldBlock),
        std::fs::TryLockError::Error(err) => err,
    })
}

//! Persisted record of what each task last published.
//!
//! Stored as `<output_root>/.assetforge-manifest.json`. The file holds no
//! timestamps and uses sorted maps, so a rebuild that changes nothing leaves
//! it byte-identical.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use assetforge_shared::{ForgeError, Result};

/// File name of the manifest inside an output root.
pub const MANIFEST_FILE: &str = ".assetforge-manifest.json";

const MANIFEST_VERSION: u32 = 1;

/// Last successful build of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Fingerprint over chain, mode, destination and source contents.
    pub fingerprint: String,
    /// Project-relative source path → content hash.
    pub sources: BTreeMap<String, String>,
    /// Published files, relative to the output root.
    pub outputs: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub version: u32,
    pub tasks: BTreeMap<String, TaskRecord>,
}

impl Default for BuildManifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            tasks: BTreeMap::new(),
        }
    }
}

impl BuildManifest {
    pub fn path_for(output_root: &Path) -> PathBuf {
        output_root.join(MANIFEST_FILE)
    }

    /// Load the manifest of `output_root`.
    ///
    /// A missing, unreadable-as-JSON or foreign-version manifest yields an
    /// empty one, which makes every task rebuild.
    pub fn load(output_root: &Path) -> Result<Self> {
        let path = Self::path_for(output_root);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(ForgeError::io(&path, err)),
        };

        match serde_json::from_str::<Self>(&content) {
            Ok(manifest) if manifest.version == MANIFEST_VERSION => Ok(manifest),
            Ok(manifest) => {
                warn!(version = manifest.version, "ignoring build manifest with unknown version");
                Ok(Self::default())
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring corrupt build manifest");
                Ok(Self::default())
            }
        }
    }

    /// Write atomically (temp file + rename).
    pub fn save(&self, output_root: &Path) -> Result<()> {
        std::fs::create_dir_all(output_root).map_err(|e| ForgeError::io(output_root, e))?;
        let path = Self::path_for(output_root);
        let tmp = output_root.join(format!("{MANIFEST_FILE}.{}.tmp", uuid::Uuid::now_v7()));

        let mut json = serde_json::to_string_pretty(self)
            .map_err(|e| ForgeError::validation(format!("failed to serialize build manifest: {e}")))?;
        json.push('\n');

        std::fs::write(&tmp, json).map_err(|e| ForgeError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| ForgeError::io(&path, e))?;
        Ok(())
    }
}

/// Manifest shared by the tasks of one pipeline.
///
/// Loaded lazily by the first task that asks, so the read happens while the
/// run holds the output lock. Each commit is persisted immediately.
#[derive(Debug)]
pub struct ManifestStore {
    output_root: PathBuf,
    state: Mutex<Option<BuildManifest>>,
}

impl ManifestStore {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            state: Mutex::new(None),
        }
    }

    /// Forget the cached copy; the next access re-reads the file.
    pub fn reset(&self) {
        *self.lock() = None;
    }

    pub fn record(&self, task: &str) -> Result<Option<TaskRecord>> {
        self.with(|manifest| manifest.tasks.get(task).cloned())
    }

    /// Outputs of `task` from its last successful build.
    pub fn outputs(&self, task: &str) -> Result<Vec<PathBuf>> {
        Ok(self.record(task)?.map(|r| r.outputs).unwrap_or_default())
    }

    /// Store `record` for `task`, writing the file only if something changed.
    pub fn commit(&self, task: &str, record: TaskRecord) -> Result<()> {
        let mut guard = self.lock();
        let manifest = Self::loaded(&mut guard, &self.output_root)?;
        if manifest.tasks.get(task) == Some(&record) {
            return Ok(());
        }
        manifest.tasks.insert(task.to_string(), record);
        manifest.save(&self.output_root)?;
        debug!(task, "build manifest updated");
        Ok(())
    }

    fn with<R>(&self, f: impl FnOnce(&mut BuildManifest) -> R) -> Result<R> {
        let mut guard = self.lock();
        let manifest = Self::loaded(&mut guard, &self.output_root)?;
        Ok(f(manifest))
    }

    fn loaded<'a>(slot: &'a mut Option<BuildManifest>, output_root: &Path) -> Result<&'a mut BuildManifest> {
        if slot.is_none() {
            *slot = Some(BuildManifest::load(output_root)?);
        }
        slot.as_mut()
            .ok_or_else(|| ForgeError::validation("build manifest not loaded"))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<BuildManifest>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

//! File transforms and the chain pipeline that composes them.
//!
//! A [`Transform`] maps a collection of in-memory files to a new collection.
//! Transforms declare the [`MediaKind`] they consume and produce so that a
//! [`Chain`] can be checked for compatibility before anything runs.
//!
//! Built-in transforms are registered in [`TransformRegistry::builtin`] and
//! addressed by step specs of the form `name` or `name:argument`.

pub mod builtin;
mod pipeline;
mod registry;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use assetforge_shared::{BuildMode, MediaKind, Result};

pub use pipeline::{Chain, ChainStep};
pub use registry::{TransformFactory, TransformRegistry};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// An in-memory file flowing through a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlob {
    /// Logical path; becomes the published path relative to the asset destination.
    pub path: PathBuf,
    pub contents: Vec<u8>,
}

impl FileBlob {
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }

    /// Contents as UTF-8, or a transform error naming the file.
    pub fn text(&self, step: &str) -> Result<&str> {
        std::str::from_utf8(&self.contents).map_err(|e| {
            assetforge_shared::ForgeError::transform(
                step,
                format!("{}: not valid UTF-8 ({e})", self.path.display()),
            )
        })
    }

    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|e| e.to_str())
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// Published URLs per injection group, e.g. `"inject" → ["/js/scripts.ab12.js"]`.
pub type Injections = BTreeMap<String, Vec<String>>;

/// Read-only inputs shared by every step of a chain.
#[derive(Debug, Clone)]
pub struct TransformContext {
    pub mode: BuildMode,
    /// Working directory for external commands.
    pub project_root: PathBuf,
    /// Only populated for the index chain.
    pub injections: Arc<Injections>,
}

impl TransformContext {
    pub fn new(mode: BuildMode, project_root: impl AsRef<Path>) -> Self {
        Self {
            mode,
            project_root: project_root.as_ref().to_path_buf(),
            injections: Arc::new(Injections::new()),
        }
    }

    pub fn with_injections(mut self, injections: Injections) -> Self {
        self.injections = Arc::new(injections);
        self
    }
}

/// A pure, named file transformation.
///
/// `apply` runs on the blocking pool and may perform synchronous I/O
/// (external processes); it must not depend on anything but its inputs.
pub trait Transform: Send + Sync + std::fmt::Debug {
    /// Step spec as written in configuration, e.g. `concat:scripts.js`.
    fn name(&self) -> &str;

    fn input_kind(&self) -> MediaKind;

    fn output_kind(&self) -> MediaKind;

    fn apply(&self, files: Vec<FileBlob>, cx: &TransformContext) -> Result<Vec<FileBlob>>;
}

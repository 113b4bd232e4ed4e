//! Core domain types shared by every assetforge crate.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::content_hash;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one build invocation (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// BuildMode
// ---------------------------------------------------------------------------

/// Which flavour of output a build produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Readable output for local development, served with live reload.
    Dev,
    /// Minified, cache-busted output for deployment.
    Prod,
}

impl BuildMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Prod => "prod",
        }
    }
}

impl std::fmt::Display for BuildMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "dev" | "development" => Ok(Self::Dev),
            "prod" | "production" => Ok(Self::Prod),
            other => Err(format!("unknown build mode '{other}': expected 'dev' or 'prod'")),
        }
    }
}

// ---------------------------------------------------------------------------
// MediaKind
// ---------------------------------------------------------------------------

/// Content kind exchanged between transform steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaKind {
    Script,
    /// Stylesheet source that still needs compiling (SCSS or plain CSS).
    StyleSource,
    Style,
    Markup,
    Image,
    /// Accepts or produces any kind.
    Any,
}

impl MediaKind {
    /// MIME-style label used in diagnostics.
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Script => "text/javascript",
            Self::StyleSource => "text/x-scss",
            Self::Style => "text/css",
            Self::Markup => "text/html",
            Self::Image => "image/*",
            Self::Any => "*/*",
        }
    }

    /// Whether content of kind `produced` may be fed to a step expecting `self`.
    pub fn accepts(&self, produced: MediaKind) -> bool {
        *self == Self::Any || produced == Self::Any || *self == produced
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime())
    }
}

// ---------------------------------------------------------------------------
// Sources and BuildContext
// ---------------------------------------------------------------------------

/// A discovered source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path relative to the project root.
    pub path: PathBuf,
    /// Path relative to the glob base that matched it; outputs keep this layout.
    pub logical: PathBuf,
}

/// Logical asset name → ordered source files, resolved for one invocation.
pub type AssetManifest = BTreeMap<String, Vec<SourceFile>>;

/// Immutable per-invocation context handed to every task.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub run_id: RunId,
    pub project_root: PathBuf,
    pub output_root: PathBuf,
    pub mode: BuildMode,
    pub assets: AssetManifest,
}

impl BuildContext {
    pub fn new(project_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>, mode: BuildMode) -> Self {
        Self {
            run_id: RunId::new(),
            project_root: project_root.into(),
            output_root: output_root.into(),
            mode,
            assets: AssetManifest::new(),
        }
    }

    pub fn with_assets(mut self, assets: AssetManifest) -> Self {
        self.assets = assets;
        self
    }

    /// Sources discovered for `asset`; empty when the asset matched nothing.
    pub fn sources(&self, asset: &str) -> &[SourceFile] {
        self.assets.get(asset).map(Vec::as_slice).unwrap_or_default()
    }

    /// Absolute path of a project-relative source.
    pub fn source_path(&self, file: &SourceFile) -> PathBuf {
        self.project_root.join(&file.path)
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

// ---------------------------------------------------------------------------
// WatchEvent
// ---------------------------------------------------------------------------

/// Kind of filesystem change observed by the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventKind {
    Add,
    Change,
    Delete,
}

impl std::fmt::Display for WatchEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Change => "change",
            Self::Delete => "delete",
        })
    }
}

/// A single filesystem change, with its path relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
    pub at: DateTime<Utc>,
}

impl WatchEvent {
    pub fn new(path: impl Into<PathBuf>, kind: WatchEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
            at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// CacheBustToken
// ---------------------------------------------------------------------------

/// Content-addressed token embedded in published file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheBustToken(String);

impl CacheBustToken {
    /// Number of hex characters kept from the content hash.
    pub const LEN: usize = 10;

    pub fn of(contents: &[u8]) -> Self {
        let mut hash = content_hash(contents);
        hash.truncate(Self::LEN);
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `dir/app.min.js` → `dir/app.min.<token>.js`; extension-less names get a suffix.
    pub fn stamp(&self, path: &Path) -> PathBuf {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stamped = match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => format!("{stem}.{}.{ext}", self.0),
            _ => format!("{file_name}.{}", self.0),
        };
        path.with_file_name(stamped)
    }
}

impl std::fmt::Display for CacheBustToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

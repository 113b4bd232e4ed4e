//! Error types for assetforge.
//!
//! Library crates use [`ForgeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all assetforge operations.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A configuration key that is not part of the schema.
    #[error("unknown config option `{option}`")]
    UnknownConfigOption { option: String },

    /// A task id was registered twice.
    #[error("task `{id}` is already registered")]
    DuplicateTask { id: String },

    /// A task depends on an id that was never registered.
    #[error("task `{task}` depends on unknown task `{dependency}`")]
    UnknownDependency { task: String, dependency: String },

    /// Lookup of an id that is not in the registry.
    #[error("task `{id}` not found")]
    TaskNotFound { id: String },

    /// The dependency graph contains a cycle.
    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// A chain names a transform that does not exist.
    #[error("unknown transform `{name}`")]
    UnknownTransform { name: String },

    /// Two adjacent chain steps disagree on the media kind they exchange.
    #[error("transform `{step}` expects {expected} but receives {found}")]
    ChainTypeMismatch {
        step: String,
        expected: String,
        found: String,
    },

    /// A transform step failed; the rest of its chain was aborted.
    #[error("transform `{step}` failed: {cause}")]
    Transform { step: String, cause: String },

    /// One or more tasks failed during a run.
    #[error("build failed: {} task(s) failed ({})", failed.len(), failed.join(", "))]
    ExecutorFailure { failed: Vec<String> },

    /// Another run currently owns the output root.
    #[error("a build is already in progress for {output_root:?} (lock {lock_path:?})")]
    BuildInProgress {
        output_root: PathBuf,
        lock_path: PathBuf,
    },

    /// The dev server could not bind its address.
    #[error("failed to bind dev server to {addr}: {source}")]
    PortBind {
        addr: String,
        source: std::io::Error,
    },

    /// File watcher setup or delivery error.
    #[error("watch error: {0}")]
    Watch(String),

    /// The operation observed a cancellation request.
    #[error("cancelled")]
    Cancelled,

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (corrupt manifest, invalid pattern, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ForgeError>;

impl ForgeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a transform error attributed to `step`.
    pub fn transform(step: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::Transform {
            step: step.into(),
            cause: cause.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error means the build definition itself is invalid.
    ///
    /// Configuration errors are raised before any transform runs.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::UnknownConfigOption { .. }
                | Self::DuplicateTask { .. }
                | Self::UnknownDependency { .. }
                | Self::TaskNotFound { .. }
                | Self::CyclicDependency { .. }
                | Self::UnknownTransform { .. }
                | Self::ChainTypeMismatch { .. }
        )
    }
}

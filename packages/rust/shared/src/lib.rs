//! Shared types, error model, and configuration for assetforge.
//!
//! This crate is the foundation depended on by all other assetforge crates.
//! It provides:
//! - [`ForgeError`], the unified error type
//! - Domain types ([`BuildContext`], [`BuildMode`], [`MediaKind`], [`WatchEvent`], [`CacheBustToken`])
//! - Configuration ([`ForgeConfig`], config loading)
//! - Content hashing and cooperative cancellation

pub mod cancel;
pub mod config;
pub mod error;
pub mod hash;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use cancel::CancelToken;
pub use config::{
    AssetSpec, CONFIG_FILE_NAME, ExecutorConfig, FailurePolicy, ForgeConfig, IndexConfig,
    LockPolicy, PathsConfig, RESERVED_TASK_IDS, ServerConfig, TestConfig, WatchConfig,
    config_file_path, init_config, load_config, load_config_from, parse_config,
};
pub use error::{ForgeError, Result};
pub use hash::{Fingerprint, content_hash};
pub use types::{
    AssetManifest, BuildContext, BuildMode, CacheBustToken, MediaKind, RunId, SourceFile,
    WatchEvent, WatchEventKind,
};

//! Project assembly for assetforge.
//!
//! Turns a validated [`ForgeConfig`](assetforge_shared::ForgeConfig) into a
//! task graph per build mode: one task per asset class, an index task that
//! injects the published assets into the HTML entry point, and a `build`
//! aggregate. Also hosts the dev session, `clean` and the test runner.

pub mod clean;
pub mod discovery;
pub mod manifest;
pub mod project;
pub mod publish;
pub mod session;
mod tasks;
pub mod test_runner;

/// Task id of the generated index task.
pub const INDEX_TASK: &str = "index";

/// Task id of the aggregate that depends on every other task.
pub const BUILD_TASK: &str = "build";

pub use clean::clean;
pub use manifest::{BuildManifest, MANIFEST_FILE, ManifestStore, TaskRecord};
pub use project::{BuildOptions, Pipeline, Project};
pub use session::{DevSession, SessionRebuilder, WatchOptions, serve_static};
pub use test_runner::run_tests;

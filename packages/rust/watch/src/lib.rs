//! File watching and debounced incremental rebuilds.
//!
//! - [`FsWatcher`] turns `notify` events into project-relative [`WatchEvent`]s
//! - [`InputMatcher`] maps changed paths to affected tasks
//! - [`WatchCoordinator`] debounces changes and drives a [`Rebuilder`]
//!
//! [`WatchEvent`]: assetforge_shared::WatchEvent

pub mod coordinator;
pub mod fs;
pub mod matcher;

pub use coordinator::{RebuildFuture, Rebuilder, WatchCoordinator, WatchState, WatchSummary};
pub use fs::{FsWatcher, PathFilter, translate};
pub use matcher::{GlobSet, InputMatcher};

//! Task registry and build graph executor.
//!
//! - [`TaskRegistry`] holds named tasks and validates their dependency graph
//! - [`Executor`] runs a target's dependency closure on a bounded worker pool
//! - [`OutputLock`] gives a run exclusive ownership of its output root

pub mod executor;
pub mod lock;
pub mod registry;
pub mod report;
pub mod task;

pub use executor::Executor;
pub use lock::OutputLock;
pub use registry::{Plan, TaskRegistry};
pub use report::{RunReport, TaskOutcome, TaskStatus};
pub use task::{Task, TaskAction, TaskContext, TaskFuture, TaskReport, WatchInputs};

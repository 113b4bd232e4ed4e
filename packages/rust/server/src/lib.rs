//! Development HTTP server for built output.
//!
//! Serves an output root as static files and, when a [`ReloadHub`] is
//! attached, pushes `reload` server-sent events to browsers after each
//! successful rebuild.

mod http;
pub mod hub;
pub mod server;

pub use hub::ReloadHub;
pub use server::{DevServer, LIVERELOAD_PATH};

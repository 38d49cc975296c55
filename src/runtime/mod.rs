//! # Orchestrator and run handle.
//!
//! Composes registry, graph, resolver, events, and pipeline into the
//! public entry points: [`run`], [`dry_run`], and the builder-style
//! [`Orchestrator`]. Each invocation owns its own state; multiple
//! independent runtimes coexist in one process.

mod config;
mod handle;
mod orchestrator;
mod shared;

pub use config::RunOptions;
pub use handle::RunHandle;
pub use orchestrator::{dry_run, run, Orchestrator};

pub(crate) use shared::RuntimeShared;

//! # Component store.
//!
//! One [`Registry`] per orchestrator invocation: recursive registration,
//! override merging, and the frozen definition maps every later phase
//! reads from.

mod registry;

pub(crate) use registry::{
    EventEntry, HookEntry, MiddlewareEntry, Registry, ResourceEntry, TaggedMember, TaskEntry,
};

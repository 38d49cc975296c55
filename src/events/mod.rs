//! # Event dispatch engine.
//!
//! Typed notifications with deterministic ordering: per-event listener
//! lists plus wildcard listeners, emission interception, propagation
//! stopping, and a runtime reentrancy guard. The execution pipeline
//! reports through the built-in [`lifecycle`] events defined here.

mod dispatcher;
mod emission;
pub mod lifecycle;

pub use dispatcher::{EmitInterceptor, EmitNext, EventControl, HookInterceptor};
pub use emission::Emission;

pub(crate) use dispatcher::{dispatch, emit_event, Dispatcher};

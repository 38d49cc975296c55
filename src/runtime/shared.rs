//! # Shared runtime state.
//!
//! One [`RuntimeShared`] per orchestrator invocation, owned through an
//! `Arc` by the run handle and weakly by every materialized dependency
//! handle. The registry and graph order are mutated only during the
//! single-threaded setup phase; afterwards the maps are locked and reads
//! are uncontended.

use std::sync::OnceLock;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::def::Id;
use crate::events::Dispatcher;
use crate::store::Registry;

pub(crate) struct RuntimeShared {
    /// The component store; locked after the root initializes.
    pub registry: RwLock<Registry>,
    /// The event dispatch engine.
    pub dispatcher: Dispatcher,
    /// Topological order (dependencies first), set once during setup.
    /// Disposal walks it in reverse.
    pub order: OnceLock<Vec<Id>>,
    /// The root resource's id.
    pub root: Id,
    /// Root cancellation token; child tokens thread through every
    /// execution context.
    pub cancel: CancellationToken,
}

//! # Built-in lifecycle events.
//!
//! The execution pipeline reports through ordinary events, so
//! applications observe task and resource execution with ordinary hooks.
//! All lifecycle events carry the [`NO_WILDCARD`] tag: wildcard hooks do
//! not see them (a wildcard hook observing every task's after-run would
//! drown application events).
//!
//! Payloads:
//! - [`RunOutput`] — after-run / resource-ready; exposes the produced
//!   value and a mutator. The last mutation wins.
//! - [`RunFailure`] — task-failed / resource-failed / dispose-failed;
//!   exposes `suppress()`. Suppression is opt-in per listener, never
//!   implicit.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;

use crate::def::{EventDef, Id, TagDef, TagRef};
use crate::dynamic::Dynamic;

use super::emission::Emission;

/// Id of the built-in skip-wildcard tag.
pub const NO_WILDCARD_ID: &str = "runtime.no_wildcard";
/// Id of the task after-run event.
pub const TASK_AFTER_RUN_ID: &str = "runtime.task_after_run";
/// Id of the task failure event.
pub const TASK_FAILED_ID: &str = "runtime.task_failed";
/// Id of the resource ready event.
pub const RESOURCE_READY_ID: &str = "runtime.resource_ready";
/// Id of the resource init failure event.
pub const RESOURCE_FAILED_ID: &str = "runtime.resource_failed";
/// Id of the resource dispose failure event.
pub const DISPOSE_FAILED_ID: &str = "runtime.dispose_failed";

/// Tag marking events that wildcard hooks must not observe.
///
/// Attachable to application events as well.
pub static NO_WILDCARD: LazyLock<Arc<TagDef>> = LazyLock::new(|| TagDef::new(NO_WILDCARD_ID));

fn lifecycle_event(id: &'static str) -> Arc<EventDef> {
    EventDef::new(id).with_tags([TagRef::new(NO_WILDCARD_ID)])
}

/// Fired after a task's middleware onion resolves; payload [`RunOutput`].
pub static TASK_AFTER_RUN: LazyLock<Arc<EventDef>> =
    LazyLock::new(|| lifecycle_event(TASK_AFTER_RUN_ID));

/// Fired when a task's onion rejects; payload [`RunFailure`].
pub static TASK_FAILED: LazyLock<Arc<EventDef>> =
    LazyLock::new(|| lifecycle_event(TASK_FAILED_ID));

/// Fired after a resource's init resolves; payload [`RunOutput`].
pub static RESOURCE_READY: LazyLock<Arc<EventDef>> =
    LazyLock::new(|| lifecycle_event(RESOURCE_READY_ID));

/// Fired when a resource's init rejects; payload [`RunFailure`].
pub static RESOURCE_FAILED: LazyLock<Arc<EventDef>> =
    LazyLock::new(|| lifecycle_event(RESOURCE_FAILED_ID));

/// Fired when a resource's dispose hook rejects; payload [`RunFailure`].
pub static DISPOSE_FAILED: LazyLock<Arc<EventDef>> =
    LazyLock::new(|| lifecycle_event(DISPOSE_FAILED_ID));

/// Payload of after-run and resource-ready emissions.
///
/// Carries the produced value; any listener may replace it through
/// [`set_output`](RunOutput::set_output). The value after delivery —
/// mutated or original — is what the caller receives.
pub struct RunOutput {
    /// Id of the task or resource that produced the value.
    pub target: Id,
    slot: Mutex<Dynamic>,
}

impl RunOutput {
    pub(crate) fn new(target: Id, value: Dynamic) -> Arc<Self> {
        Arc::new(Self {
            target,
            slot: Mutex::new(value),
        })
    }

    /// The current value (original, or the latest mutation).
    pub fn value(&self) -> Dynamic {
        self.slot.lock().clone()
    }

    /// Replaces the value the caller will receive. Last call wins.
    pub fn set_output(&self, value: Dynamic) {
        *self.slot.lock() = value;
    }

    /// Extracts this payload from an emission.
    pub fn from_emission(emission: &Emission) -> Option<Arc<Self>> {
        emission.data_as::<Self>()
    }
}

/// Payload of failure emissions.
///
/// Carries the error message; any listener may call
/// [`suppress`](RunFailure::suppress), in which case the failure is
/// swallowed and the caller receives no value instead of an error.
pub struct RunFailure {
    /// Id of the task or resource whose body failed.
    pub target: Id,
    /// Stable label of the underlying error.
    pub label: &'static str,
    /// The underlying error message.
    pub error: String,
    suppressed: AtomicBool,
}

impl RunFailure {
    pub(crate) fn new(target: Id, label: &'static str, error: String) -> Arc<Self> {
        Arc::new(Self {
            target,
            label,
            error,
            suppressed: AtomicBool::new(false),
        })
    }

    /// Swallows the failure for the original caller.
    pub fn suppress(&self) {
        self.suppressed.store(true, AtomicOrdering::SeqCst);
    }

    pub(crate) fn is_suppressed(&self) -> bool {
        self.suppressed.load(AtomicOrdering::SeqCst)
    }

    /// Extracts this payload from an emission.
    pub fn from_emission(emission: &Emission) -> Option<Arc<Self>> {
        emission.data_as::<Self>()
    }
}

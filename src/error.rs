//! Error types used by the taskwire runtime.
//!
//! This module defines two main error enums:
//!
//! - [`BuildError`] — configuration and structural errors raised while the
//!   orchestrator assembles a runtime (registration, overrides, graph,
//!   cycle detection, initialization).
//! - [`CallError`] — errors raised by individual invocations once a
//!   runtime exists (task calls, emissions, value lookups, disposal).
//!
//! Both types provide helper methods (`as_label`, `as_message`) for
//! logging/metrics.

use thiserror::Error;

use crate::def::{DefKind, Id};

/// # Errors produced while assembling a runtime.
///
/// All of these surface from [`run`](crate::run) before any task body
/// executes; a runtime is never handed out half-built.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BuildError {
    /// Two definitions were registered under the same id.
    #[error("id '{id}' is already registered as a {kind}")]
    Duplicate {
        /// The colliding identifier.
        id: Id,
        /// Kind of the definition registered first.
        kind: DefKind,
    },

    /// An override targets an id that was never registered.
    #[error("override target '{id}' was never registered")]
    OverrideTargetMissing {
        /// The id the override tried to replace.
        id: Id,
    },

    /// An override's kind does not match the kind registered under its id.
    #[error("override for '{id}' is a {found}, but the registered definition is a {expected}")]
    OverrideKindMismatch {
        /// The id being overridden.
        id: Id,
        /// Kind of the registered definition.
        expected: DefKind,
        /// Kind of the override.
        found: DefKind,
    },

    /// A non-optional dependency names an id that was never registered.
    #[error("'{requester}' depends on '{missing}', which was never registered")]
    DependencyNotFound {
        /// The definition declaring the dependency.
        requester: Id,
        /// The id it asked for.
        missing: Id,
    },

    /// The dependency graph contains one or more reference cycles.
    ///
    /// Every participating id is listed, per cycle, in traversal order.
    #[error("{}", render_cycles(cycles))]
    CycleDetected {
        /// Each inner vector is one independent cycle, ids in traversal
        /// order (the first id closes the loop).
        cycles: Vec<Vec<Id>>,
    },

    /// A mutation was attempted after the registry was locked.
    #[error("registry is locked; cannot {operation}")]
    Locked {
        /// Description of the rejected operation.
        operation: &'static str,
    },

    /// A resource's init hook failed and no listener suppressed the error.
    #[error("resource '{id}' failed to initialize: {source}")]
    ResourceInit {
        /// The failing resource.
        id: Id,
        /// The underlying invocation error.
        #[source]
        source: Box<CallError>,
    },
}

impl BuildError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use taskwire::{BuildError, Id};
    ///
    /// let err = BuildError::OverrideTargetMissing { id: Id::new("db") };
    /// assert_eq!(err.as_label(), "build_override_target_missing");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BuildError::Duplicate { .. } => "build_duplicate_id",
            BuildError::OverrideTargetMissing { .. } => "build_override_target_missing",
            BuildError::OverrideKindMismatch { .. } => "build_override_kind_mismatch",
            BuildError::DependencyNotFound { .. } => "build_dependency_not_found",
            BuildError::CycleDetected { .. } => "build_cycle_detected",
            BuildError::Locked { .. } => "build_locked",
            BuildError::ResourceInit { .. } => "build_resource_init",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }
}

fn render_cycles(cycles: &[Vec<Id>]) -> String {
    let mut out = String::from("dependency cycle detected: ");
    for (i, cycle) in cycles.iter().enumerate() {
        if i > 0 {
            out.push_str("; ");
        }
        for id in cycle {
            out.push_str(id.as_str());
            out.push_str(" -> ");
        }
        if let Some(first) = cycle.first() {
            out.push_str(first.as_str());
        }
    }
    out.push_str(
        ". Avoid depending on resources that use the same middleware; \
         consider events for decoupling.",
    );
    out
}

/// # Errors produced by invocations against a running (or disposing) tree.
///
/// `Clone` is derived so a disposal outcome can be shared between
/// concurrent `dispose()` callers.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum CallError {
    /// The named definition does not exist in this runtime.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Kind that was looked up.
        kind: DefKind,
        /// The unknown id.
        id: Id,
    },

    /// An input, result, config, or payload validator rejected a value.
    #[error("validation failed for '{id}': {message}")]
    Validation {
        /// The definition whose validator rejected.
        id: Id,
        /// The validator's message.
        message: String,
    },

    /// A task, resource, hook, or middleware body failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// An emission re-entered an event already in flight on the same
    /// call stack.
    #[error("emission cycle: event '{id}' is already in flight ({})", render_stack(stack))]
    EmissionCycle {
        /// The re-entered event id.
        id: Id,
        /// In-flight event ids, outermost first.
        stack: Vec<Id>,
    },

    /// Nested emissions exceeded the configured depth limit.
    #[error("emission depth limit of {limit} exceeded by event '{id}'")]
    EmissionDepth {
        /// The event that tripped the limit.
        id: Id,
        /// The configured limit.
        limit: usize,
    },

    /// A resource value was read before its init completed.
    #[error("resource '{id}' is not initialized yet")]
    NotReady {
        /// The resource in question.
        id: Id,
    },

    /// The operation is not available in this context.
    #[error("'{id}' does not support {operation} in this context")]
    Unsupported {
        /// The definition the operation was attempted on.
        id: Id,
        /// Description of the rejected operation.
        operation: &'static str,
    },

    /// Interceptor installation was attempted after the runtime locked.
    #[error("runtime is locked; cannot {operation}")]
    Locked {
        /// Description of the rejected operation.
        operation: &'static str,
    },

    /// The call observed cancellation and stopped cooperatively.
    #[error("context cancelled")]
    Canceled,

    /// The run handle was already disposed.
    #[error("runtime is disposed")]
    Disposed,

    /// One or more resources failed to dispose.
    ///
    /// The handle stays retryable; a later `dispose()` runs the full
    /// teardown again, skipping resources that already succeeded.
    #[error("disposal failed for {} resource(s): {}", failures.len(), render_failures(failures))]
    Disposal {
        /// `(resource id, error message)` per failed dispose hook.
        failures: Vec<(Id, String)>,
    },
}

impl CallError {
    /// Shorthand for an application failure with the given message.
    #[inline]
    pub fn fail(error: impl Into<String>) -> Self {
        CallError::Fail { error: error.into() }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use taskwire::CallError;
    ///
    /// let err = CallError::fail("boom");
    /// assert_eq!(err.as_label(), "call_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            CallError::NotFound { .. } => "call_not_found",
            CallError::Validation { .. } => "call_validation",
            CallError::Fail { .. } => "call_failed",
            CallError::EmissionCycle { .. } => "call_emission_cycle",
            CallError::EmissionDepth { .. } => "call_emission_depth",
            CallError::NotReady { .. } => "call_not_ready",
            CallError::Unsupported { .. } => "call_unsupported",
            CallError::Locked { .. } => "call_locked",
            CallError::Canceled => "call_canceled",
            CallError::Disposed => "call_disposed",
            CallError::Disposal { .. } => "call_disposal",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }
}

fn render_stack(stack: &[Id]) -> String {
    stack
        .iter()
        .map(Id::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn render_failures(failures: &[(Id, String)]) -> String {
    failures
        .iter()
        .map(|(id, msg)| format!("{id}: {msg}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_every_participant() {
        let err = BuildError::CycleDetected {
            cycles: vec![vec![Id::new("a"), Id::new("b"), Id::new("c")]],
        };
        let msg = err.as_message();
        assert!(msg.contains("a -> b -> c -> a"), "got: {msg}");
        assert!(msg.contains("consider events"), "guidance missing: {msg}");
    }

    #[test]
    fn test_labels_are_stable() {
        let err = CallError::NotFound {
            kind: DefKind::Task,
            id: Id::new("missing"),
        };
        assert_eq!(err.as_label(), "call_not_found");

        let err = BuildError::CycleDetected { cycles: vec![] };
        assert_eq!(err.as_label(), "build_cycle_detected");
    }

    #[test]
    fn test_emission_cycle_renders_stack() {
        let err = CallError::EmissionCycle {
            id: Id::new("ping"),
            stack: vec![Id::new("ping"), Id::new("pong")],
        };
        assert!(err.as_message().contains("ping -> pong"));
    }

    #[test]
    fn test_disposal_lists_each_failure() {
        let err = CallError::Disposal {
            failures: vec![
                (Id::new("db"), "socket closed".into()),
                (Id::new("cache"), "flush failed".into()),
            ],
        };
        let msg = err.as_message();
        assert!(msg.contains("db: socket closed"), "got: {msg}");
        assert!(msg.contains("cache: flush failed"), "got: {msg}");
    }
}

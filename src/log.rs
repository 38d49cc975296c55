//! # Simple logging hook for debugging and demos.
//!
//! [`log_writer`] builds a wildcard hook printing every emission to
//! stdout in a human-readable format. Primarily useful for development,
//! debugging, and examples.
//!
//! ## Output format
//! ```text
//! [emit] event=user.created seq=17 source=signup
//! [emit] event=cache.warmed seq=18
//! ```
//!
//! Not intended for production use - install custom hooks for structured
//! logging or metrics collection. Lifecycle events do not appear here:
//! they carry the skip-wildcard tag.

use std::sync::Arc;

use crate::def::HookDef;

/// Builds the stdout logging hook.
///
/// Enabled via the `logging` feature. Register it like any other hook,
/// typically from the root resource's registration list. It runs before
/// other wildcard hooks (lowest order).
pub fn log_writer() -> Arc<HookDef> {
    HookDef::on_all(|emission, _ctx| async move {
        match &emission.source {
            Some(source) => println!(
                "[emit] event={} seq={} source={}",
                emission.event, emission.seq, source
            ),
            None => println!("[emit] event={} seq={}", emission.event, emission.seq),
        }
        Ok(())
    })
    .with_id("runtime.log_writer")
    .with_order(i32::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::HookTarget;

    #[test]
    fn test_log_writer_is_wildcard_and_first() {
        let hook = log_writer();
        assert!(matches!(hook.target(), HookTarget::AllEvents));
        assert_eq!(hook.order(), i32::MIN);
        assert_eq!(hook.id().as_str(), "runtime.log_writer");
    }
}

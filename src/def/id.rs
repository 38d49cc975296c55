//! # Stable identifiers for definitions.
//!
//! Every definition is keyed by an [`Id`]: a cheap, cloneable string
//! newtype. Ids are unique across kinds within one registry — a task and
//! an event cannot share an id.
//!
//! Anonymous definitions receive a generated id from a process-wide
//! counter. Generated ids exist for diagnostics only; nothing compares
//! them beyond identity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Process-wide counter backing anonymous ids.
static ANON_SEQ: AtomicU64 = AtomicU64::new(0);

/// Definition kind, used for diagnostics and registry indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefKind {
    /// A callable unit of work.
    Task,
    /// A singleton with an init/dispose lifecycle.
    Resource,
    /// A typed notification.
    Event,
    /// A listener bound to one event id or to all events.
    Hook,
    /// A wrapper composable around task and resource execution.
    Middleware,
    /// A label attachable to any definition.
    Tag,
}

impl DefKind {
    /// Returns a short stable label (snake_case) for logs and ids.
    pub fn as_label(&self) -> &'static str {
        match self {
            DefKind::Task => "task",
            DefKind::Resource => "resource",
            DefKind::Event => "event",
            DefKind::Hook => "hook",
            DefKind::Middleware => "middleware",
            DefKind::Tag => "tag",
        }
    }
}

impl fmt::Display for DefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Stable definition identifier.
///
/// Cloning is an `Arc` bump. Construct explicitly with [`Id::new`] or let
/// a definition generate an anonymous one.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(Arc<str>);

impl Id {
    /// Creates an id from any string-like value.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Generates a unique anonymous id for the given kind.
    ///
    /// The counter is global and monotonic; the produced id looks like
    /// `task#42` and is meant for diagnostics, not for lookup by hand.
    pub fn anonymous(kind: DefKind) -> Self {
        let n = ANON_SEQ.fetch_add(1, AtomicOrdering::Relaxed);
        Self(format!("{}#{}", kind.as_label(), n).into())
    }

    /// Returns the id as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.0)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::new(s)
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::new(s)
    }
}

impl From<&Id> for Id {
    fn from(id: &Id) -> Self {
        id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_ids_are_unique() {
        let a = Id::anonymous(DefKind::Task);
        let b = Id::anonymous(DefKind::Task);
        assert_ne!(a, b);
    }

    #[test]
    fn test_anonymous_ids_carry_kind() {
        let id = Id::anonymous(DefKind::Hook);
        assert!(id.as_str().starts_with("hook#"), "got: {id}");
    }

    #[test]
    fn test_display_and_equality() {
        let a = Id::new("cache");
        let b: Id = "cache".into();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "cache");
    }
}

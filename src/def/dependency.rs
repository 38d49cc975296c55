//! # Declarative dependency references.
//!
//! A definition declares what it needs as a [`DependencyMap`]: an ordered
//! list of named [`DependencyRef`] entries. Each entry is a tagged variant
//! naming a task, resource, event, or tag, optionally wrapped as optional.
//! The resolver later substitutes each entry with the concrete value the
//! body receives (handle, value, emitter, accessor, or absent).
//!
//! The map is either static or produced by a function of the declaring
//! definition's captured configuration.

use std::fmt;
use std::sync::Arc;

use crate::dynamic::Dynamic;

use super::id::Id;

/// A single declared dependency.
///
/// `Optional` wraps any inner variant; resolving an optional entry whose
/// target was never registered yields an absent value instead of an error.
#[derive(Clone)]
pub enum DependencyRef {
    /// Call the named task.
    Task(Id),
    /// Read the named resource's value.
    Resource(Id),
    /// Emit the named event.
    Event(Id),
    /// Access everything carrying the named tag.
    Tag(Id),
    /// Same as the inner variant, or absent when unregistered.
    Optional(Box<DependencyRef>),
}

impl DependencyRef {
    /// Wraps this reference as optional.
    ///
    /// Wrapping an already-optional reference is a no-op.
    pub fn optional(self) -> Self {
        match self {
            DependencyRef::Optional(_) => self,
            other => DependencyRef::Optional(Box::new(other)),
        }
    }

    /// Returns the referenced id, unwrapping the optional wrapper.
    pub fn target(&self) -> &Id {
        match self {
            DependencyRef::Task(id)
            | DependencyRef::Resource(id)
            | DependencyRef::Event(id)
            | DependencyRef::Tag(id) => id,
            DependencyRef::Optional(inner) => inner.target(),
        }
    }

    /// True when this reference is wrapped optional.
    #[inline]
    pub fn is_optional(&self) -> bool {
        matches!(self, DependencyRef::Optional(_))
    }

    /// Returns the inner reference, unwrapping the optional wrapper.
    pub fn unwrapped(&self) -> &DependencyRef {
        match self {
            DependencyRef::Optional(inner) => inner.unwrapped(),
            other => other,
        }
    }
}

impl fmt::Debug for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyRef::Task(id) => write!(f, "task({id})"),
            DependencyRef::Resource(id) => write!(f, "resource({id})"),
            DependencyRef::Event(id) => write!(f, "event({id})"),
            DependencyRef::Tag(id) => write!(f, "tag({id})"),
            DependencyRef::Optional(inner) => write!(f, "optional({inner:?})"),
        }
    }
}

/// Insertion-ordered map of named dependencies.
///
/// Entry order is preserved; resolution and graph construction walk it in
/// declaration order, which keeps every downstream ordering deterministic.
#[derive(Clone, Default)]
pub struct DependencyMap {
    entries: Vec<(Arc<str>, DependencyRef)>,
}

impl DependencyMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a named entry, builder style.
    pub fn with(mut self, name: impl Into<Arc<str>>, dep: DependencyRef) -> Self {
        self.entries.push((name.into(), dep));
        self
    }

    /// Iterates entries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DependencyRef)> {
        self.entries.iter().map(|(n, d)| (n.as_ref(), d))
    }

    /// Number of declared entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are declared.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How a definition declares its dependencies.
///
/// The function form receives the definition's captured configuration
/// (resources and middleware only; `None` elsewhere) and is evaluated
/// once, during the resolve phase.
#[derive(Clone)]
pub enum DependencySpec {
    /// A fixed map, known at declaration time.
    Static(DependencyMap),
    /// A map computed from the captured configuration.
    FromConfig(Arc<dyn Fn(Option<&Dynamic>) -> DependencyMap + Send + Sync>),
}

impl DependencySpec {
    /// Evaluates the spec against the captured configuration.
    pub fn evaluate(&self, config: Option<&Dynamic>) -> DependencyMap {
        match self {
            DependencySpec::Static(map) => map.clone(),
            DependencySpec::FromConfig(f) => f(config),
        }
    }
}

impl Default for DependencySpec {
    fn default() -> Self {
        DependencySpec::Static(DependencyMap::new())
    }
}

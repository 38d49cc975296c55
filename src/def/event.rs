//! # Event definitions.
//!
//! An event is a typed notification: zero or more hooks listen for it,
//! and any definition depending on it receives an emitter. The optional
//! payload validator runs on every emission before delivery.

use std::sync::Arc;

use crate::validate::Validator;

use super::dependency::DependencyRef;
use super::id::{DefKind, Id};
use super::tag::TagRef;

/// Declaration of an event.
pub struct EventDef {
    id: Id,
    tags: Vec<TagRef>,
    payload_validator: Option<Arc<dyn Validator>>,
}

impl EventDef {
    /// Declares an event with the given id.
    pub fn new(id: impl Into<Id>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            tags: Vec::new(),
            payload_validator: None,
        })
    }

    /// Declares an event with a generated anonymous id.
    pub fn anonymous() -> Arc<Self> {
        Self::new(Id::anonymous(DefKind::Event))
    }

    /// Attaches tags.
    pub fn with_tags(self: Arc<Self>, tags: impl IntoIterator<Item = TagRef>) -> Arc<Self> {
        let collected: Vec<TagRef> = tags.into_iter().collect();
        Arc::new(Self {
            id: self.id.clone(),
            tags: collected,
            payload_validator: self.payload_validator.clone(),
        })
    }

    /// Sets the payload validator (runs on every emission).
    pub fn with_payload_validator(self: Arc<Self>, v: Arc<dyn Validator>) -> Arc<Self> {
        Arc::new(Self {
            id: self.id.clone(),
            tags: self.tags.clone(),
            payload_validator: Some(v),
        })
    }

    /// The event's id.
    #[inline]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// A dependency reference on this event.
    pub fn as_dep(&self) -> DependencyRef {
        DependencyRef::Event(self.id.clone())
    }

    pub(crate) fn tags(&self) -> &[TagRef] {
        &self.tags
    }

    pub(crate) fn payload_validator(&self) -> Option<&Arc<dyn Validator>> {
        self.payload_validator.as_ref()
    }

    pub(crate) fn carries_tag(&self, tag: &Id) -> bool {
        self.tags.iter().any(|t| &t.id == tag)
    }
}

impl From<&EventDef> for Id {
    fn from(def: &EventDef) -> Self {
        def.id.clone()
    }
}

impl From<&Arc<EventDef>> for Id {
    fn from(def: &Arc<EventDef>) -> Self {
        def.id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_carries_tag() {
        let ev = EventDef::new("user.created").with_tags([TagRef::new("audited")]);
        assert!(ev.carries_tag(&Id::new("audited")));
        assert!(!ev.carries_tag(&Id::new("other")));
    }
}

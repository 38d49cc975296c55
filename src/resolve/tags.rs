//! # Tag accessors.
//!
//! A definition depending on a tag receives a [`TagAccessor`]: a
//! read-only snapshot of every registered definition carrying the tag at
//! resolve time, grouped by kind, each paired with its attachment
//! configuration. The snapshot respects registration visibility — items
//! registered non-exported are hidden from accessors requested outside
//! the registering resource's subtree — and never includes the
//! requesting definition itself.

use std::sync::Arc;

use crate::def::{DefKind, Id};
use crate::dynamic::Dynamic;

use super::materialize::{EventEmitter, ResourceSlot, TaskHandle};

/// Invocable handle for one tagged member, where the kind supports one.
#[derive(Clone)]
enum TaggedHandle {
    Task(TaskHandle),
    Resource(ResourceSlot),
    Event(EventEmitter),
    /// Hooks, middleware: enumerable but not directly invocable.
    Inert,
}

/// One member of a tag accessor's snapshot.
#[derive(Clone)]
pub struct TaggedEntry {
    /// The member's id.
    pub id: Id,
    /// The member's kind.
    pub kind: DefKind,
    /// The tag attachment's configuration, if any.
    pub config: Option<Dynamic>,
    handle: TaggedHandle,
}

impl TaggedEntry {
    pub(crate) fn task(id: Id, config: Option<Dynamic>, handle: TaskHandle) -> Self {
        Self {
            id,
            kind: DefKind::Task,
            config,
            handle: TaggedHandle::Task(handle),
        }
    }

    pub(crate) fn resource(id: Id, config: Option<Dynamic>, slot: ResourceSlot) -> Self {
        Self {
            id,
            kind: DefKind::Resource,
            config,
            handle: TaggedHandle::Resource(slot),
        }
    }

    pub(crate) fn event(id: Id, config: Option<Dynamic>, emitter: EventEmitter) -> Self {
        Self {
            id,
            kind: DefKind::Event,
            config,
            handle: TaggedHandle::Event(emitter),
        }
    }

    pub(crate) fn inert(id: Id, kind: DefKind, config: Option<Dynamic>) -> Self {
        Self {
            id,
            kind,
            config,
            handle: TaggedHandle::Inert,
        }
    }

    /// The member as an invocable task handle, if it is a task.
    pub fn as_task(&self) -> Option<&TaskHandle> {
        match &self.handle {
            TaggedHandle::Task(handle) => Some(handle),
            _ => None,
        }
    }

    /// The member as a resource slot, if it is a resource.
    pub fn as_resource(&self) -> Option<&ResourceSlot> {
        match &self.handle {
            TaggedHandle::Resource(slot) => Some(slot),
            _ => None,
        }
    }

    /// The member as an event emitter, if it is an event.
    pub fn as_event(&self) -> Option<&EventEmitter> {
        match &self.handle {
            TaggedHandle::Event(emitter) => Some(emitter),
            _ => None,
        }
    }
}

/// Read-only snapshot of everything carrying one tag.
#[derive(Clone)]
pub struct TagAccessor {
    tag: Id,
    entries: Arc<Vec<TaggedEntry>>,
}

impl TagAccessor {
    pub(crate) fn new(tag: Id, entries: Vec<TaggedEntry>) -> Self {
        Self {
            tag,
            entries: Arc::new(entries),
        }
    }

    /// The tag this accessor snapshots.
    #[inline]
    pub fn tag(&self) -> &Id {
        &self.tag
    }

    /// All visible members, in registration order.
    pub fn entries(&self) -> &[TaggedEntry] {
        &self.entries
    }

    /// Member ids, in registration order.
    pub fn ids(&self) -> Vec<Id> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    /// Number of visible members.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing visible carries the tag.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Handles for all tagged tasks.
    pub fn tasks(&self) -> Vec<TaskHandle> {
        self.entries
            .iter()
            .filter_map(|e| e.as_task().cloned())
            .collect()
    }

    /// Slots for all tagged resources.
    pub fn resources(&self) -> Vec<ResourceSlot> {
        self.entries
            .iter()
            .filter_map(|e| e.as_resource().cloned())
            .collect()
    }

    /// Emitters for all tagged events.
    pub fn emitters(&self) -> Vec<EventEmitter> {
        self.entries
            .iter()
            .filter_map(|e| e.as_event().cloned())
            .collect()
    }

    /// A narrowed accessor keeping only members whose attachment
    /// configuration satisfies `pred`.
    pub fn filtered(&self, pred: impl Fn(Option<&Dynamic>) -> bool) -> TagAccessor {
        let entries = self
            .entries
            .iter()
            .filter(|e| pred(e.config.as_ref()))
            .cloned()
            .collect();
        TagAccessor::new(self.tag.clone(), entries)
    }
}

//! # Definitions: the declarative surface of the runtime.
//!
//! Applications declare six kinds of immutable definitions — tasks,
//! resources, events, hooks, middleware, and tags — each identified by a
//! stable [`Id`] and carrying a declarative [`DependencyMap`]. The
//! orchestrator registers them, resolves the graph, and executes them;
//! definitions themselves hold no runtime state.

mod dependency;
mod event;
mod hook;
mod id;
mod middleware;
mod resource;
mod tag;
mod task;

pub use dependency::{DependencyMap, DependencyRef, DependencySpec};
pub use event::EventDef;
pub use hook::{HookContext, HookDef, HookTarget};
pub use id::{DefKind, Id};
pub use middleware::{
    Everywhere, MiddlewareContext, MiddlewareDef, MiddlewareRef, Next, PipelineKind,
};
pub use resource::{RegisterItem, RegisterSpec, ResourceContext, ResourceDef};
pub use tag::{TagDef, TagRef};
pub use task::{TaskContext, TaskDef, TaskLogic};

use std::sync::Arc;

/// Any definition, as stored in registration lists and override lists.
#[derive(Clone)]
pub enum Definition {
    /// A callable unit of work.
    Task(Arc<TaskDef>),
    /// A singleton with init/dispose lifecycle.
    Resource(Arc<ResourceDef>),
    /// A typed notification.
    Event(Arc<EventDef>),
    /// An event listener.
    Hook(Arc<HookDef>),
    /// A composable execution wrapper.
    Middleware(Arc<MiddlewareDef>),
    /// An attachable label.
    Tag(Arc<TagDef>),
}

impl Definition {
    /// The definition's kind.
    pub fn kind(&self) -> DefKind {
        match self {
            Definition::Task(_) => DefKind::Task,
            Definition::Resource(_) => DefKind::Resource,
            Definition::Event(_) => DefKind::Event,
            Definition::Hook(_) => DefKind::Hook,
            Definition::Middleware(_) => DefKind::Middleware,
            Definition::Tag(_) => DefKind::Tag,
        }
    }

    /// The definition's id.
    pub fn id(&self) -> &Id {
        match self {
            Definition::Task(d) => d.id(),
            Definition::Resource(d) => d.id(),
            Definition::Event(d) => d.id(),
            Definition::Hook(d) => d.id(),
            Definition::Middleware(d) => d.id(),
            Definition::Tag(d) => d.id(),
        }
    }

    /// The definition's tag attachments.
    pub(crate) fn tags(&self) -> &[TagRef] {
        match self {
            Definition::Task(d) => d.tags(),
            Definition::Resource(d) => d.tags(),
            Definition::Event(d) => d.tags(),
            Definition::Hook(d) => d.tags(),
            Definition::Middleware(d) => d.tags(),
            Definition::Tag(_) => &[],
        }
    }
}

impl From<Arc<TaskDef>> for Definition {
    fn from(def: Arc<TaskDef>) -> Self {
        Definition::Task(def)
    }
}

impl From<Arc<ResourceDef>> for Definition {
    fn from(def: Arc<ResourceDef>) -> Self {
        Definition::Resource(def)
    }
}

impl From<Arc<EventDef>> for Definition {
    fn from(def: Arc<EventDef>) -> Self {
        Definition::Event(def)
    }
}

impl From<Arc<HookDef>> for Definition {
    fn from(def: Arc<HookDef>) -> Self {
        Definition::Hook(def)
    }
}

impl From<Arc<MiddlewareDef>> for Definition {
    fn from(def: Arc<MiddlewareDef>) -> Self {
        Definition::Middleware(def)
    }
}

impl From<Arc<TagDef>> for Definition {
    fn from(def: Arc<TagDef>) -> Self {
        Definition::Tag(def)
    }
}

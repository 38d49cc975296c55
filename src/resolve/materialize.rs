//! # Materialized dependency values.
//!
//! The resolver turns each declared dependency entry into the concrete
//! value a body receives:
//!
//! | declared          | received                         |
//! |-------------------|----------------------------------|
//! | task              | [`TaskHandle`] (invocable proxy) |
//! | resource          | [`ResourceSlot`] (value access)  |
//! | event             | [`EventEmitter`]                 |
//! | tag               | [`TagAccessor`]                  |
//! | optional, missing | [`Resolved::Absent`]             |
//!
//! Handles hold a weak reference to the runtime; calls through a handle
//! that outlived its runtime fail with a disposed error.

use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::def::{DefKind, Id};
use crate::dynamic::{downcast, Dynamic};
use crate::error::CallError;
use crate::events::emit_event;
use crate::pipeline;
use crate::runtime::RuntimeShared;

use super::tags::TagAccessor;

/// Invocation of a task, as seen by local interception layers.
pub type TaskInvoke = Arc<
    dyn Fn(Option<Dynamic>) -> BoxFuture<'static, Result<Option<Dynamic>, CallError>>
        + Send
        + Sync,
>;

/// One local interception layer around a task handle.
pub type InterceptLayer = Arc<
    dyn Fn(TaskInvoke, Option<Dynamic>) -> BoxFuture<'static, Result<Option<Dynamic>, CallError>>
        + Send
        + Sync,
>;

/// Invocable proxy for a task dependency.
///
/// A handle materialized into a *resource's* context additionally
/// supports [`intercept`](TaskHandle::intercept): the resource wraps
/// calls made through this handle without installing global middleware.
#[derive(Clone)]
pub struct TaskHandle {
    shared: Weak<RuntimeShared>,
    id: Id,
    layers: Option<Arc<Mutex<Vec<InterceptLayer>>>>,
}

impl TaskHandle {
    pub(crate) fn new(shared: Weak<RuntimeShared>, id: Id, interceptable: bool) -> Self {
        Self {
            shared,
            id,
            layers: interceptable.then(|| Arc::new(Mutex::new(Vec::new()))),
        }
    }

    /// The target task's id.
    #[inline]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Runs the task through its full pipeline (middleware, validators,
    /// lifecycle events) plus any local interception layers.
    pub async fn call(&self, input: Option<Dynamic>) -> Result<Option<Dynamic>, CallError> {
        let shared = self.shared.upgrade().ok_or(CallError::Disposed)?;
        let cancel = shared.cancel.child_token();

        let id = self.id.clone();
        let base_shared = Arc::clone(&shared);
        let mut invoke: TaskInvoke = Arc::new(move |input: Option<Dynamic>| {
            let shared = Arc::clone(&base_shared);
            let id = id.clone();
            let cancel = cancel.clone();
            Box::pin(pipeline::invoke_task(shared, id, input, cancel))
        });

        if let Some(layers) = &self.layers {
            let layers: Vec<InterceptLayer> = layers.lock().clone();
            // First installed layer is outermost.
            for layer in layers.into_iter().rev() {
                let inner = Arc::clone(&invoke);
                invoke = Arc::new(move |input: Option<Dynamic>| layer(Arc::clone(&inner), input));
            }
        }

        invoke(input).await
    }

    /// Installs a local interception layer around calls made through
    /// this handle.
    ///
    /// Only available on handles materialized into a resource context,
    /// and only until the runtime locks.
    pub fn intercept<F, Fut>(&self, f: F) -> Result<(), CallError>
    where
        F: Fn(TaskInvoke, Option<Dynamic>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Option<Dynamic>, CallError>> + Send + 'static,
    {
        let layers = self.layers.as_ref().ok_or(CallError::Unsupported {
            id: self.id.clone(),
            operation: "local interception",
        })?;
        let shared = self.shared.upgrade().ok_or(CallError::Disposed)?;
        if shared.dispatcher.is_locked() {
            return Err(CallError::Locked {
                operation: "install a local task interceptor",
            });
        }
        layers
            .lock()
            .push(Arc::new(move |next, input| Box::pin(f(next, input))));
        Ok(())
    }
}

/// Accessor for a resource dependency's resolved value.
///
/// Values are filled during the sequential init phase and are immutable
/// afterwards; reading before init completes fails with a not-ready
/// error (possible only for hooks firing mid-initialization).
#[derive(Clone)]
pub struct ResourceSlot {
    shared: Weak<RuntimeShared>,
    id: Id,
}

impl ResourceSlot {
    pub(crate) fn new(shared: Weak<RuntimeShared>, id: Id) -> Self {
        Self { shared, id }
    }

    /// The target resource's id.
    #[inline]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// The resource's resolved value.
    pub fn value(&self) -> Result<Dynamic, CallError> {
        let shared = self.shared.upgrade().ok_or(CallError::Disposed)?;
        let registry = shared.registry.read();
        let entry = registry.resource(&self.id).ok_or_else(|| CallError::NotFound {
            kind: DefKind::Resource,
            id: self.id.clone(),
        })?;
        entry.value.clone().ok_or_else(|| CallError::NotReady {
            id: self.id.clone(),
        })
    }

    /// The resolved value, downcast to `T`.
    pub fn value_as<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, CallError> {
        let value = self.value()?;
        downcast::<T>(value).ok_or_else(|| {
            CallError::fail(format!(
                "resource '{}' holds a different type than requested",
                self.id
            ))
        })
    }

    /// The resource's captured configuration.
    pub fn config(&self) -> Result<Option<Dynamic>, CallError> {
        let shared = self.shared.upgrade().ok_or(CallError::Disposed)?;
        let registry = shared.registry.read();
        let entry = registry.resource(&self.id).ok_or_else(|| CallError::NotFound {
            kind: DefKind::Resource,
            id: self.id.clone(),
        })?;
        Ok(entry.def.config().cloned())
    }
}

/// Emit function for an event dependency.
#[derive(Clone)]
pub struct EventEmitter {
    shared: Weak<RuntimeShared>,
    id: Id,
    source: Option<Id>,
}

impl EventEmitter {
    pub(crate) fn new(shared: Weak<RuntimeShared>, id: Id, source: Option<Id>) -> Self {
        Self { shared, id, source }
    }

    /// The target event's id.
    #[inline]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Emits the event to all matching listeners.
    ///
    /// The payload runs through the event's validator first; listener
    /// errors propagate back to this caller.
    pub async fn emit(&self, payload: Option<Dynamic>) -> Result<(), CallError> {
        let shared = self.shared.upgrade().ok_or(CallError::Disposed)?;
        emit_event(shared, self.id.clone(), payload, self.source.clone()).await
    }
}

/// One resolved dependency value.
#[derive(Clone)]
pub enum Resolved {
    /// An invocable task proxy.
    Task(TaskHandle),
    /// A resource value accessor.
    Resource(ResourceSlot),
    /// An event emitter.
    Event(EventEmitter),
    /// A tag accessor snapshot.
    Tag(TagAccessor),
    /// An optional dependency whose target was never registered.
    Absent,
}

/// A definition's resolved dependency set, keyed by declared name.
///
/// Cheap to clone; computed once per definition during the resolve
/// phase and immutable afterwards.
#[derive(Clone)]
pub struct ResolvedDeps {
    entries: Arc<Vec<(Arc<str>, Resolved)>>,
}

impl ResolvedDeps {
    pub(crate) fn from_entries(entries: Vec<(Arc<str>, Resolved)>) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }

    /// An empty set, for definitions declaring no dependencies.
    pub fn empty() -> Self {
        Self::from_entries(Vec::new())
    }

    /// The raw resolved entry, if declared.
    pub fn get(&self, name: &str) -> Option<&Resolved> {
        self.entries
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .map(|(_, r)| r)
    }

    /// True when the entry was declared optional and its target missing.
    pub fn is_absent(&self, name: &str) -> bool {
        matches!(self.get(name), Some(Resolved::Absent))
    }

    /// The task handle declared under `name`.
    pub fn task(&self, name: &str) -> Result<TaskHandle, CallError> {
        match self.get(name) {
            Some(Resolved::Task(handle)) => Ok(handle.clone()),
            Some(Resolved::Absent) => Err(CallError::fail(format!(
                "optional dependency '{name}' is absent"
            ))),
            _ => Err(CallError::fail(format!("no task dependency named '{name}'"))),
        }
    }

    /// The task handle declared under `name`, or `None` when absent.
    pub fn maybe_task(&self, name: &str) -> Option<TaskHandle> {
        match self.get(name) {
            Some(Resolved::Task(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    /// The resolved value of the resource declared under `name`.
    pub fn resource(&self, name: &str) -> Result<Dynamic, CallError> {
        match self.get(name) {
            Some(Resolved::Resource(slot)) => slot.value(),
            Some(Resolved::Absent) => Err(CallError::fail(format!(
                "optional dependency '{name}' is absent"
            ))),
            _ => Err(CallError::fail(format!(
                "no resource dependency named '{name}'"
            ))),
        }
    }

    /// The resolved resource value declared under `name`, downcast to `T`.
    pub fn resource_as<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, CallError> {
        match self.get(name) {
            Some(Resolved::Resource(slot)) => slot.value_as::<T>(),
            Some(Resolved::Absent) => Err(CallError::fail(format!(
                "optional dependency '{name}' is absent"
            ))),
            _ => Err(CallError::fail(format!(
                "no resource dependency named '{name}'"
            ))),
        }
    }

    /// The resource slot declared under `name`, or `None` when absent.
    pub fn maybe_resource(&self, name: &str) -> Option<ResourceSlot> {
        match self.get(name) {
            Some(Resolved::Resource(slot)) => Some(slot.clone()),
            _ => None,
        }
    }

    /// The event emitter declared under `name`.
    pub fn emitter(&self, name: &str) -> Result<EventEmitter, CallError> {
        match self.get(name) {
            Some(Resolved::Event(emitter)) => Ok(emitter.clone()),
            Some(Resolved::Absent) => Err(CallError::fail(format!(
                "optional dependency '{name}' is absent"
            ))),
            _ => Err(CallError::fail(format!(
                "no event dependency named '{name}'"
            ))),
        }
    }

    /// The tag accessor declared under `name`.
    pub fn tag(&self, name: &str) -> Result<TagAccessor, CallError> {
        match self.get(name) {
            Some(Resolved::Tag(accessor)) => Ok(accessor.clone()),
            Some(Resolved::Absent) => Err(CallError::fail(format!(
                "optional dependency '{name}' is absent"
            ))),
            _ => Err(CallError::fail(format!("no tag dependency named '{name}'"))),
        }
    }
}

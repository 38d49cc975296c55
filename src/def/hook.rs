//! # Hooks: event listeners.
//!
//! A hook binds a body to one event id, or to every event (wildcard).
//! Delivery order within an emission is ascending [`order`](HookDef::order),
//! ties broken by registration order; specific hooks always run before
//! wildcard hooks.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::CallError;
use crate::events::Emission;
use crate::resolve::ResolvedDeps;

use super::dependency::{DependencyMap, DependencySpec};
use super::id::{DefKind, Id};
use super::tag::TagRef;

/// What a hook listens to.
#[derive(Clone, Debug)]
pub enum HookTarget {
    /// One specific event id.
    Event(Id),
    /// Every event, except emissions of events tagged to skip wildcards.
    AllEvents,
}

/// Execution context handed to a hook body.
#[derive(Clone)]
pub struct HookContext {
    /// The hook's resolved dependencies.
    pub deps: ResolvedDeps,
    /// Cooperative cancellation signal.
    pub cancel: CancellationToken,
}

type HookBody = Arc<
    dyn Fn(Emission, HookContext) -> BoxFuture<'static, Result<(), CallError>> + Send + Sync,
>;

/// Declaration of a hook.
pub struct HookDef {
    id: Id,
    on: HookTarget,
    order: i32,
    deps: DependencySpec,
    tags: Vec<TagRef>,
    body: HookBody,
}

impl HookDef {
    /// Declares a hook listening to one event.
    pub fn on<F, Fut>(event: impl Into<Id>, f: F) -> Arc<Self>
    where
        F: Fn(Emission, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CallError>> + Send + 'static,
    {
        Self::build(HookTarget::Event(event.into()), f)
    }

    /// Declares a wildcard hook listening to every event.
    pub fn on_all<F, Fut>(f: F) -> Arc<Self>
    where
        F: Fn(Emission, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CallError>> + Send + 'static,
    {
        Self::build(HookTarget::AllEvents, f)
    }

    fn build<F, Fut>(on: HookTarget, f: F) -> Arc<Self>
    where
        F: Fn(Emission, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CallError>> + Send + 'static,
    {
        Arc::new(Self {
            id: Id::anonymous(DefKind::Hook),
            on,
            order: 0,
            deps: DependencySpec::default(),
            tags: Vec::new(),
            body: Arc::new(move |em, ctx| Box::pin(f(em, ctx))),
        })
    }

    /// Replaces the generated id with an explicit one.
    pub fn with_id(self: Arc<Self>, id: impl Into<Id>) -> Arc<Self> {
        let id = id.into();
        self.rebuild(move |def| def.id = id.clone())
    }

    /// Sets the delivery order (lower runs earlier; default 0).
    pub fn with_order(self: Arc<Self>, order: i32) -> Arc<Self> {
        self.rebuild(move |def| def.order = order)
    }

    /// Sets a static dependency map.
    pub fn with_deps(self: Arc<Self>, deps: DependencyMap) -> Arc<Self> {
        self.rebuild(|def| def.deps = DependencySpec::Static(deps.clone()))
    }

    /// Attaches tags.
    pub fn with_tags(self: Arc<Self>, tags: impl IntoIterator<Item = TagRef>) -> Arc<Self> {
        let collected: Vec<TagRef> = tags.into_iter().collect();
        self.rebuild(|def| def.tags = collected.clone())
    }

    fn rebuild(self: Arc<Self>, apply: impl Fn(&mut HookDef)) -> Arc<Self> {
        let mut def = HookDef {
            id: self.id.clone(),
            on: self.on.clone(),
            order: self.order,
            deps: self.deps.clone(),
            tags: self.tags.clone(),
            body: Arc::clone(&self.body),
        };
        apply(&mut def);
        Arc::new(def)
    }

    /// The hook's id.
    #[inline]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// What this hook listens to.
    #[inline]
    pub fn target(&self) -> &HookTarget {
        &self.on
    }

    /// The declared delivery order.
    #[inline]
    pub fn order(&self) -> i32 {
        self.order
    }

    pub(crate) fn deps(&self) -> &DependencySpec {
        &self.deps
    }

    pub(crate) fn tags(&self) -> &[TagRef] {
        &self.tags
    }

    pub(crate) fn invoke(
        &self,
        emission: Emission,
        ctx: HookContext,
    ) -> BoxFuture<'static, Result<(), CallError>> {
        (self.body)(emission, ctx)
    }
}

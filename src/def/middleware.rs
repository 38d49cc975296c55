//! # Middleware definitions.
//!
//! Middleware wraps task execution and resource init/dispose. A layer
//! receives the call input and a [`Next`] continuation; whatever it
//! returns becomes the result seen by the layer outside it. Layers
//! compose as an explicit ordered list reduced into one invocable — the
//! first attachment is outermost.
//!
//! A middleware registered `everywhere` wraps every task (and/or every
//! resource) without per-definition attachment, outside all locally
//! declared layers. It is skipped for targets it directly depends on.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::dynamic::Dynamic;
use crate::error::CallError;
use crate::resolve::ResolvedDeps;

use super::dependency::{DependencyMap, DependencySpec};
use super::id::{DefKind, Id};
use super::tag::TagRef;

/// Which pipeline a middleware invocation is wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    /// A task call.
    Task,
    /// A resource's init.
    ResourceInit,
    /// A resource's dispose.
    ResourceDispose,
}

/// Continuation to the next layer (or the body, innermost).
pub type Next = Arc<dyn Fn(Option<Dynamic>) -> BoxFuture<'static, Result<Dynamic, CallError>> + Send + Sync>;

type MiddlewareBody = Arc<
    dyn Fn(MiddlewareContext, Option<Dynamic>, Next) -> BoxFuture<'static, Result<Dynamic, CallError>>
        + Send
        + Sync,
>;

/// Execution context handed to a middleware layer.
#[derive(Clone)]
pub struct MiddlewareContext {
    /// Id of the wrapped task or resource.
    pub target: Id,
    /// Which pipeline is being wrapped.
    pub kind: PipelineKind,
    /// The middleware's own captured configuration.
    pub config: Option<Dynamic>,
    /// The middleware's resolved dependencies.
    pub deps: ResolvedDeps,
    /// Cooperative cancellation signal for this call.
    pub cancel: CancellationToken,
}

/// Scope of an `everywhere` registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Everywhere {
    /// Wrap every task call.
    pub tasks: bool,
    /// Wrap every resource init/dispose.
    pub resources: bool,
}

/// Declaration of a middleware.
pub struct MiddlewareDef {
    id: Id,
    deps: DependencySpec,
    config: Option<Dynamic>,
    everywhere: Everywhere,
    tags: Vec<TagRef>,
    body: MiddlewareBody,
}

impl MiddlewareDef {
    /// Declares a middleware with the given id and layer function.
    pub fn from_fn<F, Fut>(id: impl Into<Id>, f: F) -> Arc<Self>
    where
        F: Fn(MiddlewareContext, Option<Dynamic>, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Dynamic, CallError>> + Send + 'static,
    {
        Arc::new(Self {
            id: id.into(),
            deps: DependencySpec::default(),
            config: None,
            everywhere: Everywhere::default(),
            tags: Vec::new(),
            body: Arc::new(move |ctx, input, next| Box::pin(f(ctx, input, next))),
        })
    }

    /// Declares an anonymous middleware.
    pub fn anonymous<F, Fut>(f: F) -> Arc<Self>
    where
        F: Fn(MiddlewareContext, Option<Dynamic>, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Dynamic, CallError>> + Send + 'static,
    {
        Self::from_fn(Id::anonymous(DefKind::Middleware), f)
    }

    /// Sets a static dependency map.
    pub fn with_deps(self: Arc<Self>, deps: DependencyMap) -> Arc<Self> {
        self.rebuild(|def| def.deps = DependencySpec::Static(deps.clone()))
    }

    /// Sets a dependency map computed from the captured configuration.
    pub fn with_deps_fn(
        self: Arc<Self>,
        f: impl Fn(Option<&Dynamic>) -> DependencyMap + Send + Sync + 'static,
    ) -> Arc<Self> {
        let f = Arc::new(f);
        self.rebuild(move |def| def.deps = DependencySpec::FromConfig(f.clone()))
    }

    /// Captures a configuration value.
    pub fn with_config(self: Arc<Self>, config: Dynamic) -> Arc<Self> {
        self.rebuild(|def| def.config = Some(config.clone()))
    }

    /// Wraps every task and every resource init/dispose.
    pub fn everywhere(self: Arc<Self>) -> Arc<Self> {
        self.rebuild(|def| {
            def.everywhere = Everywhere {
                tasks: true,
                resources: true,
            }
        })
    }

    /// Wraps every task call only.
    pub fn everywhere_tasks(self: Arc<Self>) -> Arc<Self> {
        self.rebuild(|def| def.everywhere.tasks = true)
    }

    /// Wraps every resource init/dispose only.
    pub fn everywhere_resources(self: Arc<Self>) -> Arc<Self> {
        self.rebuild(|def| def.everywhere.resources = true)
    }

    /// Attaches tags.
    pub fn with_tags(self: Arc<Self>, tags: impl IntoIterator<Item = TagRef>) -> Arc<Self> {
        let collected: Vec<TagRef> = tags.into_iter().collect();
        self.rebuild(|def| def.tags = collected.clone())
    }

    fn rebuild(self: Arc<Self>, apply: impl Fn(&mut MiddlewareDef)) -> Arc<Self> {
        let mut def = MiddlewareDef {
            id: self.id.clone(),
            deps: self.deps.clone(),
            config: self.config.clone(),
            everywhere: self.everywhere,
            tags: self.tags.clone(),
            body: Arc::clone(&self.body),
        };
        apply(&mut def);
        Arc::new(def)
    }

    /// The middleware's id.
    #[inline]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// An attachment reference for task/resource declarations.
    pub fn attach(&self) -> MiddlewareRef {
        MiddlewareRef {
            id: self.id.clone(),
        }
    }

    pub(crate) fn deps(&self) -> &DependencySpec {
        &self.deps
    }

    pub(crate) fn config(&self) -> Option<&Dynamic> {
        self.config.as_ref()
    }

    pub(crate) fn everywhere_scope(&self) -> Everywhere {
        self.everywhere
    }

    pub(crate) fn tags(&self) -> &[TagRef] {
        &self.tags
    }

    pub(crate) fn wrap(
        &self,
        ctx: MiddlewareContext,
        input: Option<Dynamic>,
        next: Next,
    ) -> BoxFuture<'static, Result<Dynamic, CallError>> {
        (self.body)(ctx, input, next)
    }
}

/// Reference attaching a registered middleware to a task or resource.
#[derive(Clone)]
pub struct MiddlewareRef {
    /// Id of the attached middleware.
    pub id: Id,
}

impl MiddlewareRef {
    /// Attaches the named middleware.
    pub fn new(id: impl Into<Id>) -> Self {
        Self { id: id.into() }
    }
}

impl From<&MiddlewareDef> for Id {
    fn from(def: &MiddlewareDef) -> Self {
        def.id.clone()
    }
}

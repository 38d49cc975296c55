//! # Task definitions.
//!
//! A task is a callable unit of work with declared dependencies, optional
//! middleware attachments, and optional input/result validators. The body
//! is either a type implementing [`TaskLogic`] or a closure wrapped via
//! [`TaskDef::from_fn`], which produces a fresh future per call.
//!
//! A task receives a [`TaskContext`] carrying its resolved dependencies
//! and a [`CancellationToken`]; bodies should check the token and exit
//! promptly when the runtime is torn down mid-call.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::dynamic::Dynamic;
use crate::error::CallError;
use crate::resolve::ResolvedDeps;
use crate::validate::Validator;

use super::dependency::{DependencyMap, DependencyRef, DependencySpec};
use super::id::{DefKind, Id};
use super::middleware::MiddlewareRef;
use super::tag::TagRef;

/// Execution context handed to a task body.
#[derive(Clone)]
pub struct TaskContext {
    /// The task's resolved dependencies.
    pub deps: ResolvedDeps,
    /// Cooperative cancellation signal for this call.
    pub cancel: CancellationToken,
}

/// # Asynchronous task body.
///
/// Implement this for struct-backed tasks; use [`TaskDef::from_fn`] for
/// closure-backed ones.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use taskwire::{dynamic, CallError, Dynamic, TaskContext, TaskDef, TaskLogic};
///
/// struct Greet;
///
/// #[async_trait]
/// impl TaskLogic for Greet {
///     async fn call(
///         &self,
///         _input: Option<Dynamic>,
///         _ctx: TaskContext,
///     ) -> Result<Dynamic, CallError> {
///         Ok(dynamic(String::from("hello")))
///     }
/// }
///
/// let task = TaskDef::new("greet", Greet);
/// assert_eq!(task.id().as_str(), "greet");
/// ```
#[async_trait]
pub trait TaskLogic: Send + Sync + 'static {
    /// Executes the task with its (already validated) input.
    async fn call(&self, input: Option<Dynamic>, ctx: TaskContext) -> Result<Dynamic, CallError>;
}

/// Closure adapter: wraps `F: Fn(input, ctx) -> Fut` into [`TaskLogic`].
struct FnLogic<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskLogic for FnLogic<F>
where
    F: Fn(Option<Dynamic>, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Dynamic, CallError>> + Send + 'static,
{
    async fn call(&self, input: Option<Dynamic>, ctx: TaskContext) -> Result<Dynamic, CallError> {
        (self.f)(input, ctx).await
    }
}

/// Declaration of a task.
///
/// Immutable once built; registration shares it by `Arc`.
pub struct TaskDef {
    id: Id,
    deps: DependencySpec,
    middleware: Vec<MiddlewareRef>,
    tags: Vec<TagRef>,
    input_validator: Option<Arc<dyn Validator>>,
    result_validator: Option<Arc<dyn Validator>>,
    logic: Arc<dyn TaskLogic>,
}

impl TaskDef {
    /// Declares a task backed by a [`TaskLogic`] implementation.
    pub fn new(id: impl Into<Id>, logic: impl TaskLogic) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            deps: DependencySpec::default(),
            middleware: Vec::new(),
            tags: Vec::new(),
            input_validator: None,
            result_validator: None,
            logic: Arc::new(logic),
        })
    }

    /// Declares a closure-backed task.
    ///
    /// The closure creates a **new** future per call; shared state must be
    /// captured explicitly (e.g. behind an `Arc`).
    pub fn from_fn<F, Fut>(id: impl Into<Id>, f: F) -> Arc<Self>
    where
        F: Fn(Option<Dynamic>, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Dynamic, CallError>> + Send + 'static,
    {
        Self::new(id, FnLogic { f })
    }

    /// Declares an anonymous closure-backed task.
    pub fn anonymous<F, Fut>(f: F) -> Arc<Self>
    where
        F: Fn(Option<Dynamic>, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Dynamic, CallError>> + Send + 'static,
    {
        Self::from_fn(Id::anonymous(DefKind::Task), f)
    }

    /// Sets a static dependency map.
    pub fn with_deps(self: Arc<Self>, deps: DependencyMap) -> Arc<Self> {
        self.rebuild(|def| def.deps = DependencySpec::Static(deps.clone()))
    }

    /// Attaches middleware, outermost first.
    pub fn with_middleware(
        self: Arc<Self>,
        middleware: impl IntoIterator<Item = MiddlewareRef>,
    ) -> Arc<Self> {
        let collected: Vec<MiddlewareRef> = middleware.into_iter().collect();
        self.rebuild(|def| def.middleware = collected.clone())
    }

    /// Attaches tags.
    pub fn with_tags(self: Arc<Self>, tags: impl IntoIterator<Item = TagRef>) -> Arc<Self> {
        let collected: Vec<TagRef> = tags.into_iter().collect();
        self.rebuild(|def| def.tags = collected.clone())
    }

    /// Sets the input validator (runs immediately before the body).
    pub fn with_input_validator(self: Arc<Self>, v: Arc<dyn Validator>) -> Arc<Self> {
        self.rebuild(|def| def.input_validator = Some(v.clone()))
    }

    /// Sets the result validator (runs immediately after the body).
    pub fn with_result_validator(self: Arc<Self>, v: Arc<dyn Validator>) -> Arc<Self> {
        self.rebuild(|def| def.result_validator = Some(v.clone()))
    }

    fn rebuild(self: Arc<Self>, apply: impl Fn(&mut TaskDef)) -> Arc<Self> {
        let mut def = TaskDef {
            id: self.id.clone(),
            deps: self.deps.clone(),
            middleware: self.middleware.clone(),
            tags: self.tags.clone(),
            input_validator: self.input_validator.clone(),
            result_validator: self.result_validator.clone(),
            logic: Arc::clone(&self.logic),
        };
        apply(&mut def);
        Arc::new(def)
    }

    /// The task's id.
    #[inline]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// A dependency reference on this task.
    pub fn as_dep(&self) -> DependencyRef {
        DependencyRef::Task(self.id.clone())
    }

    pub(crate) fn deps(&self) -> &DependencySpec {
        &self.deps
    }

    pub(crate) fn middleware(&self) -> &[MiddlewareRef] {
        &self.middleware
    }

    pub(crate) fn tags(&self) -> &[TagRef] {
        &self.tags
    }

    pub(crate) fn input_validator(&self) -> Option<&Arc<dyn Validator>> {
        self.input_validator.as_ref()
    }

    pub(crate) fn result_validator(&self) -> Option<&Arc<dyn Validator>> {
        self.result_validator.as_ref()
    }

    pub(crate) fn invoke(
        &self,
        input: Option<Dynamic>,
        ctx: TaskContext,
    ) -> BoxFuture<'static, Result<Dynamic, CallError>> {
        let logic = Arc::clone(&self.logic);
        Box::pin(async move { logic.call(input, ctx).await })
    }
}

impl From<&TaskDef> for Id {
    fn from(def: &TaskDef) -> Self {
        def.id.clone()
    }
}

impl From<&Arc<TaskDef>> for Id {
    fn from(def: &Arc<TaskDef>) -> Self {
        def.id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::dynamic;

    #[test]
    fn test_builder_accumulates() {
        let task = TaskDef::from_fn("t", |_input, _ctx| async { Ok(dynamic(1_u32)) })
            .with_deps(DependencyMap::new().with("db", DependencyRef::Resource(Id::new("db"))))
            .with_tags([TagRef::new("jobs")]);

        assert_eq!(task.id().as_str(), "t");
        assert_eq!(task.tags().len(), 1);
        match task.deps() {
            DependencySpec::Static(map) => assert_eq!(map.len(), 1),
            DependencySpec::FromConfig(_) => panic!("expected static deps"),
        }
    }

    #[test]
    fn test_anonymous_gets_task_kind_id() {
        let task = TaskDef::anonymous(|_input, _ctx| async { Ok(dynamic(())) });
        assert!(task.id().as_str().starts_with("task#"));
    }
}

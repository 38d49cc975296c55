//! # Resource definitions.
//!
//! A resource is a long-lived singleton with an init/dispose lifecycle.
//! Beyond its own dependencies, a resource may *register* further
//! definitions (recursively — registration lists may contain resources
//! with their own lists), declare *overrides* replacing registered
//! definitions by id, and capture a configuration value its dependency
//! map and registration list can be computed from.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::dynamic::Dynamic;
use crate::error::CallError;
use crate::events::EventControl;
use crate::resolve::ResolvedDeps;
use crate::validate::Validator;

use super::dependency::{DependencyMap, DependencyRef, DependencySpec};
use super::id::{DefKind, Id};
use super::middleware::MiddlewareRef;
use super::tag::TagRef;
use super::Definition;

/// Execution context handed to resource init and dispose hooks.
#[derive(Clone)]
pub struct ResourceContext {
    /// The resource's resolved dependencies.
    pub deps: ResolvedDeps,
    /// Cooperative cancellation signal.
    pub cancel: CancellationToken,
    /// Control surface for installing emission/hook interceptors
    /// (available until the runtime locks).
    pub events: EventControl,
}

/// One entry of a resource's registration list.
///
/// `exported: false` hides the definition from tag accessors requested
/// outside the registering resource's subtree.
#[derive(Clone)]
pub struct RegisterItem {
    /// The registered definition.
    pub def: Definition,
    /// Whether the definition is visible outside the owner's subtree.
    pub exported: bool,
}

impl RegisterItem {
    /// Registers a definition visible everywhere (the default).
    pub fn public(def: impl Into<Definition>) -> Self {
        Self {
            def: def.into(),
            exported: true,
        }
    }

    /// Registers a definition hidden outside the owner's subtree.
    pub fn private(def: impl Into<Definition>) -> Self {
        Self {
            def: def.into(),
            exported: false,
        }
    }
}

impl<T: Into<Definition>> From<T> for RegisterItem {
    fn from(def: T) -> Self {
        RegisterItem::public(def)
    }
}

/// How a resource declares its registration list.
#[derive(Clone)]
pub enum RegisterSpec {
    /// A fixed list.
    Static(Vec<RegisterItem>),
    /// A list computed from the captured configuration.
    FromConfig(Arc<dyn Fn(Option<&Dynamic>) -> Vec<RegisterItem> + Send + Sync>),
}

impl RegisterSpec {
    pub(crate) fn evaluate(&self, config: Option<&Dynamic>) -> Vec<RegisterItem> {
        match self {
            RegisterSpec::Static(items) => items.clone(),
            RegisterSpec::FromConfig(f) => f(config),
        }
    }
}

impl Default for RegisterSpec {
    fn default() -> Self {
        RegisterSpec::Static(Vec::new())
    }
}

type InitBody = Arc<
    dyn Fn(Option<Dynamic>, ResourceContext) -> BoxFuture<'static, Result<Dynamic, CallError>>
        + Send
        + Sync,
>;
type DisposeBody = Arc<
    dyn Fn(Dynamic, ResourceContext) -> BoxFuture<'static, Result<(), CallError>> + Send + Sync,
>;

/// Declaration of a resource.
pub struct ResourceDef {
    id: Id,
    deps: DependencySpec,
    middleware: Vec<MiddlewareRef>,
    tags: Vec<TagRef>,
    config: Option<Dynamic>,
    register: RegisterSpec,
    overrides: Vec<Definition>,
    config_validator: Option<Arc<dyn Validator>>,
    value_validator: Option<Arc<dyn Validator>>,
    init: Option<InitBody>,
    dispose: Option<DisposeBody>,
}

impl ResourceDef {
    /// Declares a resource with the given id and no behavior.
    ///
    /// Without an init hook the resource's value is the unit value; pure
    /// container resources (roots that only register other definitions)
    /// are typically declared this way.
    pub fn new(id: impl Into<Id>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            deps: DependencySpec::default(),
            middleware: Vec::new(),
            tags: Vec::new(),
            config: None,
            register: RegisterSpec::default(),
            overrides: Vec::new(),
            config_validator: None,
            value_validator: None,
            init: None,
            dispose: None,
        })
    }

    /// Declares an anonymous resource.
    pub fn anonymous() -> Arc<Self> {
        Self::new(Id::anonymous(DefKind::Resource))
    }

    /// Sets the init hook producing the resource's value.
    pub fn with_init<F, Fut>(self: Arc<Self>, f: F) -> Arc<Self>
    where
        F: Fn(Option<Dynamic>, ResourceContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Dynamic, CallError>> + Send + 'static,
    {
        let body: InitBody = Arc::new(move |cfg, ctx| Box::pin(f(cfg, ctx)));
        self.rebuild(move |def| def.init = Some(Arc::clone(&body)))
    }

    /// Sets the dispose hook receiving the resolved value.
    pub fn with_dispose<F, Fut>(self: Arc<Self>, f: F) -> Arc<Self>
    where
        F: Fn(Dynamic, ResourceContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CallError>> + Send + 'static,
    {
        let body: DisposeBody = Arc::new(move |value, ctx| Box::pin(f(value, ctx)));
        self.rebuild(move |def| def.dispose = Some(Arc::clone(&body)))
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

    /// Sets a static registration list.
    pub fn with_register(
        self: Arc<Self>,
        items: impl IntoIterator<Item = RegisterItem>,
    ) -> Arc<Self> {
        let collected: Vec<RegisterItem> = items.into_iter().collect();
        self.rebuild(|def| def.register = RegisterSpec::Static(collected.clone()))
    }

    /// Sets a registration list computed from the captured configuration.
    pub fn with_register_fn(
        self: Arc<Self>,
        f: impl Fn(Option<&Dynamic>) -> Vec<RegisterItem> + Send + Sync + 'static,
    ) -> Arc<Self> {
        let f = Arc::new(f);
        self.rebuild(move |def| def.register = RegisterSpec::FromConfig(f.clone()))
    }

    /// Declares overrides replacing registered definitions by id.
    ///
    /// When several resources override the same id, the override declared
    /// closest to the root wins.
    pub fn with_overrides(
        self: Arc<Self>,
        overrides: impl IntoIterator<Item = Definition>,
    ) -> Arc<Self> {
        let collected: Vec<Definition> = overrides.into_iter().collect();
        self.rebuild(|def| def.overrides = collected.clone())
    }

    /// Attaches middleware to init/dispose, outermost first.
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

    /// Sets the configuration validator (runs before init).
    pub fn with_config_validator(self: Arc<Self>, v: Arc<dyn Validator>) -> Arc<Self> {
        self.rebuild(|def| def.config_validator = Some(v.clone()))
    }

    /// Sets the value validator (runs on the init hook's output).
    pub fn with_value_validator(self: Arc<Self>, v: Arc<dyn Validator>) -> Arc<Self> {
        self.rebuild(|def| def.value_validator = Some(v.clone()))
    }

    fn rebuild(self: Arc<Self>, apply: impl Fn(&mut ResourceDef)) -> Arc<Self> {
        let mut def = ResourceDef {
            id: self.id.clone(),
            deps: self.deps.clone(),
            middleware: self.middleware.clone(),
            tags: self.tags.clone(),
            config: self.config.clone(),
            register: self.register.clone(),
            overrides: self.overrides.clone(),
            config_validator: self.config_validator.clone(),
            value_validator: self.value_validator.clone(),
            init: self.init.clone(),
            dispose: self.dispose.clone(),
        };
        apply(&mut def);
        Arc::new(def)
    }

    /// The resource's id.
    #[inline]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// A dependency reference on this resource.
    pub fn as_dep(&self) -> DependencyRef {
        DependencyRef::Resource(self.id.clone())
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

    pub(crate) fn config(&self) -> Option<&Dynamic> {
        self.config.as_ref()
    }

    pub(crate) fn register(&self) -> &RegisterSpec {
        &self.register
    }

    pub(crate) fn overrides(&self) -> &[Definition] {
        &self.overrides
    }

    pub(crate) fn config_validator(&self) -> Option<&Arc<dyn Validator>> {
        self.config_validator.as_ref()
    }

    pub(crate) fn value_validator(&self) -> Option<&Arc<dyn Validator>> {
        self.value_validator.as_ref()
    }

    pub(crate) fn has_init(&self) -> bool {
        self.init.is_some()
    }

    pub(crate) fn has_dispose(&self) -> bool {
        self.dispose.is_some()
    }

    pub(crate) fn invoke_init(
        &self,
        config: Option<Dynamic>,
        ctx: ResourceContext,
    ) -> Option<BoxFuture<'static, Result<Dynamic, CallError>>> {
        self.init.as_ref().map(|f| f(config, ctx))
    }

    pub(crate) fn invoke_dispose(
        &self,
        value: Dynamic,
        ctx: ResourceContext,
    ) -> Option<BoxFuture<'static, Result<(), CallError>>> {
        self.dispose.as_ref().map(|f| f(value, ctx))
    }
}

impl From<&ResourceDef> for Id {
    fn from(def: &ResourceDef) -> Self {
        def.id.clone()
    }
}

impl From<&Arc<ResourceDef>> for Id {
    fn from(def: &Arc<ResourceDef>) -> Self {
        def.id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::{downcast_ref, dynamic};

    #[test]
    fn test_register_list_from_config() {
        let res = ResourceDef::new("root")
            .with_config(dynamic(2_usize))
            .with_register_fn(|cfg| {
                let n = cfg.and_then(|c| downcast_ref::<usize>(c).copied()).unwrap_or(0);
                (0..n)
                    .map(|i| RegisterItem::public(crate::def::TagDef::new(format!("tag-{i}"))))
                    .collect()
            });

        let items = res.register().evaluate(res.config());
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_private_registration() {
        let item = RegisterItem::private(crate::def::TagDef::new("internal"));
        assert!(!item.exported);
        let item: RegisterItem = crate::def::TagDef::new("visible").into();
        assert!(item.exported);
    }
}

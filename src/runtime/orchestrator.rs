//! # Orchestrator: assembles and initializes a runtime.
//!
//! The setup state machine, in order:
//!
//! ```text
//! register (recursive, depth-first)
//!   └─► apply overrides (children-before-parent; root-closest wins)
//!         └─► evaluate dependency maps ("plans")
//!               └─► build graph ─► detect cycles (fatal if any)
//!                     └─► check plans (missing non-optional deps fatal)
//!                           └─► per definition, in topological order:
//!                                 materialize resolved deps
//!                                 init resource (skipped for the root,
//!                                                skipped in dry-run)
//!                                 └─► init root ─► lock
//! ```
//!
//! A dry run executes every step except the two initialization steps:
//! structural validation without side effects.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::def::{DefKind, Definition, DependencyMap, Id, RegisterItem, ResourceDef};
use crate::error::BuildError;
use crate::events::lifecycle::{
    DISPOSE_FAILED, NO_WILDCARD, RESOURCE_FAILED, RESOURCE_READY, TASK_AFTER_RUN, TASK_FAILED,
};
use crate::events::Dispatcher;
use crate::graph::DepGraph;
use crate::pipeline;
use crate::resolve;
use crate::store::Registry;

use super::config::RunOptions;
use super::handle::RunHandle;
use super::shared::RuntimeShared;

/// Builder-style entry point composing registration, resolution, and
/// initialization into one `start()` call.
pub struct Orchestrator {
    root: Arc<ResourceDef>,
    options: RunOptions,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Creates an orchestrator for the tree rooted at `root`.
    pub fn new(root: Arc<ResourceDef>) -> Self {
        Self {
            root,
            options: RunOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the default options.
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Uses an externally owned cancellation token as the runtime root
    /// token; child tokens thread through every execution context.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs the setup state machine and returns the live handle.
    pub async fn start(self) -> Result<RunHandle, BuildError> {
        let root_id = self.root.id().clone();
        let depth_limit = self.options.emission_depth;
        let cancel = self.cancel.clone();

        let shared = Arc::new(RuntimeShared {
            registry: parking_lot::RwLock::new(Registry::new()),
            dispatcher: Dispatcher::new(depth_limit),
            order: std::sync::OnceLock::new(),
            root: root_id.clone(),
            cancel: cancel.clone(),
        });

        // Register: built-ins first, then the application tree.
        {
            let mut registry = shared.registry.write();
            registry.register(
                RegisterItem::public(Definition::Tag(NO_WILDCARD.clone())),
                None,
            )?;
            for event in [
                &TASK_AFTER_RUN,
                &TASK_FAILED,
                &RESOURCE_READY,
                &RESOURCE_FAILED,
                &DISPOSE_FAILED,
            ] {
                registry.register(
                    RegisterItem::public(Definition::Event(Arc::clone(event))),
                    None,
                )?;
            }
            registry.register(
                RegisterItem::public(Definition::Resource(Arc::clone(&self.root))),
                None,
            )?;
            registry.apply_overrides()?;
        }

        // Evaluate every dependency map once, against post-override
        // definitions and their captured configuration.
        let plans: HashMap<Id, DependencyMap> = {
            let registry = shared.registry.read();
            let mut plans = HashMap::new();
            for id in registry.registration_order().to_vec() {
                let plan = match registry.kind_of(&id) {
                    Some(DefKind::Task) => {
                        registry.task(&id).map(|e| e.def.deps().evaluate(None))
                    }
                    Some(DefKind::Resource) => registry
                        .resource(&id)
                        .map(|e| e.def.deps().evaluate(e.def.config())),
                    Some(DefKind::Hook) => {
                        registry.hook(&id).map(|e| e.def.deps().evaluate(None))
                    }
                    Some(DefKind::Middleware) => registry
                        .middleware(&id)
                        .map(|e| e.def.deps().evaluate(e.def.config())),
                    _ => None,
                };
                if let Some(plan) = plan {
                    plans.insert(id, plan);
                }
            }
            plans
        };

        // Structural check first: a cyclic graph must fail before any
        // missing-dependency diagnostics or initialization.
        let order: Vec<Id> = {
            let registry = shared.registry.read();
            let graph = DepGraph::build(&registry, &plans);
            let cycles = graph.find_cycles();
            if !cycles.is_empty() {
                return Err(BuildError::CycleDetected { cycles });
            }
            graph.topo_order()?
        };
        let _ = shared.order.set(order.clone());

        // Configuration checks: every non-optional dependency and every
        // middleware attachment must be registered.
        {
            let registry = shared.registry.read();
            for id in registry.registration_order() {
                if let Some(plan) = plans.get(id) {
                    resolve::check_plan(&registry, id, plan)?;
                }
                let attachments = match registry.kind_of(id) {
                    Some(DefKind::Task) => registry
                        .task(id)
                        .map(|e| e.def.middleware().to_vec())
                        .unwrap_or_default(),
                    Some(DefKind::Resource) => registry
                        .resource(id)
                        .map(|e| e.def.middleware().to_vec())
                        .unwrap_or_default(),
                    _ => Vec::new(),
                };
                for attachment in attachments {
                    if registry.kind_of(&attachment.id) != Some(DefKind::Middleware) {
                        return Err(BuildError::DependencyNotFound {
                            requester: id.clone(),
                            missing: attachment.id,
                        });
                    }
                }
            }
        }

        // Keep the evaluated plans on the entries; the pipeline consults
        // them when composing everywhere-middleware chains.
        {
            let mut registry = shared.registry.write();
            for (id, plan) in &plans {
                match registry.kind_of(id) {
                    Some(DefKind::Task) => {
                        if let Some(entry) = registry.task_mut(id) {
                            entry.plan = Some(plan.clone());
                        }
                    }
                    Some(DefKind::Resource) => {
                        if let Some(entry) = registry.resource_mut(id) {
                            entry.plan = Some(plan.clone());
                        }
                    }
                    Some(DefKind::Hook) => {
                        if let Some(entry) = registry.hook_mut(id) {
                            entry.plan = Some(plan.clone());
                        }
                    }
                    Some(DefKind::Middleware) => {
                        if let Some(entry) = registry.middleware_mut(id) {
                            entry.plan = Some(plan.clone());
                        }
                    }
                    _ => {}
                }
            }
            shared.dispatcher.install_routes(&registry);
        }

        // Materialize and initialize in one topological pass, so every
        // definition's dependencies are concrete (and every dependency
        // resource initialized) by the time it is processed. Hooks
        // activate at their own position: earlier init-phase emissions
        // skip them.
        for id in &order {
            let kind = match shared.registry.read().kind_of(id) {
                Some(kind) => kind,
                None => continue,
            };
            if !matches!(
                kind,
                DefKind::Task | DefKind::Resource | DefKind::Hook | DefKind::Middleware
            ) {
                continue;
            }

            let plan = plans.get(id).cloned().unwrap_or_default();
            let resolved = {
                let registry = shared.registry.read();
                resolve::materialize(&shared, &registry, id, kind, &plan)
            };
            {
                let mut registry = shared.registry.write();
                match kind {
                    DefKind::Task => {
                        if let Some(entry) = registry.task_mut(id) {
                            entry.resolved = Some(resolved);
                        }
                    }
                    DefKind::Resource => {
                        if let Some(entry) = registry.resource_mut(id) {
                            entry.resolved = Some(resolved);
                        }
                    }
                    DefKind::Hook => {
                        if let Some(entry) = registry.hook_mut(id) {
                            entry.resolved = Some(resolved);
                        }
                    }
                    DefKind::Middleware => {
                        if let Some(entry) = registry.middleware_mut(id) {
                            entry.resolved = Some(resolved);
                        }
                    }
                    _ => {}
                }
            }

            if kind == DefKind::Resource && !self.options.dry_run && id != &root_id {
                pipeline::init_resource(Arc::clone(&shared), id.clone())
                    .await
                    .map_err(|e| BuildError::ResourceInit {
                        id: id.clone(),
                        source: Box::new(e),
                    })?;
            }
        }

        if !self.options.dry_run {
            pipeline::init_resource(Arc::clone(&shared), root_id.clone())
                .await
                .map_err(|e| BuildError::ResourceInit {
                    id: root_id.clone(),
                    source: Box::new(e),
                })?;
        }

        // Lock: definition maps and interceptor lists are frozen; only
        // runtime bookkeeping (values, disposed flags) stays writable.
        shared.registry.write().lock();
        shared.dispatcher.lock();

        Ok(RunHandle::new(shared, cancel))
    }
}

/// Registers, resolves, initializes, and locks the tree rooted at
/// `root`, returning the live handle.
pub async fn run(root: Arc<ResourceDef>) -> Result<RunHandle, BuildError> {
    Orchestrator::new(root).start().await
}

/// Performs every setup step except initialization: structural
/// validation without side effects.
pub async fn dry_run(root: Arc<ResourceDef>) -> Result<RunHandle, BuildError> {
    Orchestrator::new(root)
        .with_options(RunOptions {
            dry_run: true,
            ..RunOptions::default()
        })
        .start()
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
    use std::sync::Arc;

    use crate::def::{DependencyRef, TaskDef};
    use crate::dynamic::{downcast_ref, dynamic};

    use super::*;

    fn echo_task(id: &str, reply: &'static str) -> Arc<TaskDef> {
        TaskDef::from_fn(id, move |_input, _ctx| async move {
            Ok(dynamic(String::from(reply)))
        })
    }

    #[tokio::test]
    async fn test_chained_resources_compose_values() {
        let r = ResourceDef::new("r")
            .with_init(|_cfg, _ctx| async { Ok(dynamic(String::from("A"))) });
        let s = ResourceDef::new("s")
            .with_deps(DependencyMap::new().with("r", DependencyRef::Resource(Id::new("r"))))
            .with_init(|_cfg, ctx| async move {
                let r = ctx.deps.resource_as::<String>("r")?;
                Ok(dynamic(format!("{r}-B")))
            })
            .with_register([RegisterItem::public(r)]);

        let handle = run(s).await.expect("acyclic tree runs");
        let value = handle.root_value().expect("root initialized");
        assert_eq!(downcast_ref::<String>(&value).map(String::as_str), Some("A-B"));
    }

    #[tokio::test]
    async fn test_cycle_fails_before_any_init() {
        let inited = Arc::new(AtomicBool::new(false));
        let a_flag = Arc::clone(&inited);
        let a = ResourceDef::new("a")
            .with_deps(DependencyMap::new().with("b", DependencyRef::Resource(Id::new("b"))))
            .with_init(move |_cfg, _ctx| {
                let flag = Arc::clone(&a_flag);
                async move {
                    flag.store(true, AtomicOrdering::SeqCst);
                    Ok(crate::dynamic::unit())
                }
            });
        let b_flag = Arc::clone(&inited);
        let b = ResourceDef::new("b")
            .with_deps(DependencyMap::new().with("a", DependencyRef::Resource(Id::new("a"))))
            .with_init(move |_cfg, _ctx| {
                let flag = Arc::clone(&b_flag);
                async move {
                    flag.store(true, AtomicOrdering::SeqCst);
                    Ok(crate::dynamic::unit())
                }
            });
        let root = ResourceDef::new("root").with_register([a.into(), b.into()]);

        let err = run(root).await.expect_err("cyclic graph");
        assert_eq!(err.as_label(), "build_cycle_detected");
        let msg = err.as_message();
        assert!(msg.contains("a") && msg.contains("b"), "got: {msg}");
        assert!(
            !inited.load(AtomicOrdering::SeqCst),
            "no init may run on a cyclic graph"
        );
    }

    #[tokio::test]
    async fn test_root_closest_override_wins() {
        let t = echo_task("t", "original");
        let middle = ResourceDef::new("middle")
            .with_register([t.into()])
            .with_overrides([Definition::Task(echo_task("t", "from-middle"))]);
        let root = ResourceDef::new("root")
            .with_register([middle.into()])
            .with_overrides([Definition::Task(echo_task("t", "from-root"))]);

        let handle = run(root).await.expect("runs");
        let out = handle.run_task("t", None).await.expect("t runs").unwrap();
        assert_eq!(
            downcast_ref::<String>(&out).map(String::as_str),
            Some("from-root")
        );
    }

    #[tokio::test]
    async fn test_missing_dependency_fails_naming_both_ids() {
        let t = TaskDef::from_fn("t", |_input, _ctx| async { Ok(dynamic(())) })
            .with_deps(DependencyMap::new().with("db", DependencyRef::Resource(Id::new("db"))));
        let root = ResourceDef::new("root").with_register([t.into()]);

        let err = run(root).await.expect_err("missing dependency");
        assert_eq!(err.as_label(), "build_dependency_not_found");
        let msg = err.as_message();
        assert!(msg.contains("'t'") && msg.contains("'db'"), "got: {msg}");
    }

    #[tokio::test]
    async fn test_missing_tag_dependency_fails_when_required() {
        let t = TaskDef::from_fn("t", |_input, _ctx| async { Ok(dynamic(())) })
            .with_deps(DependencyMap::new().with("jobs", DependencyRef::Tag(Id::new("jobs"))));
        let root = ResourceDef::new("root").with_register([t.into()]);

        let err = run(root).await.expect_err("unregistered tag");
        assert_eq!(err.as_label(), "build_dependency_not_found");
        assert!(err.as_message().contains("'jobs'"));
    }

    #[tokio::test]
    async fn test_unregistered_middleware_attachment_fails() {
        let t = TaskDef::from_fn("t", |_input, _ctx| async { Ok(dynamic(())) })
            .with_middleware([crate::def::MiddlewareRef::new("ghost-mw")]);
        let root = ResourceDef::new("root").with_register([t.into()]);

        let err = run(root).await.expect_err("unregistered middleware");
        assert_eq!(err.as_label(), "build_dependency_not_found");
        assert!(err.as_message().contains("'ghost-mw'"));
    }

    #[tokio::test]
    async fn test_dry_run_skips_initialization() {
        let inited = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&inited);
        let res = ResourceDef::new("res").with_init(move |_cfg, _ctx| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, AtomicOrdering::SeqCst);
                Ok(crate::dynamic::unit())
            }
        });
        let root = ResourceDef::new("root")
            .with_register([res.into(), echo_task("t", "hi").into()]);

        let handle = dry_run(root).await.expect("structure is valid");
        assert!(
            !inited.load(AtomicOrdering::SeqCst),
            "dry run must not initialize"
        );
        let err = handle.resource_value("res").expect_err("never initialized");
        assert_eq!(err.as_label(), "call_not_ready");
        // Structural queries still work.
        assert_eq!(handle.task_ids(), vec![Id::new("t")]);
    }

    #[tokio::test]
    async fn test_dry_run_still_fails_on_cycle() {
        let a = ResourceDef::new("a")
            .with_deps(DependencyMap::new().with("b", DependencyRef::Resource(Id::new("b"))));
        let b = ResourceDef::new("b")
            .with_deps(DependencyMap::new().with("a", DependencyRef::Resource(Id::new("a"))));
        let root = ResourceDef::new("root").with_register([a.into(), b.into()]);

        let err = dry_run(root).await.expect_err("cycle");
        assert_eq!(err.as_label(), "build_cycle_detected");
    }

    #[tokio::test]
    async fn test_failed_root_init_surfaces_as_build_error() {
        let root = ResourceDef::new("root").with_init(|_cfg, _ctx| async {
            Err(crate::error::CallError::fail("bad config"))
        });

        let err = run(root).await.expect_err("root init fails");
        assert_eq!(err.as_label(), "build_resource_init");
        assert!(err.as_message().contains("bad config"));
    }

    #[tokio::test]
    async fn test_cancelled_runtime_rejects_task_calls() {
        let cancel = CancellationToken::new();
        let root = ResourceDef::new("root").with_register([echo_task("t", "hi").into()]);

        let handle = Orchestrator::new(root)
            .with_cancel(cancel.clone())
            .start()
            .await
            .expect("runs");

        cancel.cancel();
        let err = handle.run_task("t", None).await.expect_err("cancelled");
        assert_eq!(err.as_label(), "call_canceled");
    }

    #[tokio::test]
    async fn test_resources_initialize_in_dependency_order_root_last() {
        let log: Arc<parking_lot::Mutex<Vec<String>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mk = |id: &str, deps: DependencyMap| {
            let log = Arc::clone(&log);
            let label = id.to_string();
            ResourceDef::new(id).with_deps(deps).with_init(move |_cfg, _ctx| {
                let log = Arc::clone(&log);
                let label = label.clone();
                async move {
                    log.lock().push(label);
                    Ok(crate::dynamic::unit())
                }
            })
        };

        let base = mk("base", DependencyMap::new());
        let mid = mk(
            "mid",
            DependencyMap::new().with("base", DependencyRef::Resource(Id::new("base"))),
        );
        let root_log = Arc::clone(&log);
        let root = ResourceDef::new("root")
            .with_register([mid.into(), base.into()])
            .with_init(move |_cfg, _ctx| {
                let log = Arc::clone(&root_log);
                async move {
                    log.lock().push("root".into());
                    Ok(crate::dynamic::unit())
                }
            });

        run(root).await.expect("runs");
        assert_eq!(*log.lock(), vec!["base", "mid", "root"]);
    }
}

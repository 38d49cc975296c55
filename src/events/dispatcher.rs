//! # Ordered event dispatch.
//!
//! The [`Dispatcher`] owns per-event listener routes plus one wildcard
//! route list, and delivers emissions deterministically:
//!
//! ```text
//! emit(payload)
//!     │  payload validator (event def)
//!     ▼
//! emission interceptors (onion, first installed outermost)
//!     │
//!     ▼
//! specific hooks ──► wildcard hooks        (each: ascending order,
//!     │                   │                 ties by registration seq)
//!     └── hook interceptors wrap every listener call
//! ```
//!
//! ## Rules
//! - A listener calling `stop_propagation()` skips all remaining
//!   listeners of that emission.
//! - Events tagged [`NO_WILDCARD`](super::lifecycle::NO_WILDCARD) are
//!   never delivered to wildcard hooks.
//! - Listener errors propagate to the emitter; nothing is swallowed.
//! - Reentrancy guard: every root emission tracks the event ids in
//!   flight on its own call stack (task-local). Re-entering an id fails
//!   with a cycle error instead of recursing — a runtime check, distinct
//!   from the static dependency-cycle check.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use parking_lot::RwLock;

use crate::def::{DefKind, HookContext, HookTarget, Id};
use crate::dynamic::Dynamic;
use crate::error::CallError;
use crate::runtime::RuntimeShared;
use crate::store::Registry;

use super::emission::Emission;
use super::lifecycle::NO_WILDCARD_ID;

tokio::task_local! {
    /// Event ids in flight on the current root emission's call stack.
    static EMISSION_STACK: RefCell<Vec<Id>>;
}

/// Continuation invoking the rest of a delivery (or one listener).
pub type EmitNext =
    Arc<dyn Fn(Emission) -> BoxFuture<'static, Result<(), CallError>> + Send + Sync>;

/// Interceptor wrapping a whole delivery.
pub type EmitInterceptor =
    Arc<dyn Fn(EmitNext, Emission) -> BoxFuture<'static, Result<(), CallError>> + Send + Sync>;

/// Interceptor wrapping each individual listener call.
pub type HookInterceptor =
    Arc<dyn Fn(EmitNext, Emission) -> BoxFuture<'static, Result<(), CallError>> + Send + Sync>;

/// One listener route, precomputed at resolve time.
#[derive(Clone)]
struct Route {
    hook: Id,
    order: i32,
    seq: u64,
}

/// Deterministic event delivery engine.
pub(crate) struct Dispatcher {
    routes: RwLock<HashMap<Id, Vec<Route>>>,
    wildcard: RwLock<Vec<Route>>,
    emit_layers: RwLock<Vec<EmitInterceptor>>,
    hook_layers: RwLock<Vec<HookInterceptor>>,
    locked: AtomicBool,
    depth_limit: usize,
}

impl Dispatcher {
    pub(crate) fn new(depth_limit: usize) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            wildcard: RwLock::new(Vec::new()),
            emit_layers: RwLock::new(Vec::new()),
            hook_layers: RwLock::new(Vec::new()),
            locked: AtomicBool::new(false),
            depth_limit,
        }
    }

    /// Builds listener routes from the registered hooks.
    ///
    /// Called once by the orchestrator after overrides are applied.
    pub(crate) fn install_routes(&self, registry: &Registry) {
        let mut routes: HashMap<Id, Vec<Route>> = HashMap::new();
        let mut wildcard: Vec<Route> = Vec::new();

        for entry in registry.hooks() {
            let route = Route {
                hook: entry.def.id().clone(),
                order: entry.def.order(),
                seq: entry.seq,
            };
            match entry.def.target() {
                HookTarget::Event(event) => {
                    routes.entry(event.clone()).or_default().push(route);
                }
                HookTarget::AllEvents => wildcard.push(route),
            }
        }

        for list in routes.values_mut() {
            list.sort_by_key(|r| (r.order, r.seq));
        }
        wildcard.sort_by_key(|r| (r.order, r.seq));

        *self.routes.write() = routes;
        *self.wildcard.write() = wildcard;
    }

    /// Freezes interceptor installation.
    pub(crate) fn lock(&self) {
        self.locked.store(true, AtomicOrdering::SeqCst);
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.locked.load(AtomicOrdering::SeqCst)
    }

    pub(crate) fn intercept_emissions(&self, layer: EmitInterceptor) -> Result<(), CallError> {
        if self.is_locked() {
            return Err(CallError::Locked {
                operation: "install an emission interceptor",
            });
        }
        self.emit_layers.write().push(layer);
        Ok(())
    }

    pub(crate) fn intercept_hooks(&self, layer: HookInterceptor) -> Result<(), CallError> {
        if self.is_locked() {
            return Err(CallError::Locked {
                operation: "install a hook interceptor",
            });
        }
        self.hook_layers.write().push(layer);
        Ok(())
    }
}

/// Control surface for interceptor installation, handed to resource
/// init contexts.
#[derive(Clone)]
pub struct EventControl {
    shared: Weak<RuntimeShared>,
}

impl EventControl {
    pub(crate) fn new(shared: Weak<RuntimeShared>) -> Self {
        Self { shared }
    }

    fn dispatcher(&self) -> Result<Arc<RuntimeShared>, CallError> {
        self.shared.upgrade().ok_or(CallError::Disposed)
    }

    /// Installs an interceptor wrapping every delivery, onion-style.
    ///
    /// The first installed interceptor runs outermost. Fails once the
    /// runtime has locked.
    pub fn intercept_emissions<F, Fut>(&self, f: F) -> Result<(), CallError>
    where
        F: Fn(EmitNext, Emission) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CallError>> + Send + 'static,
    {
        let shared = self.dispatcher()?;
        shared
            .dispatcher
            .intercept_emissions(Arc::new(move |next, em| Box::pin(f(next, em))))
    }

    /// Installs an interceptor wrapping every individual listener call.
    pub fn intercept_hooks<F, Fut>(&self, f: F) -> Result<(), CallError>
    where
        F: Fn(EmitNext, Emission) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CallError>> + Send + 'static,
    {
        let shared = self.dispatcher()?;
        shared
            .dispatcher
            .intercept_hooks(Arc::new(move |next, em| Box::pin(f(next, em))))
    }
}

/// Validates the payload against the event's validator and dispatches.
///
/// Entry point for emitters and the run handle.
pub(crate) async fn emit_event(
    shared: Arc<RuntimeShared>,
    event: Id,
    payload: Option<Dynamic>,
    source: Option<Id>,
) -> Result<(), CallError> {
    let validated = {
        let registry = shared.registry.read();
        let entry = registry.event(&event).ok_or_else(|| CallError::NotFound {
            kind: DefKind::Event,
            id: event.clone(),
        })?;
        match (entry.def.payload_validator(), payload) {
            (Some(validator), Some(data)) => {
                Some(validator.parse(data).map_err(|message| CallError::Validation {
                    id: event.clone(),
                    message,
                })?)
            }
            (_, payload) => payload,
        }
    };

    let mut emission = Emission::new(event);
    if let Some(data) = validated {
        emission = emission.with_data(data);
    }
    if let Some(source) = source {
        emission = emission.with_source(source);
    }
    dispatch(shared, emission).await
}

/// Dispatches a prebuilt emission, establishing the reentrancy scope for
/// root emissions.
pub(crate) async fn dispatch(
    shared: Arc<RuntimeShared>,
    emission: Emission,
) -> Result<(), CallError> {
    if EMISSION_STACK.try_with(|_| ()).is_ok() {
        dispatch_guarded(shared, emission).await
    } else {
        EMISSION_STACK
            .scope(RefCell::new(Vec::new()), dispatch_guarded(shared, emission))
            .await
    }
}

async fn dispatch_guarded(
    shared: Arc<RuntimeShared>,
    emission: Emission,
) -> Result<(), CallError> {
    let id = emission.event.clone();
    let limit = shared.dispatcher.depth_limit;

    EMISSION_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        if stack.contains(&id) {
            return Err(CallError::EmissionCycle {
                id: id.clone(),
                stack: stack.clone(),
            });
        }
        if limit > 0 && stack.len() >= limit {
            return Err(CallError::EmissionDepth {
                id: id.clone(),
                limit,
            });
        }
        stack.push(id.clone());
        Ok(())
    })?;

    let result = deliver(shared, emission).await;

    EMISSION_STACK.with(|stack| {
        stack.borrow_mut().pop();
    });
    result
}

/// Runs the emission-interceptor onion around listener delivery.
async fn deliver(shared: Arc<RuntimeShared>, emission: Emission) -> Result<(), CallError> {
    let layers: Vec<EmitInterceptor> = shared.dispatcher.emit_layers.read().clone();

    let inner_shared = Arc::clone(&shared);
    let mut next: EmitNext = Arc::new(move |em: Emission| {
        let shared = Arc::clone(&inner_shared);
        Box::pin(run_listeners(shared, em))
    });
    for layer in layers.into_iter().rev() {
        let inner = Arc::clone(&next);
        next = Arc::new(move |em: Emission| layer(Arc::clone(&inner), em));
    }
    next(emission).await
}

/// Invokes matching listeners: specific first, then wildcard.
async fn run_listeners(shared: Arc<RuntimeShared>, emission: Emission) -> Result<(), CallError> {
    let no_wildcard = Id::new(NO_WILDCARD_ID);

    let routes: Vec<Route> = {
        let mut list = shared
            .dispatcher
            .routes
            .read()
            .get(&emission.event)
            .cloned()
            .unwrap_or_default();

        let skip_wildcard = {
            let registry = shared.registry.read();
            registry
                .event(&emission.event)
                .map(|entry| entry.def.carries_tag(&no_wildcard))
                .unwrap_or(false)
        };
        if !skip_wildcard {
            list.extend(shared.dispatcher.wildcard.read().iter().cloned());
        }
        list
    };

    let hook_layers: Vec<HookInterceptor> = shared.dispatcher.hook_layers.read().clone();

    for route in routes {
        if emission.is_stopped() {
            break;
        }

        // Hooks activate at their topological position; an init-phase
        // emission occurring before a hook's dependencies materialized
        // skips that hook.
        let (def, deps) = {
            let registry = shared.registry.read();
            match registry.hook(&route.hook) {
                Some(entry) => match entry.resolved.clone() {
                    Some(deps) => (Arc::clone(&entry.def), deps),
                    None => continue,
                },
                None => continue,
            }
        };

        let ctx = HookContext {
            deps,
            cancel: shared.cancel.child_token(),
        };

        let mut call: EmitNext = Arc::new(move |em: Emission| def.invoke(em, ctx.clone()));
        for layer in hook_layers.iter().rev() {
            let inner = Arc::clone(&call);
            let layer = Arc::clone(layer);
            call = Arc::new(move |em: Emission| layer(Arc::clone(&inner), em));
        }
        call(emission.clone()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::def::{
        DependencyMap, DependencyRef, EventDef, HookDef, Id, ResourceDef, TagRef,
    };
    use crate::dynamic::{dynamic, unit};
    use crate::events::lifecycle::NO_WILDCARD_ID;
    use crate::events::EventControl;
    use crate::runtime::{run, Orchestrator, RunOptions};

    type Log = Arc<Mutex<Vec<String>>>;

    fn record_hook(log: &Log, event: &str, label: &'static str, order: i32) -> Arc<HookDef> {
        let log = Arc::clone(log);
        HookDef::on(event, move |_em, _ctx| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(label.to_string());
                Ok(())
            }
        })
        .with_order(order)
    }

    fn record_wildcard(log: &Log, order: i32) -> Arc<HookDef> {
        let log = Arc::clone(log);
        HookDef::on_all(move |em, _ctx| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(format!("*{}", em.event));
                Ok(())
            }
        })
        .with_order(order)
    }

    #[tokio::test]
    async fn test_specific_hooks_run_before_wildcard_in_declared_order() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let ping = EventDef::new("ping");
        // The wildcard's lower order must not move it ahead of specifics.
        let wild = record_wildcard(&log, -100);
        let second = record_hook(&log, "ping", "second", 5);
        let first = record_hook(&log, "ping", "first", -5);

        let root = ResourceDef::new("root")
            .with_register([ping.into(), wild.into(), second.into(), first.into()]);

        let handle = run(root).await.expect("runs");
        handle.emit("ping", None).await.expect("emits");
        assert_eq!(*log.lock(), vec!["first", "second", "*ping"]);
    }

    #[tokio::test]
    async fn test_equal_order_ties_break_by_registration() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let ping = EventDef::new("ping");
        let a = record_hook(&log, "ping", "registered-first", 0);
        let b = record_hook(&log, "ping", "registered-second", 0);

        let root = ResourceDef::new("root").with_register([ping.into(), a.into(), b.into()]);

        let handle = run(root).await.expect("runs");
        handle.emit("ping", None).await.expect("emits");
        assert_eq!(*log.lock(), vec!["registered-first", "registered-second"]);
    }

    #[tokio::test]
    async fn test_stop_propagation_skips_remaining_listeners() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let ping = EventDef::new("ping");

        let stop_log = Arc::clone(&log);
        let stopper = HookDef::on("ping", move |em, _ctx| {
            let log = Arc::clone(&stop_log);
            async move {
                log.lock().push("stopper".into());
                em.stop_propagation();
                Ok(())
            }
        })
        .with_order(0);
        let late = record_hook(&log, "ping", "late", 10);
        let wild = record_wildcard(&log, 0);

        let root = ResourceDef::new("root")
            .with_register([ping.into(), stopper.into(), late.into(), wild.into()]);

        let handle = run(root).await.expect("runs");
        handle.emit("ping", None).await.expect("emits");
        assert_eq!(*log.lock(), vec!["stopper"]);
    }

    #[tokio::test]
    async fn test_skip_wildcard_tag_suppresses_wildcard_delivery() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let quiet = EventDef::new("quiet").with_tags([TagRef::new(NO_WILDCARD_ID)]);
        let loud = EventDef::new("loud");
        let wild = record_wildcard(&log, 0);

        let root =
            ResourceDef::new("root").with_register([quiet.into(), loud.into(), wild.into()]);

        let handle = run(root).await.expect("runs");
        handle.emit("quiet", None).await.expect("emits");
        handle.emit("loud", None).await.expect("emits");
        assert_eq!(*log.lock(), vec!["*loud"]);
    }

    #[tokio::test]
    async fn test_reentrant_emission_fails_with_cycle() {
        let ping = EventDef::new("ping");
        let echo = HookDef::on("ping", |_em, ctx| async move {
            ctx.deps.emitter("ping")?.emit(None).await
        })
        .with_deps(DependencyMap::new().with("ping", DependencyRef::Event(Id::new("ping"))));

        let root = ResourceDef::new("root").with_register([ping.into(), echo.into()]);

        let handle = run(root).await.expect("static graph is acyclic");
        let err = handle.emit("ping", None).await.expect_err("runtime cycle");
        assert_eq!(err.as_label(), "call_emission_cycle");
        assert!(err.as_message().contains("ping"), "got: {}", err.as_message());
    }

    #[tokio::test]
    async fn test_depth_limit_bounds_nesting() {
        let a = EventDef::new("a");
        let b = EventDef::new("b");
        let chain = HookDef::on("a", |_em, ctx| async move {
            ctx.deps.emitter("b")?.emit(None).await
        })
        .with_deps(DependencyMap::new().with("b", DependencyRef::Event(Id::new("b"))));

        let root = ResourceDef::new("root")
            .with_register([a.into(), b.into(), chain.into()]);

        let handle = Orchestrator::new(root)
            .with_options(RunOptions {
                emission_depth: 1,
                ..RunOptions::default()
            })
            .start()
            .await
            .expect("builds");

        let err = handle.emit("a", None).await.expect_err("nested past limit");
        assert_eq!(err.as_label(), "call_emission_depth");
    }

    #[tokio::test]
    async fn test_depth_zero_means_unlimited() {
        let a = EventDef::new("a");
        let b = EventDef::new("b");
        let chain = HookDef::on("a", |_em, ctx| async move {
            ctx.deps.emitter("b")?.emit(None).await
        })
        .with_deps(DependencyMap::new().with("b", DependencyRef::Event(Id::new("b"))));

        let root = ResourceDef::new("root")
            .with_register([a.into(), b.into(), chain.into()]);

        let handle = run(root).await.expect("builds");
        handle.emit("a", None).await.expect("default depth never trips");
    }

    #[tokio::test]
    async fn test_emission_interceptors_wrap_in_install_order() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let ping = EventDef::new("ping");
        let seen = record_hook(&log, "ping", "hook", 0);

        let installer_log = Arc::clone(&log);
        let installer = ResourceDef::new("installer").with_init(move |_cfg, ctx| {
            let log = Arc::clone(&installer_log);
            async move {
                let outer = Arc::clone(&log);
                ctx.events.intercept_emissions(move |next, em| {
                    let log = Arc::clone(&outer);
                    async move {
                        log.lock().push("outer-before".into());
                        let out = next(em).await;
                        log.lock().push("outer-after".into());
                        out
                    }
                })?;
                let inner = Arc::clone(&log);
                ctx.events.intercept_emissions(move |next, em| {
                    let log = Arc::clone(&inner);
                    async move {
                        log.lock().push("inner-before".into());
                        let out = next(em).await;
                        log.lock().push("inner-after".into());
                        out
                    }
                })?;
                Ok(unit())
            }
        });

        let root = ResourceDef::new("root")
            .with_register([ping.into(), seen.into(), installer.into()]);

        let handle = run(root).await.expect("runs");
        // Lifecycle emissions during init also pass the interceptors.
        log.lock().clear();

        handle.emit("ping", None).await.expect("emits");
        assert_eq!(
            *log.lock(),
            vec!["outer-before", "inner-before", "hook", "inner-after", "outer-after"]
        );
    }

    #[tokio::test]
    async fn test_hook_interceptors_wrap_each_listener() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let ping = EventDef::new("ping");
        let h1 = record_hook(&log, "ping", "h1", 0);
        let h2 = record_hook(&log, "ping", "h2", 1);

        let installer_log = Arc::clone(&log);
        let installer = ResourceDef::new("installer").with_init(move |_cfg, ctx| {
            let log = Arc::clone(&installer_log);
            async move {
                let wrap = Arc::clone(&log);
                ctx.events.intercept_hooks(move |next, em| {
                    let log = Arc::clone(&wrap);
                    async move {
                        log.lock().push("wrap-before".into());
                        let out = next(em).await;
                        log.lock().push("wrap-after".into());
                        out
                    }
                })?;
                Ok(unit())
            }
        });

        let root = ResourceDef::new("root")
            .with_register([ping.into(), h1.into(), h2.into(), installer.into()]);

        let handle = run(root).await.expect("runs");
        log.lock().clear();

        handle.emit("ping", None).await.expect("emits");
        assert_eq!(
            *log.lock(),
            vec![
                "wrap-before",
                "h1",
                "wrap-after",
                "wrap-before",
                "h2",
                "wrap-after"
            ]
        );
    }

    #[tokio::test]
    async fn test_interceptor_install_after_lock_fails() {
        let keeper = ResourceDef::new("keeper")
            .with_init(|_cfg, ctx| async move { Ok(dynamic(ctx.events.clone())) });
        let root = ResourceDef::new("root").with_register([keeper.into()]);

        let handle = run(root).await.expect("runs");
        let control = handle
            .resource_value_as::<EventControl>("keeper")
            .expect("keeper stores its control surface");
        let err = control
            .intercept_emissions(|next, em| async move { next(em).await })
            .expect_err("runtime is locked after start");
        assert_eq!(err.as_label(), "call_locked");
    }
}

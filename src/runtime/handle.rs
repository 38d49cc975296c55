//! # Run handle.
//!
//! The live object returned by the orchestrator: task invocation, event
//! emission, resource value/config lookup, registry queries, and
//! idempotent disposal.
//!
//! ## Lifecycle
//! `active → disposing → disposed`. Once disposed, every method except
//! [`dispose`](RunHandle::dispose) fails fast with a disposed error.
//! Concurrent `dispose()` calls share the same pending outcome; a failed
//! disposal resets the handle so a later call retries the full teardown,
//! skipping only resources that already disposed successfully.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::def::{DefKind, Id};
use crate::dynamic::Dynamic;
use crate::error::CallError;
use crate::events::emit_event;
use crate::pipeline;

use super::shared::RuntimeShared;

type DisposeFuture = Shared<BoxFuture<'static, Result<(), CallError>>>;

enum HandleState {
    Active,
    Disposing(DisposeFuture),
    Disposed,
}

/// Live handle to a running (or dry-run) tree.
pub struct RunHandle {
    shared: Arc<RuntimeShared>,
    cancel: CancellationToken,
    state: Mutex<HandleState>,
}

impl RunHandle {
    pub(crate) fn new(shared: Arc<RuntimeShared>, cancel: CancellationToken) -> Self {
        Self {
            shared,
            cancel,
            state: Mutex::new(HandleState::Active),
        }
    }

    fn ensure_active(&self) -> Result<(), CallError> {
        match &*self.state.lock() {
            HandleState::Active => Ok(()),
            _ => Err(CallError::Disposed),
        }
    }

    /// True once disposal completed successfully.
    pub fn is_disposed(&self) -> bool {
        matches!(&*self.state.lock(), HandleState::Disposed)
    }

    /// Invokes a task by definition or id.
    ///
    /// Returns the task's (possibly listener-mutated) result, or `None`
    /// when an error listener suppressed a failure.
    pub async fn run_task(
        &self,
        task: impl Into<Id>,
        input: Option<Dynamic>,
    ) -> Result<Option<Dynamic>, CallError> {
        self.ensure_active()?;
        pipeline::invoke_task(
            Arc::clone(&self.shared),
            task.into(),
            input,
            self.cancel.child_token(),
        )
        .await
    }

    /// Emits an event by definition or id, delivering to all matching
    /// listeners.
    pub async fn emit(
        &self,
        event: impl Into<Id>,
        payload: Option<Dynamic>,
    ) -> Result<(), CallError> {
        self.ensure_active()?;
        emit_event(Arc::clone(&self.shared), event.into(), payload, None).await
    }

    /// The resolved value of a resource, by definition or id.
    pub fn resource_value(&self, resource: impl Into<Id>) -> Result<Dynamic, CallError> {
        self.ensure_active()?;
        let id = resource.into();
        let registry = self.shared.registry.read();
        let entry = registry.resource(&id).ok_or_else(|| CallError::NotFound {
            kind: DefKind::Resource,
            id: id.clone(),
        })?;
        entry.value.clone().ok_or(CallError::NotReady { id })
    }

    /// The resolved value of a resource, downcast to `T`.
    pub fn resource_value_as<T: Send + Sync + 'static>(
        &self,
        resource: impl Into<Id>,
    ) -> Result<Arc<T>, CallError> {
        let id = resource.into();
        let value = self.resource_value(id.clone())?;
        crate::dynamic::downcast::<T>(value).ok_or_else(|| {
            CallError::fail(format!("resource '{id}' holds a different type than requested"))
        })
    }

    /// A resource's captured configuration, by definition or id.
    pub fn resource_config(&self, resource: impl Into<Id>) -> Result<Option<Dynamic>, CallError> {
        self.ensure_active()?;
        let id = resource.into();
        let registry = self.shared.registry.read();
        let entry = registry.resource(&id).ok_or(CallError::NotFound {
            kind: DefKind::Resource,
            id,
        })?;
        Ok(entry.def.config().cloned())
    }

    /// The root resource's resolved value.
    pub fn root_value(&self) -> Result<Dynamic, CallError> {
        self.resource_value(self.shared.root.clone())
    }

    /// Sorted ids of every registered task.
    pub fn task_ids(&self) -> Vec<Id> {
        self.shared.registry.read().task_ids()
    }

    /// Sorted ids of every registered event.
    pub fn event_ids(&self) -> Vec<Id> {
        self.shared.registry.read().event_ids()
    }

    /// Sorted task ids restricted to an allow-list.
    ///
    /// Read-only registry query for exposure layers that publish a
    /// controlled subset of the tree.
    pub fn exposed_task_ids(&self, allow: &[&str]) -> Vec<Id> {
        self.task_ids()
            .into_iter()
            .filter(|id| allow.contains(&id.as_str()))
            .collect()
    }

    /// Sorted event ids restricted to an allow-list.
    pub fn exposed_event_ids(&self, allow: &[&str]) -> Vec<Id> {
        self.event_ids()
            .into_iter()
            .filter(|id| allow.contains(&id.as_str()))
            .collect()
    }

    /// Tears down initialized resources in reverse dependency order.
    ///
    /// Idempotent: after a successful disposal, later calls resolve
    /// immediately without re-invoking dispose hooks. Concurrent calls
    /// while one teardown is in flight receive the same outcome. After a
    /// failure the handle returns to active and a later call retries.
    pub async fn dispose(&self) -> Result<(), CallError> {
        let fut = {
            let mut state = self.state.lock();
            match &*state {
                HandleState::Disposed => return Ok(()),
                HandleState::Disposing(fut) => fut.clone(),
                HandleState::Active => {
                    let fut: DisposeFuture =
                        dispose_all(Arc::clone(&self.shared)).boxed().shared();
                    *state = HandleState::Disposing(fut.clone());
                    fut
                }
            }
        };

        let result = fut.await;

        let mut state = self.state.lock();
        match &result {
            Ok(()) => *state = HandleState::Disposed,
            Err(_) => {
                if matches!(&*state, HandleState::Disposing(_)) {
                    *state = HandleState::Active;
                }
            }
        }
        result
    }
}

/// Walks initialized resources in reverse topological order, disposing
/// each; collects failures instead of aborting so one bad hook does not
/// strand later resources.
async fn dispose_all(shared: Arc<RuntimeShared>) -> Result<(), CallError> {
    let order = shared.order.get().cloned().unwrap_or_default();
    let resources: Vec<Id> = {
        let registry = shared.registry.read();
        order
            .iter()
            .rev()
            .filter(|id| registry.kind_of(id) == Some(DefKind::Resource))
            .cloned()
            .collect()
    };

    let mut failures = Vec::new();
    for id in resources {
        if let Err(error) = pipeline::dispose_resource(Arc::clone(&shared), id.clone()).await {
            failures.push((id, error.as_message()));
        }
    }

    if failures.is_empty() {
        // Signal any straggling cooperative bodies that the tree is gone.
        shared.cancel.cancel();
        Ok(())
    } else {
        Err(CallError::Disposal { failures })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::def::{DependencyMap, DependencyRef, EventDef, ResourceDef, TaskDef};
    use crate::dynamic::{dynamic, unit};
    use crate::error::CallError;
    use crate::runtime::run;

    use super::*;

    fn leaf_task(id: &str) -> Arc<TaskDef> {
        TaskDef::from_fn(id, |_input, _ctx| async { Ok(dynamic(())) })
    }

    fn counted_dispose(id: &str, count: &Arc<AtomicU32>) -> Arc<ResourceDef> {
        let count = Arc::clone(count);
        ResourceDef::new(id).with_dispose(move |_value, _ctx| {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_sequential_dispose_runs_hooks_once() {
        let count = Arc::new(AtomicU32::new(0));
        let db = counted_dispose("db", &count);
        let root = ResourceDef::new("root").with_register([db.into()]);

        let handle = run(root).await.expect("runs");
        handle.dispose().await.expect("first dispose");
        handle.dispose().await.expect("second dispose is a no-op");

        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
        assert!(handle.is_disposed());
    }

    #[tokio::test]
    async fn test_concurrent_dispose_shares_outcome() {
        let count = Arc::new(AtomicU32::new(0));
        let slow_count = Arc::clone(&count);
        let slow = ResourceDef::new("slow").with_dispose(move |_value, _ctx| {
            let count = Arc::clone(&slow_count);
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                count.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(())
            }
        });
        let root = ResourceDef::new("root").with_register([slow.into()]);

        let handle = run(root).await.expect("runs");
        let (a, b) = tokio::join!(handle.dispose(), handle.dispose());
        a.expect("first caller");
        b.expect("second caller");

        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disposed_handle_fails_fast() {
        let ping = EventDef::new("ping");
        let store = ResourceDef::new("store").with_init(|_cfg, _ctx| async { Ok(unit()) });
        let root = ResourceDef::new("root")
            .with_register([ping.into(), store.into(), leaf_task("t").into()]);

        let handle = run(root).await.expect("runs");
        handle.dispose().await.expect("disposes");

        let err = handle.run_task("t", None).await.expect_err("disposed");
        assert_eq!(err.as_label(), "call_disposed");
        let err = handle.emit("ping", None).await.expect_err("disposed");
        assert_eq!(err.as_label(), "call_disposed");
        let err = handle.resource_value("store").expect_err("disposed");
        assert_eq!(err.as_label(), "call_disposed");
    }

    #[tokio::test]
    async fn test_failed_disposal_is_retryable() {
        let attempts = Arc::new(AtomicU32::new(0));
        let steady_count = Arc::new(AtomicU32::new(0));

        let flaky_attempts = Arc::clone(&attempts);
        let flaky = ResourceDef::new("flaky").with_dispose(move |_value, _ctx| {
            let attempts = Arc::clone(&flaky_attempts);
            async move {
                if attempts.fetch_add(1, AtomicOrdering::SeqCst) == 0 {
                    Err(CallError::fail("still busy"))
                } else {
                    Ok(())
                }
            }
        });
        let steady = counted_dispose("steady", &steady_count);
        let root = ResourceDef::new("root").with_register([flaky.into(), steady.into()]);

        let handle = run(root).await.expect("runs");

        let err = handle.dispose().await.expect_err("flaky fails the first pass");
        assert_eq!(err.as_label(), "call_disposal");
        assert!(err.as_message().contains("flaky"), "got: {}", err.as_message());
        assert!(!handle.is_disposed(), "failed disposal leaves the handle retryable");

        handle.dispose().await.expect("retry succeeds");
        assert!(handle.is_disposed());
        assert_eq!(attempts.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(
            steady_count.load(AtomicOrdering::SeqCst),
            1,
            "already-disposed resources must not run their hook again"
        );
    }

    #[tokio::test]
    async fn test_disposal_walks_reverse_dependency_order() {
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let r_log = Arc::clone(&log);
        let r = ResourceDef::new("r")
            .with_init(|_cfg, _ctx| async { Ok(dynamic(String::from("A"))) })
            .with_dispose(move |_value, _ctx| {
                let log = Arc::clone(&r_log);
                async move {
                    log.lock().push("r".into());
                    Ok(())
                }
            });

        let s_log = Arc::clone(&log);
        let s = ResourceDef::new("s")
            .with_deps(DependencyMap::new().with("r", DependencyRef::Resource(Id::new("r"))))
            .with_init(|_cfg, _ctx| async { Ok(unit()) })
            .with_dispose(move |_value, _ctx| {
                let log = Arc::clone(&s_log);
                async move {
                    log.lock().push("s".into());
                    Ok(())
                }
            });

        let root = ResourceDef::new("root").with_register([r.into(), s.into()]);
        let handle = run(root).await.expect("runs");
        handle.dispose().await.expect("disposes");

        assert_eq!(*log.lock(), vec!["s", "r"]);
    }

    #[tokio::test]
    async fn test_id_enumeration_is_sorted_and_allow_listed() {
        let root = ResourceDef::new("root").with_register([
            leaf_task("zeta").into(),
            leaf_task("alpha").into(),
            EventDef::new("metrics.flushed").into(),
        ]);

        let handle = run(root).await.expect("runs");

        let ids = handle.task_ids();
        let tasks: Vec<&str> = ids.iter().map(Id::as_str).collect();
        assert_eq!(tasks, vec!["alpha", "zeta"]);

        let exposed = handle.exposed_task_ids(&["zeta", "ghost"]);
        assert_eq!(exposed, vec![Id::new("zeta")]);

        assert!(handle.event_ids().contains(&Id::new("metrics.flushed")));
        assert!(handle.exposed_event_ids(&["nope"]).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let root = ResourceDef::new("root").with_register([leaf_task("t").into()]);
        let handle = run(root).await.expect("runs");

        let err = handle.run_task("missing", None).await.expect_err("unknown task");
        assert_eq!(err.as_label(), "call_not_found");
        let err = handle.emit("missing", None).await.expect_err("unknown event");
        assert_eq!(err.as_label(), "call_not_found");
        let err = handle.resource_value("missing").expect_err("unknown resource");
        assert_eq!(err.as_label(), "call_not_found");
    }
}

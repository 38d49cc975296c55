//! # Execution pipeline.
//!
//! Running a task — or a resource's init/dispose — means running the
//! innermost body wrapped by zero or more middleware:
//!
//! ```text
//! everywhere-mw (registration order, outermost)
//!   └─ locally attached mw (declared order)
//!        └─ input validator ─► body ─► result validator
//! ```
//!
//! The middleware list is an explicit ordered vector reduced
//! right-to-left into one composed invocable; the first entry is
//! outermost. A middleware attached both globally and locally runs once,
//! at its local position. An everywhere middleware is skipped for
//! targets it directly depends on.
//!
//! After the onion resolves, the after-run lifecycle event fires with
//! the value and a mutator (last mutation wins). If the onion rejects,
//! the failure lifecycle event fires with `suppress()`; a suppressed
//! failure yields no value to the caller instead of an error.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::def::{
    DefKind, Id, MiddlewareContext, MiddlewareDef, MiddlewareRef, Next, PipelineKind,
    ResourceContext, ResourceDef, TaskContext, TaskDef,
};
use crate::dynamic::{unit, Dynamic};
use crate::error::CallError;
use crate::events::lifecycle::{
    RunFailure, RunOutput, DISPOSE_FAILED_ID, RESOURCE_FAILED_ID, RESOURCE_READY_ID,
    TASK_AFTER_RUN_ID, TASK_FAILED_ID,
};
use crate::events::{dispatch, Emission};
use crate::resolve::ResolvedDeps;
use crate::runtime::RuntimeShared;

/// One layer of a composed chain: the middleware plus its invocation
/// context.
struct Layer {
    def: Arc<MiddlewareDef>,
    deps: ResolvedDeps,
}

/// Collects the effective middleware chain for `target`, outermost
/// first: everywhere middleware in registration order, then local
/// attachments in declared order.
fn collect_chain(
    shared: &Arc<RuntimeShared>,
    target: &Id,
    kind: PipelineKind,
    locals: &[MiddlewareRef],
) -> Vec<Layer> {
    let registry = shared.registry.read();
    let mut chain = Vec::new();

    for entry in registry.middleware_entries() {
        let scope = entry.def.everywhere_scope();
        let applies = match kind {
            PipelineKind::Task => scope.tasks,
            PipelineKind::ResourceInit | PipelineKind::ResourceDispose => scope.resources,
        };
        if !applies {
            continue;
        }
        // Local attachment takes precedence in ordering closeness.
        if locals.iter().any(|l| &l.id == entry.def.id()) {
            continue;
        }
        // An everywhere middleware never wraps its own dependencies.
        let depends_on_target = entry
            .plan
            .as_ref()
            .map(|plan| plan.iter().any(|(_, dep)| dep.target() == target))
            .unwrap_or(false);
        if depends_on_target {
            continue;
        }
        chain.push(Layer {
            def: Arc::clone(&entry.def),
            deps: entry
                .resolved
                .clone()
                .unwrap_or_else(ResolvedDeps::empty),
        });
    }

    for attachment in locals {
        if let Some(entry) = registry.middleware(&attachment.id) {
            chain.push(Layer {
                def: Arc::clone(&entry.def),
                deps: entry
                    .resolved
                    .clone()
                    .unwrap_or_else(ResolvedDeps::empty),
            });
        }
    }

    chain
}

/// Reduces the chain right-to-left into one composed invocable.
fn compose(
    chain: Vec<Layer>,
    target: Id,
    kind: PipelineKind,
    cancel: CancellationToken,
    innermost: Next,
) -> Next {
    let mut next = innermost;
    for layer in chain.into_iter().rev() {
        let inner = next;
        let def = layer.def;
        let ctx = MiddlewareContext {
            target: target.clone(),
            kind,
            config: def.config().cloned(),
            deps: layer.deps,
            cancel: cancel.clone(),
        };
        next = Arc::new(move |input: Option<Dynamic>| {
            def.wrap(ctx.clone(), input, Arc::clone(&inner))
        });
    }
    next
}

/// Runs a task through validators, middleware, and lifecycle events.
///
/// Returns the (possibly listener-mutated) value, or `None` when a
/// failure was suppressed by an error listener.
pub(crate) async fn invoke_task(
    shared: Arc<RuntimeShared>,
    id: Id,
    input: Option<Dynamic>,
    cancel: CancellationToken,
) -> Result<Option<Dynamic>, CallError> {
    if cancel.is_cancelled() {
        return Err(CallError::Canceled);
    }

    let (def, deps): (Arc<TaskDef>, ResolvedDeps) = {
        let registry = shared.registry.read();
        let entry = registry.task(&id).ok_or_else(|| CallError::NotFound {
            kind: DefKind::Task,
            id: id.clone(),
        })?;
        (
            Arc::clone(&entry.def),
            entry.resolved.clone().unwrap_or_else(ResolvedDeps::empty),
        )
    };

    let chain = collect_chain(&shared, &id, PipelineKind::Task, def.middleware());

    let innermost: Next = {
        let def = Arc::clone(&def);
        let id = id.clone();
        let cancel = cancel.clone();
        Arc::new(move |input: Option<Dynamic>| {
            let def = Arc::clone(&def);
            let deps = deps.clone();
            let id = id.clone();
            let cancel = cancel.clone();
            Box::pin(async move {
                let input = match (def.input_validator(), input) {
                    (Some(validator), Some(data)) => Some(validator.parse(data).map_err(
                        |message| CallError::Validation {
                            id: id.clone(),
                            message,
                        },
                    )?),
                    (_, input) => input,
                };
                let value = def.invoke(input, TaskContext { deps, cancel }).await?;
                match def.result_validator() {
                    Some(validator) => {
                        validator
                            .parse(value)
                            .map_err(|message| CallError::Validation { id, message })
                    }
                    None => Ok(value),
                }
            })
        })
    };

    let onion = compose(chain, id.clone(), PipelineKind::Task, cancel, innermost);
    let outcome = onion(input).await;
    settle(
        shared,
        id,
        outcome,
        TASK_AFTER_RUN_ID,
        TASK_FAILED_ID,
    )
    .await
}

/// Fires the after-run / failure lifecycle pair and applies the
/// mutation/suppression contract to `outcome`.
async fn settle(
    shared: Arc<RuntimeShared>,
    id: Id,
    outcome: Result<Dynamic, CallError>,
    after_event: &'static str,
    failed_event: &'static str,
) -> Result<Option<Dynamic>, CallError> {
    match outcome {
        Ok(value) => {
            let payload = RunOutput::new(id.clone(), value);
            let data: Dynamic = payload.clone();
            dispatch(
                Arc::clone(&shared),
                Emission::new(after_event).with_source(id).with_data(data),
            )
            .await?;
            Ok(Some(payload.value()))
        }
        Err(error) => {
            let payload = RunFailure::new(id.clone(), error.as_label(), error.as_message());
            let data: Dynamic = payload.clone();
            dispatch(
                Arc::clone(&shared),
                Emission::new(failed_event).with_source(id).with_data(data),
            )
            .await?;
            if payload.is_suppressed() {
                Ok(None)
            } else {
                Err(error)
            }
        }
    }
}

/// Initializes one resource: validators, middleware, lifecycle, then
/// stores the value. At-most-once; an already-initialized resource is a
/// no-op.
pub(crate) async fn init_resource(shared: Arc<RuntimeShared>, id: Id) -> Result<(), CallError> {
    let (def, deps, config): (Arc<ResourceDef>, ResolvedDeps, Option<Dynamic>) = {
        let registry = shared.registry.read();
        let entry = registry.resource(&id).ok_or_else(|| CallError::NotFound {
            kind: DefKind::Resource,
            id: id.clone(),
        })?;
        if entry.value.is_some() {
            return Ok(());
        }
        (
            Arc::clone(&entry.def),
            entry.resolved.clone().unwrap_or_else(ResolvedDeps::empty),
            entry.def.config().cloned(),
        )
    };

    let cancel = shared.cancel.child_token();
    let chain = collect_chain(&shared, &id, PipelineKind::ResourceInit, def.middleware());

    let innermost: Next = {
        let def = Arc::clone(&def);
        let id = id.clone();
        let cancel = cancel.clone();
        let events = crate::events::EventControl::new(Arc::downgrade(&shared));
        Arc::new(move |config: Option<Dynamic>| {
            let def = Arc::clone(&def);
            let deps = deps.clone();
            let id = id.clone();
            let cancel = cancel.clone();
            let events = events.clone();
            Box::pin(async move {
                let config = match (def.config_validator(), config) {
                    (Some(validator), Some(data)) => Some(validator.parse(data).map_err(
                        |message| CallError::Validation {
                            id: id.clone(),
                            message,
                        },
                    )?),
                    (_, config) => config,
                };
                let ctx = ResourceContext {
                    deps,
                    cancel,
                    events,
                };
                let value = match def.invoke_init(config, ctx) {
                    Some(fut) => fut.await?,
                    None => unit(),
                };
                match def.value_validator() {
                    Some(validator) => {
                        validator
                            .parse(value)
                            .map_err(|message| CallError::Validation { id, message })
                    }
                    None => Ok(value),
                }
            })
        })
    };

    let onion = compose(
        chain,
        id.clone(),
        PipelineKind::ResourceInit,
        cancel,
        innermost,
    );
    let outcome = onion(config).await;
    let value = settle(
        Arc::clone(&shared),
        id.clone(),
        outcome,
        RESOURCE_READY_ID,
        RESOURCE_FAILED_ID,
    )
    .await?
    // A suppressed init failure leaves the unit value behind.
    .unwrap_or_else(unit);

    let mut registry = shared.registry.write();
    if let Some(entry) = registry.resource_mut(&id) {
        if entry.value.is_none() {
            entry.value = Some(value);
        }
    }
    Ok(())
}

/// Disposes one resource: middleware, dispose hook, lifecycle.
///
/// Failure leaves the entry un-disposed so a later teardown retries it;
/// a suppressed failure counts as success.
pub(crate) async fn dispose_resource(shared: Arc<RuntimeShared>, id: Id) -> Result<(), CallError> {
    let (def, deps, value): (Arc<ResourceDef>, ResolvedDeps, Dynamic) = {
        let registry = shared.registry.read();
        let entry = match registry.resource(&id) {
            Some(entry) => entry,
            None => return Ok(()),
        };
        if entry.disposed {
            return Ok(());
        }
        let value = match entry.value.clone() {
            Some(value) => value,
            // Never initialized (dry run or failed setup): nothing to do.
            None => return Ok(()),
        };
        (
            Arc::clone(&entry.def),
            entry.resolved.clone().unwrap_or_else(ResolvedDeps::empty),
            value,
        )
    };

    if !def.has_dispose() {
        mark_disposed(&shared, &id);
        return Ok(());
    }

    let cancel = shared.cancel.child_token();
    let chain = collect_chain(&shared, &id, PipelineKind::ResourceDispose, def.middleware());

    let innermost: Next = {
        let def = Arc::clone(&def);
        let cancel = cancel.clone();
        let events = crate::events::EventControl::new(Arc::downgrade(&shared));
        Arc::new(move |value: Option<Dynamic>| {
            let def = Arc::clone(&def);
            let deps = deps.clone();
            let cancel = cancel.clone();
            let events = events.clone();
            Box::pin(async move {
                let ctx = ResourceContext {
                    deps,
                    cancel,
                    events,
                };
                if let Some(fut) = def.invoke_dispose(value.unwrap_or_else(unit), ctx) {
                    fut.await?;
                }
                Ok(unit())
            })
        })
    };

    let onion = compose(
        chain,
        id.clone(),
        PipelineKind::ResourceDispose,
        cancel,
        innermost,
    );

    match onion(Some(value)).await {
        Ok(_) => {
            mark_disposed(&shared, &id);
            Ok(())
        }
        Err(error) => {
            let payload = RunFailure::new(id.clone(), error.as_label(), error.as_message());
            let data: Dynamic = payload.clone();
            dispatch(
                Arc::clone(&shared),
                Emission::new(DISPOSE_FAILED_ID)
                    .with_source(id.clone())
                    .with_data(data),
            )
            .await?;
            if payload.is_suppressed() {
                mark_disposed(&shared, &id);
                Ok(())
            } else {
                Err(error)
            }
        }
    }
}

fn mark_disposed(shared: &Arc<RuntimeShared>, id: &Id) {
    let mut registry = shared.registry.write();
    if let Some(entry) = registry.resource_mut(id) {
        entry.disposed = true;
    }
}

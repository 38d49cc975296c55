//! # taskwire
//!
//! **Taskwire** is a dependency-injection and execution runtime for Rust.
//!
//! Applications declare four primitive kinds — tasks (callable units of
//! work), resources (long-lived singletons with init/dispose lifecycle),
//! events (typed notifications), and middleware (composable wrappers) —
//! plus hooks (event listeners) and tags. Declarations are independent of
//! registration order; the runtime resolves a legal initialization order,
//! wires dependencies, detects reference cycles before anything runs, and
//! executes call chains with deterministic ordering guarantees.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │   TaskDef    │   │ ResourceDef  │   │  HookDef /   │
//!     │ (unit of     │   │ (singleton,  │   │  EventDef /  │
//!     │  work)       │   │  registers   │   │  Middleware  │
//!     └──────┬───────┘   │  children)   │   └──────┬───────┘
//!            │           └──────┬───────┘          │
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │  Orchestrator (one invocation = one runtime)                  │
//! │  - Registry (recursive registration, overrides, lock)         │
//! │  - DepGraph (petgraph DAG, cycle enumeration via SCCs)        │
//! │  - Resolver (plans → handles/slots/emitters/accessors)        │
//! │  - Dispatcher (ordered listeners, interception, reentrancy)   │
//! │  - Pipeline (middleware onion, validators, lifecycle events)  │
//! └──────────────────────────────┬────────────────────────────────┘
//!                                ▼
//!                       ┌────────────────┐
//!                       │   RunHandle    │
//!                       │ run_task/emit/ │
//!                       │ values/dispose │
//!                       └────────────────┘
//! ```
//!
//! ### Lifecycle
//! ```text
//! run(root) ──► register (depth-first, recursive)
//!                 ├─► apply overrides (root-closest wins)
//!                 ├─► build graph ─► detect cycles (fatal if any)
//!                 ├─► check plans (missing non-optional deps fatal)
//!                 ├─► per definition, in topological order:
//!                 │     materialize resolved deps
//!                 │     init resource (root last; skipped in dry-run)
//!                 └─► lock ─► RunHandle
//!
//! handle.dispose() ──► reverse topological teardown
//!                        ├─ concurrent calls share one outcome
//!                        └─ failure leaves the handle retryable
//! ```
//!
//! ## Features
//! | Area            | Description                                                   | Key types / traits                       |
//! |-----------------|---------------------------------------------------------------|------------------------------------------|
//! | **Definitions** | Declare tasks, resources, events, hooks, middleware, tags.    | [`TaskDef`], [`ResourceDef`], [`HookDef`]|
//! | **Dependencies**| Named refs, tag expansion, optional wrappers.                 | [`DependencyMap`], [`DependencyRef`]     |
//! | **Events**      | Ordered dispatch, wildcard hooks, interception, propagation.  | [`Emission`], [`EventControl`]           |
//! | **Pipeline**    | Middleware onion, validators, result mutation, suppression.   | [`MiddlewareDef`], [`lifecycle`]         |
//! | **Orchestration**| Assemble, initialize, and tear down a tree.                  | [`Orchestrator`], [`RunHandle`]          |
//! | **Errors**      | Typed setup and invocation errors.                            | [`BuildError`], [`CallError`]            |
//! | **Configuration**| Centralize per-invocation settings.                          | [`RunOptions`]                           |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`log_writer`] hook _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use taskwire::{downcast_ref, dynamic, run, DependencyMap, DependencyRef, ResourceDef};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // A leaf resource producing "A".
//!     let base = ResourceDef::new("base")
//!         .with_init(|_cfg, _ctx| async { Ok(dynamic(String::from("A"))) });
//!
//!     // The root registers `base`, depends on it, and produces "A-B".
//!     let root = ResourceDef::new("app")
//!         .with_register([base.into()])
//!         .with_deps(DependencyMap::new().with("base", DependencyRef::Resource("base".into())))
//!         .with_init(|_cfg, ctx| async move {
//!             let base = ctx.deps.resource_as::<String>("base")?;
//!             Ok(dynamic(format!("{base}-B")))
//!         });
//!
//!     let handle = run(root).await?;
//!     let value = handle.root_value()?;
//!     assert_eq!(downcast_ref::<String>(&value).unwrap(), "A-B");
//!
//!     handle.dispose().await?;
//!     Ok(())
//! }
//! ```

mod def;
mod dynamic;
mod error;
mod events;
mod graph;
mod pipeline;
mod resolve;
mod runtime;
mod store;
mod validate;

// ---- Public re-exports ----

pub use def::{
    DefKind, Definition, DependencyMap, DependencyRef, DependencySpec, EventDef, Everywhere,
    HookContext, HookDef, HookTarget, Id, MiddlewareContext, MiddlewareDef, MiddlewareRef, Next,
    PipelineKind, RegisterItem, RegisterSpec, ResourceContext, ResourceDef, TagDef, TagRef,
    TaskContext, TaskDef, TaskLogic,
};
pub use dynamic::{downcast, downcast_ref, dynamic, unit, Dynamic};
pub use error::{BuildError, CallError};
pub use events::{
    lifecycle, EmitInterceptor, EmitNext, Emission, EventControl, HookInterceptor,
};
pub use resolve::{
    EventEmitter, InterceptLayer, Resolved, ResolvedDeps, ResourceSlot, TagAccessor, TaggedEntry,
    TaskHandle, TaskInvoke,
};
pub use runtime::{dry_run, run, Orchestrator, RunHandle, RunOptions};
pub use validate::Validator;

// Optional: expose a simple built-in logging hook (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
mod log;
#[cfg(feature = "logging")]
pub use log::log_writer;

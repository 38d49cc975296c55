//! # Dependency resolver.
//!
//! Two stages over one topological order:
//!
//! 1. **Plan check** — every definition's evaluated dependency map is
//!    verified: a non-optional entry whose target is unregistered (or
//!    registered as a different kind) fails, naming the requester and
//!    the missing id. Runs in dry-run mode too.
//! 2. **Materialize** — each entry is substituted with the concrete
//!    value the body receives: task → invocable handle, resource →
//!    value slot, event → emitter, tag → accessor snapshot, optional
//!    missing → absent.
//!
//! Task handles materialized into a resource's context expose local
//! interception; elsewhere they do not.

mod materialize;
mod tags;

pub use materialize::{
    EventEmitter, InterceptLayer, Resolved, ResolvedDeps, ResourceSlot, TaskHandle, TaskInvoke,
};
pub use tags::{TagAccessor, TaggedEntry};

use std::sync::Arc;

use crate::def::{DefKind, DependencyMap, DependencyRef, Id};
use crate::error::BuildError;
use crate::runtime::RuntimeShared;
use crate::store::Registry;

/// Verifies one definition's evaluated dependency map against the
/// registry.
pub(crate) fn check_plan(
    registry: &Registry,
    requester: &Id,
    plan: &DependencyMap,
) -> Result<(), BuildError> {
    for (_, dep) in plan.iter() {
        let target = dep.target();
        let expected = match dep.unwrapped() {
            DependencyRef::Task(_) => DefKind::Task,
            DependencyRef::Resource(_) => DefKind::Resource,
            DependencyRef::Event(_) => DefKind::Event,
            DependencyRef::Tag(_) => DefKind::Tag,
            DependencyRef::Optional(_) => continue,
        };
        let satisfied = registry.kind_of(target) == Some(expected);
        if !satisfied && !dep.is_optional() {
            return Err(BuildError::DependencyNotFound {
                requester: requester.clone(),
                missing: target.clone(),
            });
        }
    }
    Ok(())
}

/// Builds the concrete dependency set for one definition.
///
/// `plan` must have passed [`check_plan`]; unregistered targets are by
/// then known to be optional and resolve absent.
pub(crate) fn materialize(
    shared: &Arc<RuntimeShared>,
    registry: &Registry,
    requester: &Id,
    requester_kind: DefKind,
    plan: &DependencyMap,
) -> ResolvedDeps {
    let weak = Arc::downgrade(shared);
    let interceptable = requester_kind == DefKind::Resource;
    let mut entries = Vec::with_capacity(plan.len());

    for (name, dep) in plan.iter() {
        let target = dep.target().clone();
        let resolved = match dep.unwrapped() {
            DependencyRef::Task(_) => {
                if registry.kind_of(&target) == Some(DefKind::Task) {
                    Resolved::Task(TaskHandle::new(weak.clone(), target, interceptable))
                } else {
                    Resolved::Absent
                }
            }
            DependencyRef::Resource(_) => {
                if registry.kind_of(&target) == Some(DefKind::Resource) {
                    Resolved::Resource(ResourceSlot::new(weak.clone(), target))
                } else {
                    Resolved::Absent
                }
            }
            DependencyRef::Event(_) => {
                if registry.kind_of(&target) == Some(DefKind::Event) {
                    Resolved::Event(EventEmitter::new(
                        weak.clone(),
                        target,
                        Some(requester.clone()),
                    ))
                } else {
                    Resolved::Absent
                }
            }
            DependencyRef::Tag(_) => {
                if registry.kind_of(&target) == Some(DefKind::Tag) {
                    Resolved::Tag(build_accessor(shared, registry, requester, &target))
                } else {
                    Resolved::Absent
                }
            }
            DependencyRef::Optional(_) => Resolved::Absent,
        };
        entries.push((Arc::from(name), resolved));
    }

    ResolvedDeps::from_entries(entries)
}

/// Snapshots everything visible to `requester` that carries `tag`.
fn build_accessor(
    shared: &Arc<RuntimeShared>,
    registry: &Registry,
    requester: &Id,
    tag: &Id,
) -> TagAccessor {
    let weak = Arc::downgrade(shared);
    let mut entries = Vec::new();

    for member in registry.tagged_with(tag) {
        if &member.id == requester {
            continue;
        }
        if !registry.visible_to(&member.id, requester) {
            continue;
        }
        let entry = match member.kind {
            DefKind::Task => TaggedEntry::task(
                member.id.clone(),
                member.config,
                TaskHandle::new(weak.clone(), member.id, false),
            ),
            DefKind::Resource => TaggedEntry::resource(
                member.id.clone(),
                member.config,
                ResourceSlot::new(weak.clone(), member.id),
            ),
            DefKind::Event => TaggedEntry::event(
                member.id.clone(),
                member.config,
                EventEmitter::new(weak.clone(), member.id, Some(requester.clone())),
            ),
            kind => TaggedEntry::inert(member.id, kind, member.config),
        };
        entries.push(entry);
    }

    TagAccessor::new(tag.clone(), entries)
}

//! # Definition registry - the component store.
//!
//! The [`Registry`] holds every registered definition keyed by id, with
//! registration metadata (owner resource, exported flag, registration
//! sequence). Registration is recursive: a resource's registration list —
//! static or computed from its captured configuration — is expanded
//! depth-first, and overrides are collected children-before-parent so
//! that the override discovered closest to the root is applied last and
//! wins.
//!
//! ## Rules
//! - Ids are unique across kinds; a duplicate registration is fatal.
//! - An override whose target was never registered is fatal.
//! - After `lock()`, registration and override application fail; only
//!   runtime bookkeeping (resource values, disposed flags) stays
//!   writable.
//! - Each orchestrator invocation owns its own registry; there are no
//!   process-wide singletons.

use std::collections::HashMap;
use std::sync::Arc;

use crate::def::{
    DefKind, Definition, DependencyMap, EventDef, HookDef, Id, MiddlewareDef, RegisterItem,
    ResourceDef, TagDef, TaskDef,
};
use crate::dynamic::Dynamic;
use crate::error::BuildError;
use crate::resolve::ResolvedDeps;

/// Live record for a registered task.
pub(crate) struct TaskEntry {
    pub def: Arc<TaskDef>,
    pub owner: Option<Id>,
    pub exported: bool,
    pub seq: u64,
    pub plan: Option<DependencyMap>,
    pub resolved: Option<ResolvedDeps>,
}

/// Live record for a registered resource.
pub(crate) struct ResourceEntry {
    pub def: Arc<ResourceDef>,
    pub owner: Option<Id>,
    pub exported: bool,
    pub seq: u64,
    pub plan: Option<DependencyMap>,
    pub resolved: Option<ResolvedDeps>,
    /// Filled during the init phase; at-most-once.
    pub value: Option<Dynamic>,
    /// Set when the dispose hook ran (or was skipped) successfully.
    pub disposed: bool,
}

/// Live record for a registered event.
pub(crate) struct EventEntry {
    pub def: Arc<EventDef>,
    pub owner: Option<Id>,
    pub exported: bool,
    pub seq: u64,
}

/// Live record for a registered hook.
pub(crate) struct HookEntry {
    pub def: Arc<HookDef>,
    pub owner: Option<Id>,
    pub exported: bool,
    pub seq: u64,
    pub plan: Option<DependencyMap>,
    pub resolved: Option<ResolvedDeps>,
}

/// Live record for a registered middleware.
pub(crate) struct MiddlewareEntry {
    pub def: Arc<MiddlewareDef>,
    pub owner: Option<Id>,
    pub exported: bool,
    pub seq: u64,
    pub plan: Option<DependencyMap>,
    pub resolved: Option<ResolvedDeps>,
}

/// Live record for a registered tag.
pub(crate) struct TagEntry {
    pub def: Arc<TagDef>,
    pub owner: Option<Id>,
    pub exported: bool,
    pub seq: u64,
}

/// A definition carrying a tag, as seen by accessors and graph expansion.
pub(crate) struct TaggedMember {
    pub kind: DefKind,
    pub id: Id,
    pub config: Option<Dynamic>,
    pub seq: u64,
}

/// The component store for one orchestrator invocation.
pub(crate) struct Registry {
    index: HashMap<Id, DefKind>,
    order: Vec<Id>,
    seq: u64,

    tasks: HashMap<Id, TaskEntry>,
    resources: HashMap<Id, ResourceEntry>,
    events: HashMap<Id, EventEntry>,
    hooks: HashMap<Id, HookEntry>,
    middleware: HashMap<Id, MiddlewareEntry>,
    tags: HashMap<Id, TagEntry>,

    /// Overrides in application order (children before parents).
    pending_overrides: Vec<Definition>,
    locked: bool,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            index: HashMap::new(),
            order: Vec::new(),
            seq: 0,
            tasks: HashMap::new(),
            resources: HashMap::new(),
            events: HashMap::new(),
            hooks: HashMap::new(),
            middleware: HashMap::new(),
            tags: HashMap::new(),
            pending_overrides: Vec::new(),
            locked: false,
        }
    }

    /// Registers a definition tree rooted at `item`.
    ///
    /// Resources expand their registration lists depth-first; each
    /// resource's overrides are collected after its children's, so the
    /// pending list ends up ordered children-before-parent.
    pub(crate) fn register(
        &mut self,
        item: RegisterItem,
        owner: Option<&Id>,
    ) -> Result<(), BuildError> {
        if self.locked {
            return Err(BuildError::Locked {
                operation: "register a definition",
            });
        }

        let id = item.def.id().clone();
        if let Some(kind) = self.index.get(&id) {
            return Err(BuildError::Duplicate { id, kind: *kind });
        }
        self.index.insert(id.clone(), item.def.kind());
        self.order.push(id.clone());
        let seq = self.seq;
        self.seq += 1;
        let owner = owner.cloned();
        let exported = item.exported;

        match item.def {
            Definition::Task(def) => {
                self.tasks.insert(
                    id,
                    TaskEntry {
                        def,
                        owner,
                        exported,
                        seq,
                        plan: None,
                        resolved: None,
                    },
                );
            }
            Definition::Event(def) => {
                self.events.insert(
                    id,
                    EventEntry {
                        def,
                        owner,
                        exported,
                        seq,
                    },
                );
            }
            Definition::Hook(def) => {
                self.hooks.insert(
                    id,
                    HookEntry {
                        def,
                        owner,
                        exported,
                        seq,
                        plan: None,
                        resolved: None,
                    },
                );
            }
            Definition::Middleware(def) => {
                self.middleware.insert(
                    id,
                    MiddlewareEntry {
                        def,
                        owner,
                        exported,
                        seq,
                        plan: None,
                        resolved: None,
                    },
                );
            }
            Definition::Tag(def) => {
                self.tags.insert(
                    id,
                    TagEntry {
                        def,
                        owner,
                        exported,
                        seq,
                    },
                );
            }
            Definition::Resource(def) => {
                let children = def.register().evaluate(def.config());
                let own_overrides = def.overrides().to_vec();

                self.resources.insert(
                    id.clone(),
                    ResourceEntry {
                        def,
                        owner,
                        exported,
                        seq,
                        plan: None,
                        resolved: None,
                        value: None,
                        disposed: false,
                    },
                );

                for child in children {
                    self.register(child, Some(&id))?;
                }
                self.pending_overrides.extend(own_overrides);
            }
        }
        Ok(())
    }

    /// Merges collected overrides into their targets by id.
    ///
    /// Later entries win, which — given collection order — makes the
    /// override declared closest to the root the effective one. The
    /// override replaces the target's definition; registration metadata
    /// (owner, exported, seq) and the already-expanded registration tree
    /// are preserved.
    pub(crate) fn apply_overrides(&mut self) -> Result<(), BuildError> {
        if self.locked {
            return Err(BuildError::Locked {
                operation: "apply overrides",
            });
        }

        let pending = std::mem::take(&mut self.pending_overrides);
        for replacement in pending {
            let id = replacement.id().clone();
            let expected = match self.index.get(&id) {
                Some(kind) => *kind,
                None => return Err(BuildError::OverrideTargetMissing { id }),
            };
            let found = replacement.kind();
            if expected != found {
                return Err(BuildError::OverrideKindMismatch {
                    id,
                    expected,
                    found,
                });
            }

            match replacement {
                Definition::Task(def) => {
                    if let Some(entry) = self.tasks.get_mut(&id) {
                        entry.def = def;
                    }
                }
                Definition::Resource(def) => {
                    if let Some(entry) = self.resources.get_mut(&id) {
                        entry.def = def;
                    }
                }
                Definition::Event(def) => {
                    if let Some(entry) = self.events.get_mut(&id) {
                        entry.def = def;
                    }
                }
                Definition::Hook(def) => {
                    if let Some(entry) = self.hooks.get_mut(&id) {
                        entry.def = def;
                    }
                }
                Definition::Middleware(def) => {
                    if let Some(entry) = self.middleware.get_mut(&id) {
                        entry.def = def;
                    }
                }
                Definition::Tag(def) => {
                    if let Some(entry) = self.tags.get_mut(&id) {
                        entry.def = def;
                    }
                }
            }
        }
        Ok(())
    }

    /// Freezes the definition maps.
    pub(crate) fn lock(&mut self) {
        self.locked = true;
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.locked
    }

    /// Kind registered under `id`, if any.
    pub(crate) fn kind_of(&self, id: &Id) -> Option<DefKind> {
        self.index.get(id).copied()
    }

    /// Ids in registration order.
    pub(crate) fn registration_order(&self) -> &[Id] {
        &self.order
    }

    pub(crate) fn task(&self, id: &Id) -> Option<&TaskEntry> {
        self.tasks.get(id)
    }

    pub(crate) fn task_mut(&mut self, id: &Id) -> Option<&mut TaskEntry> {
        self.tasks.get_mut(id)
    }

    pub(crate) fn resource(&self, id: &Id) -> Option<&ResourceEntry> {
        self.resources.get(id)
    }

    pub(crate) fn resource_mut(&mut self, id: &Id) -> Option<&mut ResourceEntry> {
        self.resources.get_mut(id)
    }

    pub(crate) fn event(&self, id: &Id) -> Option<&EventEntry> {
        self.events.get(id)
    }

    pub(crate) fn hook(&self, id: &Id) -> Option<&HookEntry> {
        self.hooks.get(id)
    }

    pub(crate) fn hook_mut(&mut self, id: &Id) -> Option<&mut HookEntry> {
        self.hooks.get_mut(id)
    }

    pub(crate) fn middleware(&self, id: &Id) -> Option<&MiddlewareEntry> {
        self.middleware.get(id)
    }

    pub(crate) fn middleware_mut(&mut self, id: &Id) -> Option<&mut MiddlewareEntry> {
        self.middleware.get_mut(id)
    }

    pub(crate) fn tag(&self, id: &Id) -> Option<&TagEntry> {
        self.tags.get(id)
    }

    /// Hook entries in registration order.
    pub(crate) fn hooks(&self) -> Vec<&HookEntry> {
        let mut entries: Vec<&HookEntry> = self.hooks.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    /// Middleware entries in registration order.
    pub(crate) fn middleware_entries(&self) -> Vec<&MiddlewareEntry> {
        let mut entries: Vec<&MiddlewareEntry> = self.middleware.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    /// Sorted list of registered task ids.
    pub(crate) fn task_ids(&self) -> Vec<Id> {
        let mut ids: Vec<Id> = self.tasks.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Sorted list of registered event ids.
    pub(crate) fn event_ids(&self) -> Vec<Id> {
        let mut ids: Vec<Id> = self.events.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Every definition currently carrying `tag`, in registration order.
    pub(crate) fn tagged_with(&self, tag: &Id) -> Vec<TaggedMember> {
        let mut members = Vec::new();
        for id in &self.order {
            let (kind, tags, seq) = match self.index.get(id) {
                Some(DefKind::Task) => match self.tasks.get(id) {
                    Some(e) => (DefKind::Task, e.def.tags().to_vec(), e.seq),
                    None => continue,
                },
                Some(DefKind::Resource) => match self.resources.get(id) {
                    Some(e) => (DefKind::Resource, e.def.tags().to_vec(), e.seq),
                    None => continue,
                },
                Some(DefKind::Event) => match self.events.get(id) {
                    Some(e) => (DefKind::Event, e.def.tags().to_vec(), e.seq),
                    None => continue,
                },
                Some(DefKind::Hook) => match self.hooks.get(id) {
                    Some(e) => (DefKind::Hook, e.def.tags().to_vec(), e.seq),
                    None => continue,
                },
                Some(DefKind::Middleware) => match self.middleware.get(id) {
                    Some(e) => (DefKind::Middleware, e.def.tags().to_vec(), e.seq),
                    None => continue,
                },
                _ => continue,
            };
            if let Some(attachment) = tags.iter().find(|t| &t.id == tag) {
                members.push(TaggedMember {
                    kind,
                    id: id.clone(),
                    config: attachment.config.clone(),
                    seq,
                });
            }
        }
        members
    }

    /// Owner chain of `id`, nearest owner first.
    pub(crate) fn owner_chain(&self, id: &Id) -> Vec<Id> {
        let mut chain = Vec::new();
        let mut current = self.owner_of(id);
        while let Some(owner) = current {
            chain.push(owner.clone());
            current = self.owner_of(&owner);
        }
        chain
    }

    fn owner_of(&self, id: &Id) -> Option<Id> {
        let owner = match self.index.get(id)? {
            DefKind::Task => self.tasks.get(id)?.owner.clone(),
            DefKind::Resource => self.resources.get(id)?.owner.clone(),
            DefKind::Event => self.events.get(id)?.owner.clone(),
            DefKind::Hook => self.hooks.get(id)?.owner.clone(),
            DefKind::Middleware => self.middleware.get(id)?.owner.clone(),
            DefKind::Tag => self.tags.get(id)?.owner.clone(),
        };
        owner
    }

    /// Whether `item` is visible to an accessor requested by `requester`.
    ///
    /// Exported items are visible everywhere. A non-exported item is
    /// visible only within its registering resource's subtree.
    pub(crate) fn visible_to(&self, item: &Id, requester: &Id) -> bool {
        let (exported, owner) = match self.index.get(item) {
            Some(DefKind::Task) => match self.tasks.get(item) {
                Some(e) => (e.exported, e.owner.clone()),
                None => return false,
            },
            Some(DefKind::Resource) => match self.resources.get(item) {
                Some(e) => (e.exported, e.owner.clone()),
                None => return false,
            },
            Some(DefKind::Event) => match self.events.get(item) {
                Some(e) => (e.exported, e.owner.clone()),
                None => return false,
            },
            Some(DefKind::Hook) => match self.hooks.get(item) {
                Some(e) => (e.exported, e.owner.clone()),
                None => return false,
            },
            Some(DefKind::Middleware) => match self.middleware.get(item) {
                Some(e) => (e.exported, e.owner.clone()),
                None => return false,
            },
            Some(DefKind::Tag) => match self.tags.get(item) {
                Some(e) => (e.exported, e.owner.clone()),
                None => return false,
            },
            None => return false,
        };

        if exported {
            return true;
        }
        let owner = match owner {
            Some(owner) => owner,
            // Root-level registrations cannot be hidden.
            None => return true,
        };
        if requester == &owner {
            return true;
        }
        self.owner_chain(requester).contains(&owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::dynamic;

    fn leaf_task(id: &str) -> Arc<TaskDef> {
        TaskDef::from_fn(id, |_input, _ctx| async { Ok(dynamic(())) })
    }

    #[test]
    fn test_recursive_registration_records_owners() {
        let inner = ResourceDef::new("inner").with_register([leaf_task("t").into()]);
        let root = ResourceDef::new("root").with_register([inner.into()]);

        let mut registry = Registry::new();
        registry
            .register(RegisterItem::public(root), None)
            .expect("registration succeeds");

        assert_eq!(registry.kind_of(&Id::new("t")), Some(DefKind::Task));
        assert_eq!(
            registry.owner_chain(&Id::new("t")),
            vec![Id::new("inner"), Id::new("root")]
        );
    }

    #[test]
    fn test_duplicate_id_is_fatal() {
        let root = ResourceDef::new("root")
            .with_register([leaf_task("t").into(), leaf_task("t").into()]);

        let mut registry = Registry::new();
        let err = registry
            .register(RegisterItem::public(root), None)
            .expect_err("duplicate must fail");
        assert_eq!(err.as_label(), "build_duplicate_id");
    }

    #[test]
    fn test_override_missing_target_is_fatal() {
        let root = ResourceDef::new("root").with_overrides([Definition::Task(leaf_task("ghost"))]);

        let mut registry = Registry::new();
        registry
            .register(RegisterItem::public(root), None)
            .expect("registration succeeds");
        let err = registry.apply_overrides().expect_err("missing target");
        assert_eq!(err.as_label(), "build_override_target_missing");
    }

    #[test]
    fn test_closest_to_root_override_wins() {
        // middle registers task t and overrides it; root overrides it too.
        let t = leaf_task("t");
        let middle_override = leaf_task("t").with_tags([crate::def::TagRef::new("from-middle")]);
        let root_override = leaf_task("t").with_tags([crate::def::TagRef::new("from-root")]);

        let middle = ResourceDef::new("middle")
            .with_register([t.into()])
            .with_overrides([Definition::Task(middle_override)]);
        let root = ResourceDef::new("root")
            .with_register([middle.into()])
            .with_overrides([Definition::Task(root_override)]);

        let mut registry = Registry::new();
        registry
            .register(RegisterItem::public(root), None)
            .expect("registration succeeds");
        registry.apply_overrides().expect("overrides apply");

        let entry = registry.task(&Id::new("t")).expect("t registered");
        assert_eq!(entry.def.tags().len(), 1);
        assert_eq!(entry.def.tags()[0].id.as_str(), "from-root");
    }

    #[test]
    fn test_locked_registry_rejects_registration() {
        let mut registry = Registry::new();
        registry.lock();
        let err = registry
            .register(RegisterItem::public(leaf_task("late")), None)
            .expect_err("locked");
        assert_eq!(err.as_label(), "build_locked");
    }

    #[test]
    fn test_kind_mismatch_override() {
        let root = ResourceDef::new("root")
            .with_register([leaf_task("x").into()])
            .with_overrides([Definition::Event(EventDef::new("x"))]);

        let mut registry = Registry::new();
        // Registration finds the duplicate id only at override time,
        // since overrides are not normal registrations.
        registry
            .register(RegisterItem::public(root), None)
            .expect("registration succeeds");
        let err = registry.apply_overrides().expect_err("kind mismatch");
        assert_eq!(err.as_label(), "build_override_kind_mismatch");
    }

    #[test]
    fn test_visibility_of_private_items() {
        let secret = leaf_task("secret");
        let sibling = ResourceDef::new("sibling");
        let owner = ResourceDef::new("owner")
            .with_register([RegisterItem::private(secret), leaf_task("inside").into()]);
        let root = ResourceDef::new("root").with_register([owner.into(), sibling.into()]);

        let mut registry = Registry::new();
        registry
            .register(RegisterItem::public(root), None)
            .expect("registration succeeds");

        // Visible to the owner and to items inside the owner's subtree.
        assert!(registry.visible_to(&Id::new("secret"), &Id::new("owner")));
        assert!(registry.visible_to(&Id::new("secret"), &Id::new("inside")));
        // Hidden from a sibling subtree.
        assert!(!registry.visible_to(&Id::new("secret"), &Id::new("sibling")));
        // Exported items are visible everywhere.
        assert!(registry.visible_to(&Id::new("inside"), &Id::new("sibling")));
    }

    #[test]
    fn test_id_listings_are_sorted() {
        let root = ResourceDef::new("root").with_register([
            leaf_task("zeta").into(),
            leaf_task("alpha").into(),
            EventDef::new("m.event").into(),
        ]);

        let mut registry = Registry::new();
        registry
            .register(RegisterItem::public(root), None)
            .expect("registration succeeds");

        let ids: Vec<String> = registry.task_ids().iter().map(|i| i.to_string()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
        assert_eq!(registry.event_ids(), vec![Id::new("m.event")]);
    }
}

//! # Dependency graph and cycle detection.
//!
//! Derived from the fully-registered, override-resolved definition set:
//! nodes are definitions, and an edge `Y -> X` means "X depends on Y"
//! (dependencies point at their dependents, so a topological sort yields
//! dependencies first).
//!
//! Edges come from three places:
//! - declared dependency-map entries (optional wrappers unwrapped; an
//!   optional entry whose target is unregistered adds no edge),
//! - middleware attachments (the target cannot run until its middleware
//!   is ready),
//! - tag dependencies, expanded at build time into one edge per
//!   definition currently carrying the tag (the requester itself is
//!   excluded).
//!
//! Cycle detection enumerates **all** independent cycles before any init
//! runs, via strongly-connected components.

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::def::{DefKind, DependencyMap, DependencyRef, Id};
use crate::error::BuildError;
use crate::store::Registry;

/// The directed dependency graph for one runtime.
pub(crate) struct DepGraph {
    graph: DiGraph<Id, ()>,
    nodes: HashMap<Id, NodeIndex>,
}

impl DepGraph {
    /// Builds the graph from the registry and the evaluated dependency
    /// maps (`plans`, keyed by definition id).
    pub(crate) fn build(registry: &Registry, plans: &HashMap<Id, DependencyMap>) -> Self {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();

        // Nodes in registration order keeps every downstream ordering
        // deterministic. Tags are not nodes; they expand into edges.
        for id in registry.registration_order() {
            match registry.kind_of(id) {
                Some(DefKind::Tag) | None => continue,
                Some(_) => {
                    let index = graph.add_node(id.clone());
                    nodes.insert(id.clone(), index);
                }
            }
        }

        let mut this = Self { graph, nodes };

        for id in registry.registration_order() {
            let dependent = match this.nodes.get(id) {
                Some(index) => *index,
                None => continue,
            };

            if let Some(plan) = plans.get(id) {
                for (_, dep) in plan.iter() {
                    this.add_dependency_edges(registry, id, dependent, dep);
                }
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
                if let Some(&mw) = this.nodes.get(&attachment.id) {
                    this.graph.update_edge(mw, dependent, ());
                }
            }
        }

        this
    }

    fn add_dependency_edges(
        &mut self,
        registry: &Registry,
        requester: &Id,
        dependent: NodeIndex,
        dep: &DependencyRef,
    ) {
        match dep.unwrapped() {
            DependencyRef::Tag(tag) => {
                // Snapshot at build time: everything currently tagged
                // counts, regardless of registration order.
                for member in registry.tagged_with(tag) {
                    if &member.id == requester {
                        continue;
                    }
                    if let Some(&node) = self.nodes.get(&member.id) {
                        self.graph.update_edge(node, dependent, ());
                    }
                }
            }
            DependencyRef::Task(target)
            | DependencyRef::Resource(target)
            | DependencyRef::Event(target) => {
                // Unregistered targets add no edge; the resolver reports
                // them (or resolves them absent when optional).
                if let Some(&node) = self.nodes.get(target) {
                    self.graph.update_edge(node, dependent, ());
                }
            }
            DependencyRef::Optional(_) => {}
        }
    }

    /// Every cycle in the graph, each listed in traversal order.
    ///
    /// Returns one entry per strongly-connected component of size > 1,
    /// plus self-loops.
    pub(crate) fn find_cycles(&self) -> Vec<Vec<Id>> {
        let mut cycles = Vec::new();
        for scc in tarjan_scc(&self.graph) {
            let is_cycle =
                scc.len() > 1 || (scc.len() == 1 && self.graph.find_edge(scc[0], scc[0]).is_some());
            if is_cycle {
                cycles.push(self.cycle_path(&scc));
            }
        }
        cycles.sort();
        cycles
    }

    /// Orders one component's members by following edges from its
    /// earliest-registered node, so the report reads as a walk.
    fn cycle_path(&self, scc: &[NodeIndex]) -> Vec<Id> {
        let members: HashSet<NodeIndex> = scc.iter().copied().collect();
        let start = match scc.iter().min() {
            Some(&n) => n,
            None => return Vec::new(),
        };

        let mut path = vec![start];
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        visited.insert(start);
        let mut current = start;

        loop {
            let mut nexts: Vec<NodeIndex> = self
                .graph
                .neighbors(current)
                .filter(|n| members.contains(n) && !visited.contains(n))
                .collect();
            nexts.sort();
            match nexts.first() {
                Some(&next) => {
                    path.push(next);
                    visited.insert(next);
                    current = next;
                }
                None => break,
            }
        }

        // Components with branching may leave members off the greedy
        // walk; every participant must still be reported.
        let mut rest: Vec<NodeIndex> = members.difference(&visited).copied().collect();
        rest.sort();
        path.extend(rest);

        path.into_iter()
            .map(|n| self.graph[n].clone())
            .collect()
    }

    /// A valid topological order, dependencies first.
    ///
    /// Kahn's algorithm, taking ready nodes in insertion order:
    /// definitions without ordering constraints keep their registration
    /// order, which makes initialization and hook activation
    /// reproducible. Only called after [`find_cycles`](Self::find_cycles)
    /// came back empty; a residual cycle still reports instead of
    /// panicking.
    pub(crate) fn topo_order(&self) -> Result<Vec<Id>, BuildError> {
        let mut indegree: HashMap<NodeIndex, usize> = HashMap::new();
        let mut ready: BTreeSet<NodeIndex> = BTreeSet::new();
        for node in self.graph.node_indices() {
            let degree = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .count();
            if degree == 0 {
                ready.insert(node);
            } else {
                indegree.insert(node, degree);
            }
        }

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(node) = ready.pop_first() {
            order.push(self.graph[node].clone());
            for succ in self.graph.neighbors(node) {
                if let Some(degree) = indegree.get_mut(&succ) {
                    *degree -= 1;
                    if *degree == 0 {
                        indegree.remove(&succ);
                        ready.insert(succ);
                    }
                }
            }
        }

        if order.len() != self.graph.node_count() {
            return Err(BuildError::CycleDetected {
                cycles: self.find_cycles(),
            });
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::{
        DependencyMap, DependencyRef, MiddlewareRef, RegisterItem, ResourceDef, TagRef, TaskDef,
    };
    use crate::dynamic::dynamic;

    fn task(id: &str) -> std::sync::Arc<TaskDef> {
        TaskDef::from_fn(id, |_input, _ctx| async { Ok(dynamic(())) })
    }

    fn build_registry(root: std::sync::Arc<ResourceDef>) -> Registry {
        let mut registry = Registry::new();
        registry
            .register(RegisterItem::public(root), None)
            .expect("registration succeeds");
        registry.apply_overrides().expect("overrides apply");
        registry
    }

    fn plans_of(registry: &Registry) -> HashMap<Id, DependencyMap> {
        let mut plans = HashMap::new();
        for id in registry.registration_order().to_vec() {
            let plan = match registry.kind_of(&id) {
                Some(DefKind::Task) => registry
                    .task(&id)
                    .map(|e| e.def.deps().evaluate(None)),
                Some(DefKind::Resource) => registry
                    .resource(&id)
                    .map(|e| e.def.deps().evaluate(e.def.config())),
                Some(DefKind::Hook) => registry.hook(&id).map(|e| e.def.deps().evaluate(None)),
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
    }

    #[test]
    fn test_acyclic_topo_order_puts_dependencies_first() {
        let a = ResourceDef::new("a");
        let b = ResourceDef::new("b")
            .with_deps(DependencyMap::new().with("a", DependencyRef::Resource(Id::new("a"))));
        let root = ResourceDef::new("root").with_register([a.into(), b.into()]);

        let registry = build_registry(root);
        let plans = plans_of(&registry);
        let graph = DepGraph::build(&registry, &plans);

        assert!(graph.find_cycles().is_empty());
        let order = graph.topo_order().expect("acyclic");
        let pos = |id: &str| order.iter().position(|i| i.as_str() == id).unwrap();
        assert!(pos("a") < pos("b"), "dependency must come first: {order:?}");
    }

    #[test]
    fn test_direct_cycle_lists_every_participant() {
        let a = ResourceDef::new("a")
            .with_deps(DependencyMap::new().with("b", DependencyRef::Resource(Id::new("b"))));
        let b = ResourceDef::new("b")
            .with_deps(DependencyMap::new().with("a", DependencyRef::Resource(Id::new("a"))));
        let root = ResourceDef::new("root").with_register([a.into(), b.into()]);

        let registry = build_registry(root);
        let plans = plans_of(&registry);
        let graph = DepGraph::build(&registry, &plans);

        let cycles = graph.find_cycles();
        assert_eq!(cycles.len(), 1);
        let ids: Vec<&str> = cycles[0].iter().map(Id::as_str).collect();
        assert!(ids.contains(&"a") && ids.contains(&"b"), "got {ids:?}");
    }

    #[test]
    fn test_middleware_attachment_creates_cycle() {
        // mw depends on task t; t is wrapped by mw.
        let mw = crate::def::MiddlewareDef::from_fn("mw", |_ctx, input, next| async move {
            next(input).await
        })
        .with_deps(DependencyMap::new().with("t", DependencyRef::Task(Id::new("t"))));
        let t = task("t").with_middleware([MiddlewareRef::new("mw")]);
        let root = ResourceDef::new("root").with_register([mw.into(), t.into()]);

        let registry = build_registry(root);
        let plans = plans_of(&registry);
        let graph = DepGraph::build(&registry, &plans);

        let cycles = graph.find_cycles();
        assert_eq!(cycles.len(), 1, "middleware edge must close the cycle");
    }

    #[test]
    fn test_tag_expansion_creates_cycle() {
        // a carries tag "pool"; a depends on b; b depends on tag "pool".
        let pool = crate::def::TagDef::new("pool");
        let a = ResourceDef::new("a")
            .with_tags([TagRef::new("pool")])
            .with_deps(DependencyMap::new().with("b", DependencyRef::Resource(Id::new("b"))));
        let b = ResourceDef::new("b")
            .with_deps(DependencyMap::new().with("pool", DependencyRef::Tag(Id::new("pool"))));
        let root = ResourceDef::new("root").with_register([pool.into(), a.into(), b.into()]);

        let registry = build_registry(root);
        let plans = plans_of(&registry);
        let graph = DepGraph::build(&registry, &plans);

        assert_eq!(graph.find_cycles().len(), 1);
    }

    #[test]
    fn test_tag_expansion_excludes_requester() {
        // t carries "jobs" and depends on the tag; no self-loop.
        let jobs = crate::def::TagDef::new("jobs");
        let t = task("t")
            .with_tags([TagRef::new("jobs")])
            .with_deps(DependencyMap::new().with("jobs", DependencyRef::Tag(Id::new("jobs"))));
        let root = ResourceDef::new("root").with_register([jobs.into(), t.into()]);

        let registry = build_registry(root);
        let plans = plans_of(&registry);
        let graph = DepGraph::build(&registry, &plans);

        assert!(graph.find_cycles().is_empty());
    }

    #[test]
    fn test_topo_order_is_stable_for_unconstrained_nodes() {
        let root = ResourceDef::new("root").with_register([
            task("zeta").into(),
            task("mid").into(),
            task("alpha").into(),
        ]);

        let registry = build_registry(root);
        let plans = plans_of(&registry);
        let graph = DepGraph::build(&registry, &plans);

        let order = graph.topo_order().expect("acyclic");
        let pos = |id: &str| order.iter().position(|i| i.as_str() == id).unwrap();
        assert!(pos("zeta") < pos("mid") && pos("mid") < pos("alpha"));
    }

    #[test]
    fn test_optional_missing_adds_no_edge() {
        let t = task("t").with_deps(
            DependencyMap::new()
                .with("ghost", DependencyRef::Resource(Id::new("ghost")).optional()),
        );
        let root = ResourceDef::new("root").with_register([t.into()]);

        let registry = build_registry(root);
        let plans = plans_of(&registry);
        let graph = DepGraph::build(&registry, &plans);

        assert!(graph.find_cycles().is_empty());
        assert!(graph.topo_order().is_ok());
    }
}

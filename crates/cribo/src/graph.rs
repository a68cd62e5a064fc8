//! The first-party module graph.
//!
//! Modules are integer handles; edges carry the import kind and syntactic
//! scope. Only module-level edges participate in the petgraph view used for
//! cycle detection and ordering, because function-level imports are evaluated
//! lazily at runtime. Edge direction follows the dependency (an edge runs
//! from the dependency to its dependent), so a topological order of the graph
//! is already an emission order: leaves first.

use std::path::{Path, PathBuf};

use petgraph::{
    algo::{is_cyclic_directed, tarjan_scc},
    graph::{DiGraph, NodeIndex},
};
use rustc_hash::FxHashMap;

use crate::{imports::ImportScope, types::FxIndexMap};

/// Handle for a discovered first-party module, assigned in discovery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u32);

impl ModuleId {
    /// The entry script is always the first module discovered.
    pub const ENTRY: Self = Self(0);

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeKind {
    /// `import m` — binds the module object itself.
    Module,
    /// Ordering-only dependency on an ancestor package; no binding.
    Ancestor,
    /// `from m import a [as b], ...` — binds values out of `m`.
    From { names: Vec<(String, Option<String>)> },
    /// `from m import *` — flagged for later expansion.
    Star,
}

#[derive(Debug, Clone)]
pub struct ImportEdge {
    pub from: ModuleId,
    pub to: ModuleId,
    pub kind: EdgeKind,
    pub scope: ImportScope,
}

#[derive(Debug, Default)]
pub struct BundleGraph {
    names: FxIndexMap<String, ModuleId>,
    paths: FxIndexMap<PathBuf, ModuleId>,
    /// Module-level edges only, dependency -> dependent.
    graph: DiGraph<ModuleId, ()>,
    node_indices: FxHashMap<ModuleId, NodeIndex>,
    edges: Vec<ImportEdge>,
}

impl BundleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module, returning the existing id when the dotted name is
    /// already known.
    pub fn add_module(&mut self, name: &str, path: &Path) -> ModuleId {
        if let Some(&id) = self.names.get(name) {
            return id;
        }
        let id = ModuleId::new(self.names.len() as u32);
        self.names.insert(name.to_owned(), id);
        self.paths.entry(path.to_path_buf()).or_insert(id);
        let node = self.graph.add_node(id);
        self.node_indices.insert(id, node);
        id
    }

    pub fn id_of(&self, name: &str) -> Option<ModuleId> {
        self.names.get(name).copied()
    }

    pub fn name_of(&self, id: ModuleId) -> &str {
        self.names
            .get_index(id.index())
            .map(|(name, _)| name.as_str())
            .unwrap_or("<unknown>")
    }

    pub fn module_count(&self) -> usize {
        self.names.len()
    }

    pub fn module_names(&self) -> impl Iterator<Item = (&str, ModuleId)> {
        self.names.iter().map(|(name, &id)| (name.as_str(), id))
    }

    /// Record an import edge. Self-edges are dropped; only module-level edges
    /// enter the cycle/ordering view.
    pub fn add_edge(&mut self, edge: ImportEdge) {
        if edge.from == edge.to {
            return;
        }
        if edge.scope == ImportScope::Module
            && let (Some(&dep), Some(&dependent)) = (
                self.node_indices.get(&edge.to),
                self.node_indices.get(&edge.from),
            )
            && !self.graph.contains_edge(dep, dependent)
        {
            self.graph.add_edge(dep, dependent, ());
        }
        self.edges.push(edge);
    }

    pub fn edges(&self) -> &[ImportEdge] {
        &self.edges
    }

    pub fn has_module_level_cycles(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Strongly connected components of the module-level graph, members in
    /// discovery order.
    pub fn sccs(&self) -> Vec<Vec<ModuleId>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .map(|component| {
                let mut members: Vec<ModuleId> =
                    component.into_iter().map(|idx| self.graph[idx]).collect();
                members.sort();
                members
            })
            .collect()
    }

    /// Module-level edges whose endpoints both lie in `members`.
    pub fn edges_within<'a>(
        &'a self,
        members: &'a [ModuleId],
    ) -> impl Iterator<Item = &'a ImportEdge> + 'a {
        self.edges.iter().filter(move |edge| {
            edge.scope == ImportScope::Module
                && members.contains(&edge.from)
                && members.contains(&edge.to)
        })
    }

    /// Emission order: dependencies before dependents, cycle members in
    /// discovery order. Deterministic for identical inputs.
    pub fn emission_order(&self) -> Vec<ModuleId> {
        // tarjan_scc returns components in reverse topological order with
        // respect to the dep -> dependent edges, so dependents come out
        // first; reverse to put the leaves up front.
        let mut order = Vec::with_capacity(self.names.len());
        for component in self.sccs().into_iter().rev() {
            order.extend(component);
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(from: ModuleId, to: ModuleId, kind: EdgeKind, scope: ImportScope) -> ImportEdge {
        ImportEdge {
            from,
            to,
            kind,
            scope,
        }
    }

    #[test]
    fn emission_order_puts_leaves_first() {
        let mut graph = BundleGraph::new();
        let main = graph.add_module("main", Path::new("main.py"));
        let utils = graph.add_module("utils", Path::new("utils.py"));
        let models = graph.add_module("models", Path::new("models.py"));

        graph.add_edge(edge(main, utils, EdgeKind::Module, ImportScope::Module));
        graph.add_edge(edge(main, models, EdgeKind::Module, ImportScope::Module));
        graph.add_edge(edge(models, utils, EdgeKind::Module, ImportScope::Module));

        let order = graph.emission_order();
        let pos = |id| order.iter().position(|&m| m == id).unwrap();
        assert!(pos(utils) < pos(models));
        assert!(pos(models) < pos(main));
    }

    #[test]
    fn function_level_edges_do_not_create_cycles() {
        let mut graph = BundleGraph::new();
        let a = graph.add_module("a", Path::new("a.py"));
        let b = graph.add_module("b", Path::new("b.py"));

        graph.add_edge(edge(a, b, EdgeKind::Module, ImportScope::Function));
        graph.add_edge(edge(b, a, EdgeKind::Module, ImportScope::Function));

        assert!(!graph.has_module_level_cycles());
        assert!(graph.sccs().iter().all(|scc| scc.len() == 1));
    }

    #[test]
    fn module_level_cycle_is_one_component() {
        let mut graph = BundleGraph::new();
        let a = graph.add_module("a", Path::new("a.py"));
        let b = graph.add_module("b", Path::new("b.py"));
        let c = graph.add_module("c", Path::new("c.py"));

        graph.add_edge(edge(a, b, EdgeKind::Module, ImportScope::Module));
        graph.add_edge(edge(b, a, EdgeKind::Module, ImportScope::Module));
        graph.add_edge(edge(c, a, EdgeKind::Module, ImportScope::Module));

        assert!(graph.has_module_level_cycles());
        let cycle: Vec<_> = graph.sccs().into_iter().filter(|s| s.len() > 1).collect();
        assert_eq!(cycle, vec![vec![a, b]]);
    }

    #[test]
    fn duplicate_names_reuse_ids() {
        let mut graph = BundleGraph::new();
        let first = graph.add_module("pkg.mod", Path::new("pkg/mod.py"));
        let second = graph.add_module("pkg.mod", Path::new("pkg/mod.py"));
        assert_eq!(first, second);
        assert_eq!(graph.module_count(), 1);
    }

    #[test]
    fn ids_follow_discovery_order() {
        let mut graph = BundleGraph::new();
        assert_eq!(graph.add_module("entry", Path::new("entry.py")), ModuleId::ENTRY);
        assert_eq!(
            graph.add_module("next", Path::new("next.py")),
            ModuleId::new(1)
        );
        assert_eq!(graph.name_of(ModuleId::new(1)), "next");
    }
}

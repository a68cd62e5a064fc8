//! Cycle classification and module dispositions.
//!
//! Strongly connected components are computed over module-level edges only.
//! A cycle of bare `import m` statements can be flattened in discovery order;
//! a cycle carrying `from m import x` edges needs every member wrapped in a
//! lazily-initialized module object. A wrap-required cycle between modules
//! that hold nothing but variable bindings is a temporal paradox and refuses
//! to bundle.

use log::{debug, warn};

use crate::{
    graph::{BundleGraph, EdgeKind, ModuleId},
    symbols::SymbolTable,
};

/// How a module reaches the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Top-level statements flattened into the output under the rename plan.
    Inline,
    /// Body emitted inside an idempotent init function; a module object is
    /// built lazily at first access.
    Wrap,
}

/// A cycle that cannot be bundled at all.
#[derive(Debug, Clone)]
pub struct UnresolvableCycle {
    pub modules: Vec<String>,
    pub reason: String,
}

#[derive(Debug)]
pub struct CycleAnalysis {
    /// Indexed by `ModuleId`.
    pub dispositions: Vec<Disposition>,
    pub unresolvable: Vec<UnresolvableCycle>,
}

impl CycleAnalysis {
    pub fn disposition(&self, id: ModuleId) -> Disposition {
        self.dispositions[id.index()]
    }

    pub fn wrapped_modules(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.dispositions
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == Disposition::Wrap)
            .map(|(i, _)| ModuleId::new(i as u32))
    }
}

/// Classify every SCC and produce per-module dispositions.
pub fn analyze(graph: &BundleGraph, tables: &[SymbolTable]) -> CycleAnalysis {
    let mut dispositions = vec![Disposition::Inline; graph.module_count()];
    let mut unresolvable = Vec::new();

    for component in graph.sccs() {
        if component.len() <= 1 {
            continue;
        }

        let member_names: Vec<String> = component
            .iter()
            .map(|&id| graph.name_of(id).to_owned())
            .collect();

        // A package importing from its own subpackage is the ordinary
        // re-export idiom, not a problematic cycle.
        let parent_child = member_names.iter().any(|parent| {
            member_names
                .iter()
                .any(|child| child != parent && child.starts_with(&format!("{parent}.")))
        });
        if parent_child {
            debug!("Parent-child package cycle: {}", member_names.join(" -> "));
            continue;
        }

        let only_bare_imports = graph
            .edges_within(&component)
            .all(|edge| matches!(edge.kind, EdgeKind::Module | EdgeKind::Ancestor));
        if only_bare_imports {
            // Attribute access inside the cycle happens after import time, so
            // the members flatten in discovery order without side effects
            // crossing.
            debug!("Inlinable cycle: {}", member_names.join(" -> "));
            continue;
        }

        let value_only = component
            .iter()
            .all(|&id| tables[id.index()].defines_only_variables());
        if value_only {
            // Each side needs the other's value while it is still being
            // computed; no emission order can satisfy that.
            unresolvable.push(UnresolvableCycle {
                modules: member_names,
                reason: "module-level constants form a temporal paradox".to_owned(),
            });
            continue;
        }

        warn!(
            "Cycle with cross-module value imports, wrapping: {}",
            member_names.join(" -> ")
        );
        for &id in &component {
            dispositions[id.index()] = Disposition::Wrap;
        }
    }

    // A module that reads its own name table dynamically keeps a real module
    // object in the output.
    for (index, table) in tables.iter().enumerate() {
        if table.uses_dynamic_globals {
            let id = ModuleId::new(index as u32);
            if id != ModuleId::ENTRY {
                debug!("Wrapping {} (dynamic globals access)", graph.name_of(id));
                dispositions[index] = Disposition::Wrap;
            }
        }
    }

    // The entry script is the output's top level; it is never wrapped.
    if let Some(entry) = dispositions.get_mut(ModuleId::ENTRY.index()) {
        *entry = Disposition::Inline;
    }

    CycleAnalysis {
        dispositions,
        unresolvable,
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use ruff_python_parser::parse_module;

    use super::*;
    use crate::{
        graph::ImportEdge,
        imports::ImportScope,
        symbols::collect_symbols,
    };

    fn table_of(source: &str) -> SymbolTable {
        collect_symbols(&parse_module(source).unwrap().into_syntax())
    }

    fn module_edge(from: ModuleId, to: ModuleId, kind: EdgeKind) -> ImportEdge {
        ImportEdge {
            from,
            to,
            kind,
            scope: ImportScope::Module,
        }
    }

    #[test]
    fn bare_import_cycle_stays_inline() {
        let mut graph = BundleGraph::new();
        let main = graph.add_module("main", Path::new("main.py"));
        let a = graph.add_module("a", Path::new("a.py"));
        let b = graph.add_module("b", Path::new("b.py"));
        graph.add_edge(module_edge(a, b, EdgeKind::Module));
        graph.add_edge(module_edge(b, a, EdgeKind::Module));
        graph.add_edge(module_edge(main, a, EdgeKind::Module));

        let tables = vec![
            table_of("import a\n"),
            table_of("import b\ndef fa():\n    return b.fb()\n"),
            table_of("import a\ndef fb():\n    return 1\n"),
        ];
        let analysis = analyze(&graph, &tables);
        assert!(analysis.unresolvable.is_empty());
        assert!(analysis.dispositions.iter().all(|d| *d == Disposition::Inline));
    }

    #[test]
    fn value_import_cycle_wraps_all_members() {
        let mut graph = BundleGraph::new();
        let main = graph.add_module("main", Path::new("main.py"));
        let config = graph.add_module("config", Path::new("config.py"));
        let logger = graph.add_module("logger", Path::new("logger.py"));
        graph.add_edge(module_edge(
            config,
            logger,
            EdgeKind::From {
                names: vec![("get_logger".to_owned(), None)],
            },
        ));
        graph.add_edge(module_edge(
            logger,
            config,
            EdgeKind::From {
                names: vec![("get_config".to_owned(), None)],
            },
        ));
        graph.add_edge(module_edge(
            main,
            config,
            EdgeKind::From {
                names: vec![("get_config".to_owned(), None)],
            },
        ));

        let tables = vec![
            table_of("from config import get_config\n"),
            table_of("from logger import get_logger\ndef get_config():\n    return {}\n"),
            table_of("from config import get_config\ndef get_logger():\n    return None\n"),
        ];
        let analysis = analyze(&graph, &tables);
        assert!(analysis.unresolvable.is_empty());
        assert_eq!(analysis.disposition(main), Disposition::Inline);
        assert_eq!(analysis.disposition(config), Disposition::Wrap);
        assert_eq!(analysis.disposition(logger), Disposition::Wrap);
    }

    #[test]
    fn constants_cycle_is_unresolvable() {
        let mut graph = BundleGraph::new();
        let a = graph.add_module("constants_a", Path::new("constants_a.py"));
        let b = graph.add_module("constants_b", Path::new("constants_b.py"));
        graph.add_edge(module_edge(
            a,
            b,
            EdgeKind::From {
                names: vec![("B_VALUE".to_owned(), None)],
            },
        ));
        graph.add_edge(module_edge(
            b,
            a,
            EdgeKind::From {
                names: vec![("A_VALUE".to_owned(), None)],
            },
        ));

        let tables = vec![
            table_of("from constants_b import B_VALUE\nA_VALUE = B_VALUE + 1\n"),
            table_of("from constants_a import A_VALUE\nB_VALUE = A_VALUE * 2\n"),
        ];
        let analysis = analyze(&graph, &tables);
        assert_eq!(analysis.unresolvable.len(), 1);
        assert!(analysis.unresolvable[0].reason.contains("temporal paradox"));
        assert_eq!(
            analysis.unresolvable[0].modules,
            vec!["constants_a".to_owned(), "constants_b".to_owned()]
        );
    }

    #[test]
    fn function_level_cycle_needs_no_wrapping() {
        let mut graph = BundleGraph::new();
        let a = graph.add_module("function_module", Path::new("function_module.py"));
        let b = graph.add_module("helper_module", Path::new("helper_module.py"));
        graph.add_edge(ImportEdge {
            from: a,
            to: b,
            kind: EdgeKind::From {
                names: vec![("transform".to_owned(), None)],
            },
            scope: ImportScope::Function,
        });
        graph.add_edge(ImportEdge {
            from: b,
            to: a,
            kind: EdgeKind::From {
                names: vec![("utility_function".to_owned(), None)],
            },
            scope: ImportScope::Function,
        });

        let tables = vec![
            table_of("def process_data(x):\n    return x\n"),
            table_of("def transform(x):\n    return x\n"),
        ];
        let analysis = analyze(&graph, &tables);
        assert!(analysis.unresolvable.is_empty());
        assert!(analysis.dispositions.iter().all(|d| *d == Disposition::Inline));
    }

    #[test]
    fn dynamic_globals_forces_wrap() {
        let mut graph = BundleGraph::new();
        let main = graph.add_module("main", Path::new("main.py"));
        let plugin = graph.add_module("plugin", Path::new("plugin.py"));
        graph.add_edge(module_edge(main, plugin, EdgeKind::Module));

        let tables = vec![
            table_of("import plugin\n"),
            table_of("def lookup(name):\n    return globals()[name]\n"),
        ];
        let analysis = analyze(&graph, &tables);
        assert_eq!(analysis.disposition(main), Disposition::Inline);
        assert_eq!(analysis.disposition(plugin), Disposition::Wrap);
    }
}

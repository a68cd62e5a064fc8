//! The bundling pipeline.
//!
//! Drives discovery, graph construction, cycle analysis, symbol collection,
//! conflict planning, transformation, and emission. Each stage consumes the
//! previous stage's immutable output; diagnostics collect per stage and the
//! first fatal batch aborts.

use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use indexmap::{IndexMap, IndexSet};
use log::{debug, info};
use ruff_python_ast::ModModule;

use crate::{
    config::Config,
    cycles::{self, Disposition},
    diagnostics::{DiagnosticKind, DiagnosticSink},
    emitter::{self, EmitInputs, PreparedModule},
    graph::{BundleGraph, EdgeKind, ImportEdge, ModuleId},
    imports::{DiscoveredImport, ImportCollector, ImportForm, ImportScope},
    loader::{LoadError, SourceLoader},
    rename::{self, PlanModule},
    resolver::{ImportCategory, ModuleResolver, ResolvedModule},
    symbols::{self, ExportInfo, SymbolKind, SymbolTable},
    transformer::{self, BundleView},
    types::FxIndexMap,
    util::module_name_from_relative,
};

/// One discovered first-party module; index in the record list equals its
/// `ModuleId`.
#[derive(Debug)]
struct ModuleRecord {
    name: String,
    path: PathBuf,
    is_package: bool,
    ast: ModModule,
    content_hash: String,
    imports: Vec<DiscoveredImport>,
}

#[derive(Debug)]
pub struct BundleOrchestrator {
    config: Config,
    /// Top-level third-party names seen during discovery.
    third_party_seen: IndexSet<String>,
}

impl BundleOrchestrator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            third_party_seen: IndexSet::new(),
        }
    }

    /// Bundle `entry_path` and return the output source.
    pub fn bundle_to_string(&mut self, entry_path: &Path) -> Result<String> {
        self.bundle_core(entry_path, None)
    }

    /// Bundle with an explicit `PYTHONPATH` override (hermetic tests).
    pub fn bundle_to_string_with_pythonpath(
        &mut self,
        entry_path: &Path,
        pythonpath: Option<&str>,
    ) -> Result<String> {
        self.bundle_core(entry_path, pythonpath)
    }

    /// Bundle and write the output file.
    pub fn bundle_to_file(&mut self, entry_path: &Path, output: &Path) -> Result<()> {
        let bundled = self.bundle_to_string(entry_path)?;
        fs::write(output, bundled)
            .with_context(|| format!("failed to write output: {}", output.display()))?;
        info!("Bundle written to {}", output.display());
        Ok(())
    }

    /// `requirements.txt` content: third-party top-level names, sorted.
    pub fn requirements(&self) -> String {
        let mut names: Vec<&str> = self.third_party_seen.iter().map(String::as_str).collect();
        names.sort_unstable();
        let mut text = names.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        text
    }

    fn bundle_core(&mut self, entry_path: &Path, pythonpath: Option<&str>) -> Result<String> {
        let entry_path = entry_path
            .canonicalize()
            .with_context(|| format!("entry not found: {}", entry_path.display()))?;

        let mut resolver = ModuleResolver::with_pythonpath(self.config.clone(), pythonpath)?;
        resolver.set_entry_file(&entry_path);

        let entry_name = self.entry_module_name(&entry_path, &resolver);
        info!("Entry module: {entry_name}");

        let mut sink = DiagnosticSink::new();
        let mut loader = SourceLoader::new();
        let mut graph = BundleGraph::new();

        // Phase 1: breadth-first discovery from the entry.
        let records =
            self.discover(&entry_path, &entry_name, &mut resolver, &mut loader, &mut graph, &mut sink)?;
        sink.check_stage("discovery")?;
        info!("Discovered {} first-party modules", records.len());

        // Phase 2: dependency edges.
        self.build_edges(&records, &mut graph, &mut sink);
        sink.check_stage("graph construction")?;

        // Phase 3: symbols and exports.
        let tables: Vec<SymbolTable> = records.iter().map(|r| symbols::collect_symbols(&r.ast)).collect();
        let exports: Vec<ExportInfo> = records.iter().map(|r| symbols::collect_exports(&r.ast)).collect();

        // Phase 4: cycles and dispositions.
        let analysis = cycles::analyze(&graph, &tables);
        for cycle in &analysis.unresolvable {
            sink.fatal(
                DiagnosticKind::UnresolvableCycle,
                cycle.modules.join(" -> "),
                cycle.reason.clone(),
            );
        }
        sink.check_stage("cycle analysis")?;

        // Phase 5: star materialization and re-export chains.
        let order = self.emission_order(&graph);
        let mut tables = tables;
        let (reexports, alias_only) = self.resolve_reexports(
            &records,
            &mut tables,
            &exports,
            &graph,
            &analysis.dispositions,
            &order,
            &mut resolver,
        );
        let export_sets: Vec<Vec<String>> = tables
            .iter()
            .zip(&exports)
            .map(|(table, info)| symbols::exported_names(table, info))
            .collect();
        self.validate_all_lists(&records, &tables, &exports, &reexports, &mut sink);
        sink.check_stage("symbol analysis")?;

        // Phase 6: rename planning.
        let plan_modules: Vec<PlanModule<'_>> = records
            .iter()
            .enumerate()
            .map(|(index, record)| PlanModule {
                id: ModuleId::new(index as u32),
                name: &record.name,
                table: &tables[index],
                disposition: analysis.dispositions[index],
                alias_only: alias_only[index].clone(),
            })
            .collect();
        let mut plan = rename::build_plan(&plan_modules, &order);

        let synthetic_names: Vec<String> = records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                if analysis.dispositions[index] == Disposition::Wrap {
                    let synthetic =
                        rename::synthetic_module_name(&record.name, &record.content_hash);
                    plan.reserve(&synthetic);
                    plan.reserve(&rename::init_function_name(&synthetic));
                    synthetic
                } else {
                    String::new()
                }
            })
            .collect();

        // Namespace objects for modules bound as objects (`import m`).
        let needs_namespace = self.namespace_targets(&graph, &analysis.dispositions);
        let mut ns_vars: IndexMap<String, String> = IndexMap::new();
        for (index, needed) in needs_namespace.iter().enumerate() {
            if !needed {
                continue;
            }
            let root = records[index]
                .name
                .split('.')
                .next()
                .unwrap_or(&records[index].name)
                .to_owned();
            if !ns_vars.contains_key(&root) {
                let var = plan.allocate_helper(&root, &root);
                ns_vars.insert(root, var);
            }
        }

        // Phase 7: transformation.
        let ids_by_name: FxIndexMap<String, ModuleId> = graph
            .module_names()
            .map(|(name, id)| (name.to_owned(), id))
            .collect();
        let module_names: Vec<String> = records.iter().map(|r| r.name.clone()).collect();
        let is_package: Vec<bool> = records.iter().map(|r| r.is_package).collect();
        let view = BundleView {
            ids_by_name: &ids_by_name,
            module_names: &module_names,
            is_package: &is_package,
            dispositions: &analysis.dispositions,
            synthetic_names: &synthetic_names,
            export_sets: &export_sets,
            reexports: &reexports,
            plan: &plan,
            ns_vars: &ns_vars,
        };

        let mut prepared = Vec::with_capacity(records.len());
        let mut future_features: IndexSet<(String, Option<String>)> = IndexSet::new();
        let mut hoisted: IndexMap<String, ruff_python_ast::Stmt> = IndexMap::new();
        for &id in &order {
            let index = id.index();
            let record = &records[index];
            let (body, result) = match analysis.dispositions[index] {
                Disposition::Inline => {
                    let mut ast = record.ast.clone();
                    let result = transformer::transform_inline_module(&mut ast, id, &view, &mut sink);
                    (ast.body, result)
                }
                Disposition::Wrap => {
                    transformer::transform_wrapped_body(&record.ast, id, &view, &mut sink)
                }
            };
            future_features.extend(result.future_features);
            for stmt in result.hoisted_imports {
                hoisted.entry(format!("{stmt:?}")).or_insert(stmt);
            }

            let ns_exports: Vec<(String, String)> = export_sets[index]
                .iter()
                .filter_map(|original| match view.resolve_binding(id, original) {
                    Some(transformer::BindingRef::Inline(emitted)) => {
                        Some((original.clone(), emitted))
                    }
                    _ => None,
                })
                .collect();

            prepared.push(PreparedModule {
                id,
                name: record.name.clone(),
                path: record.path.clone(),
                disposition: analysis.dispositions[index],
                body,
                ns_exports,
                needs_namespace: needs_namespace[index],
                static_all: exports[index].names.clone(),
                synthetic: synthetic_names[index].clone(),
            });
        }
        sink.check_stage("transformation")?;

        // Phase 8: emission.
        let inputs = EmitInputs {
            modules: prepared,
            future_features: future_features.into_iter().collect(),
            hoisted_imports: hoisted.into_values().collect(),
            ns_vars,
        };
        Ok(emitter::emit_bundle(&inputs))
    }

    /// Entry module name: relative to a search root when possible, otherwise
    /// the file stem.
    fn entry_module_name(&self, entry_path: &Path, resolver: &ModuleResolver) -> String {
        for root in resolver.search_roots() {
            if let Ok(relative) = entry_path.strip_prefix(&root)
                && let Some(name) = module_name_from_relative(relative)
            {
                return name;
            }
        }
        entry_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("__main__")
            .to_owned()
    }

    /// Emission order with the entry forced last.
    fn emission_order(&self, graph: &BundleGraph) -> Vec<ModuleId> {
        let mut order: Vec<ModuleId> = graph
            .emission_order()
            .into_iter()
            .filter(|&id| id != ModuleId::ENTRY)
            .collect();
        order.push(ModuleId::ENTRY);
        order
    }

    /// Breadth-first discovery; module ids are assigned in pop order.
    fn discover(
        &mut self,
        entry_path: &Path,
        entry_name: &str,
        resolver: &mut ModuleResolver,
        loader: &mut SourceLoader,
        graph: &mut BundleGraph,
        sink: &mut DiagnosticSink,
    ) -> Result<Vec<ModuleRecord>> {
        let mut records = Vec::new();
        let mut queued: IndexSet<String> = IndexSet::new();
        let mut queue: VecDeque<(String, ResolvedModule)> = VecDeque::new();

        queued.insert(entry_name.to_owned());
        queue.push_back((
            entry_name.to_owned(),
            ResolvedModule {
                path: entry_path.to_path_buf(),
                is_package: false,
                is_namespace: false,
            },
        ));

        while let Some((name, resolved)) = queue.pop_front() {
            let unit = if resolved.is_namespace {
                loader.load_synthetic(&resolved.path)
            } else {
                match loader.load(&resolved.path) {
                    Ok(unit) => unit,
                    Err(LoadError::Io(message)) => {
                        sink.fatal(DiagnosticKind::Io, &name, message);
                        continue;
                    }
                    Err(LoadError::Parse {
                        line,
                        column,
                        message,
                    }) => {
                        sink.fatal(DiagnosticKind::Parse { line, column }, &name, message);
                        continue;
                    }
                }
            };

            let id = graph.add_module(&name, &unit.path);
            debug_assert_eq!(id.index(), records.len());
            debug!("Module {id:?}: {name}");

            let (imports, dynamic_uses) = ImportCollector::collect(&unit.ast);
            for dynamic in &dynamic_uses {
                sink.fatal(
                    DiagnosticKind::DynamicImport,
                    &name,
                    format!(
                        "{} with a non-literal argument cannot be bundled",
                        dynamic.callee
                    ),
                );
            }

            records.push(ModuleRecord {
                name: name.clone(),
                path: unit.path.clone(),
                is_package: resolved.is_package,
                ast: unit.ast.clone(),
                content_hash: unit.content_hash.clone(),
                imports: imports.clone(),
            });

            // Enqueue first-party targets.
            for import in &imports {
                let Some(absolute) =
                    self.absolute_target(&records[id.index()], import, sink)
                else {
                    continue;
                };
                match resolver.classify(&absolute) {
                    ImportCategory::Stdlib => {}
                    ImportCategory::ThirdParty => {
                        if let Some(top) = absolute.split('.').next() {
                            self.third_party_seen.insert(top.to_owned());
                        }
                    }
                    ImportCategory::FirstParty => {
                        self.enqueue_first_party(
                            &absolute,
                            import,
                            resolver,
                            &mut queued,
                            &mut queue,
                            sink,
                            &records[id.index()].name,
                        );
                    }
                }
            }
        }

        Ok(records)
    }

    /// Queue a first-party dotted name, its ancestor packages, and any
    /// submodules named by a from-import.
    #[allow(clippy::too_many_arguments)]
    fn enqueue_first_party(
        &self,
        absolute: &str,
        import: &DiscoveredImport,
        resolver: &mut ModuleResolver,
        queued: &mut IndexSet<String>,
        queue: &mut VecDeque<(String, ResolvedModule)>,
        sink: &mut DiagnosticSink,
        importer: &str,
    ) {
        let mut targets: Vec<String> = Vec::new();
        // Importing `a.b` executes `a` first; every ancestor package joins
        // the bundle.
        let segments: Vec<&str> = absolute.split('.').collect();
        for end in 1..=segments.len() {
            targets.push(segments[..end].join("."));
        }
        if import.form == ImportForm::From {
            for (name, _) in &import.names {
                let candidate = format!("{absolute}.{name}");
                if resolver.resolve(&candidate).is_some() {
                    targets.push(candidate);
                }
            }
        }

        for target in targets {
            if !queued.insert(target.clone()) {
                continue;
            }
            match resolver.resolve(&target) {
                Some(resolved) => queue.push_back((target, resolved)),
                None => sink.fatal(
                    DiagnosticKind::Resolution,
                    importer,
                    format!("cannot resolve first-party import '{target}'"),
                ),
            }
        }
    }

    /// The absolute dotted name an import refers to, or `None` for imports
    /// that cannot be mapped (with a diagnostic when that is fatal).
    fn absolute_target(
        &self,
        record: &ModuleRecord,
        import: &DiscoveredImport,
        sink: &mut DiagnosticSink,
    ) -> Option<String> {
        if import.level == 0 {
            if import.module.is_empty() {
                return None;
            }
            return Some(import.module.clone());
        }
        let remainder = if import.module.is_empty() {
            None
        } else {
            Some(import.module.as_str())
        };
        let absolute = ModuleResolver::absolute_name_for_relative(
            &record.name,
            record.is_package,
            import.level,
            remainder,
        );
        if absolute.is_none() {
            sink.fatal(
                DiagnosticKind::Resolution,
                &record.name,
                "relative import escapes the top-level package",
            );
        }
        absolute
    }

    /// Phase 2: turn the recorded imports into graph edges.
    fn build_edges(
        &mut self,
        records: &[ModuleRecord],
        graph: &mut BundleGraph,
        sink: &mut DiagnosticSink,
    ) {
        // A submodule executes after its parent package.
        for (index, record) in records.iter().enumerate() {
            if let Some((parent, _)) = record.name.rsplit_once('.')
                && let Some(parent_id) = graph.id_of(parent)
            {
                graph.add_edge(ImportEdge {
                    from: ModuleId::new(index as u32),
                    to: parent_id,
                    kind: EdgeKind::Ancestor,
                    scope: ImportScope::Module,
                });
            }
        }

        for (index, record) in records.iter().enumerate() {
            let from = ModuleId::new(index as u32);
            for import in &record.imports {
                let Some(absolute) = self.absolute_target(record, import, sink) else {
                    continue;
                };
                let Some(target) = graph.id_of(&absolute) else {
                    continue; // external
                };

                // Importing `a.b` (in any form) executes every ancestor
                // package first. A bare `import a.b` also binds the whole
                // chain as module objects.
                for prefix in prefixes_of(&absolute) {
                    let kind = if import.form == ImportForm::Module {
                        EdgeKind::Module
                    } else if prefix == absolute {
                        continue;
                    } else {
                        EdgeKind::Ancestor
                    };
                    if let Some(prefix_id) = graph.id_of(&prefix) {
                        graph.add_edge(ImportEdge {
                            from,
                            to: prefix_id,
                            kind,
                            scope: import.scope,
                        });
                    }
                }

                match &import.form {
                    ImportForm::Module => {}
                    ImportForm::Star => {
                        graph.add_edge(ImportEdge {
                            from,
                            to: target,
                            kind: EdgeKind::Star,
                            scope: import.scope,
                        });
                    }
                    ImportForm::From => {
                        let mut attr_names = Vec::new();
                        for (name, alias) in &import.names {
                            let submodule = format!("{absolute}.{name}");
                            if let Some(sub_id) = graph.id_of(&submodule) {
                                // Submodules take precedence; binding a
                                // submodule is a module-object import.
                                graph.add_edge(ImportEdge {
                                    from,
                                    to: sub_id,
                                    kind: EdgeKind::Module,
                                    scope: import.scope,
                                });
                            } else {
                                attr_names.push((name.clone(), alias.clone()));
                            }
                        }
                        // The package itself always executes.
                        let kind = if attr_names.is_empty() {
                            EdgeKind::Module
                        } else {
                            EdgeKind::From { names: attr_names }
                        };
                        graph.add_edge(ImportEdge {
                            from,
                            to: target,
                            kind,
                            scope: import.scope,
                        });
                    }
                }
            }
        }
    }

    /// Resolve module-level re-export chains to their final origin and
    /// materialize star imports into the importer's symbol table.
    ///
    /// Returns, per module, the final-origin map and the set of import
    /// bindings that dissolve into direct references.
    #[allow(clippy::too_many_arguments)]
    fn resolve_reexports(
        &self,
        records: &[ModuleRecord],
        tables: &mut [SymbolTable],
        exports: &[ExportInfo],
        graph: &BundleGraph,
        dispositions: &[Disposition],
        order: &[ModuleId],
        resolver: &mut ModuleResolver,
    ) -> (Vec<IndexMap<String, (ModuleId, String)>>, Vec<IndexSet<String>>) {
        let mut raw: Vec<IndexMap<String, (ModuleId, String)>> =
            vec![IndexMap::new(); records.len()];
        let mut alias_only: Vec<IndexSet<String>> = vec![IndexSet::new(); records.len()];

        // Dependencies first, so star expansion sees the target's final set.
        for &id in order {
            let index = id.index();
            let record = &records[index];
            let mut sink = DiagnosticSink::new(); // absolute_target already reported in build_edges
            for import in &record.imports {
                if import.scope != ImportScope::Module {
                    continue;
                }
                let Some(absolute) = self.absolute_target(record, import, &mut sink) else {
                    continue;
                };
                match &import.form {
                    ImportForm::From => {
                        let Some(target) = graph.id_of(&absolute) else {
                            continue;
                        };
                        for (name, alias) in &import.names {
                            let submodule = format!("{absolute}.{name}");
                            if graph.id_of(&submodule).is_some()
                                || resolver.resolve(&submodule).is_some()
                            {
                                continue; // module binding, not a value alias
                            }
                            let local = alias.clone().unwrap_or_else(|| name.clone());
                            let final_origin = chase_origin(&raw, dispositions, target, name);
                            if dispositions[target.index()] == Disposition::Inline {
                                alias_only[index].insert(local.clone());
                            }
                            raw[index].insert(local, final_origin);
                        }
                    }
                    ImportForm::Star => {
                        let Some(target) = graph.id_of(&absolute) else {
                            continue;
                        };
                        let names = symbols::exported_names(
                            &tables[target.index()],
                            &exports[target.index()],
                        );
                        for name in names {
                            if tables[index].contains(&name) {
                                continue; // locally bound names win
                            }
                            tables[index]
                                .symbols
                                .insert(name.clone(), SymbolKind::Import);
                            let final_origin = chase_origin(&raw, dispositions, target, &name);
                            if dispositions[final_origin.0.index()] == Disposition::Inline {
                                alias_only[index].insert(name.clone());
                            }
                            raw[index].insert(name, final_origin);
                        }
                    }
                    ImportForm::Module => {
                        // A bare import of a fully-inlined chain binds the
                        // root through the namespace variable.
                        let has_alias = import
                            .names
                            .first()
                            .is_some_and(|(_, alias)| alias.is_some());
                        if has_alias {
                            continue;
                        }
                        let all_inline = prefixes_of(&absolute).all(|prefix| {
                            graph
                                .id_of(&prefix)
                                .is_none_or(|pid| dispositions[pid.index()] == Disposition::Inline)
                        });
                        if all_inline && graph.id_of(&absolute).is_some() {
                            let root = absolute.split('.').next().unwrap_or(&absolute);
                            alias_only[index].insert(root.to_owned());
                        }
                    }
                }
            }
        }

        (raw, alias_only)
    }

    /// Modules bound as objects somewhere get a namespace after their body.
    fn namespace_targets(&self, graph: &BundleGraph, dispositions: &[Disposition]) -> Vec<bool> {
        let mut needed = vec![false; dispositions.len()];
        for edge in graph.edges() {
            if edge.kind == EdgeKind::Module
                && dispositions[edge.to.index()] == Disposition::Inline
                && edge.to != ModuleId::ENTRY
            {
                needed[edge.to.index()] = true;
            }
        }
        needed
    }

    /// Static `__all__` entries must name a module-level binding or a
    /// resolvable re-export.
    fn validate_all_lists(
        &self,
        records: &[ModuleRecord],
        tables: &[SymbolTable],
        exports: &[ExportInfo],
        reexports: &[IndexMap<String, (ModuleId, String)>],
        sink: &mut DiagnosticSink,
    ) {
        for (index, info) in exports.iter().enumerate() {
            let Some(names) = &info.names else { continue };
            for name in names {
                if !tables[index].contains(name) && !reexports[index].contains_key(name) {
                    sink.fatal(
                        DiagnosticKind::InvalidAll,
                        &records[index].name,
                        format!("__all__ entry '{name}' is not bound at module level"),
                    );
                }
            }
        }
    }
}

fn prefixes_of(dotted: &str) -> impl Iterator<Item = String> + '_ {
    let segments: Vec<&str> = dotted.split('.').collect();
    (1..=segments.len()).map(move |end| segments[..end].join("."))
}

/// Follow a re-export chain to its final origin; stops at wrapped modules
/// (their attributes resolve at runtime) and guards against alias cycles.
fn chase_origin(
    raw: &[IndexMap<String, (ModuleId, String)>],
    dispositions: &[Disposition],
    module: ModuleId,
    name: &str,
) -> (ModuleId, String) {
    let mut current = (module, name.to_owned());
    let mut hops = 0;
    while dispositions[current.0.index()] == Disposition::Inline {
        match raw[current.0.index()].get(&current.1) {
            Some(next) if hops < 32 => {
                current = next.clone();
                hops += 1;
            }
            _ => break,
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn entry_name_prefers_search_roots() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::create_dir(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/__init__.py"), "").unwrap();
        let entry = dir.path().join("pkg").join("cli.py");
        fs::write(&entry, "print('hi')\n").unwrap();

        let config = Config {
            src: vec![dir.path().to_path_buf()],
            ..Config::default()
        };
        let orchestrator = BundleOrchestrator::new(config.clone());
        let mut resolver = ModuleResolver::with_pythonpath(config, Some("")).unwrap();
        // Without set_entry_file the configured root is the only choice.
        let name = orchestrator.entry_module_name(&entry.canonicalize().unwrap(), &resolver);
        assert_eq!(name, "pkg.cli");

        // With the entry dir registered, it wins and the name flattens.
        resolver.set_entry_file(&entry);
        let name = orchestrator.entry_module_name(&entry.canonicalize().unwrap(), &resolver);
        assert_eq!(name, "cli");
    }

    #[test]
    fn requirements_are_sorted_and_unique() {
        let mut orchestrator = BundleOrchestrator::new(Config::default());
        orchestrator.third_party_seen.insert("requests".to_owned());
        orchestrator.third_party_seen.insert("attrs".to_owned());
        orchestrator.third_party_seen.insert("requests".to_owned());
        assert_eq!(orchestrator.requirements(), "attrs\nrequests\n");
    }
}

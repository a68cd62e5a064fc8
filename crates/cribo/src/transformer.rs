//! AST transformation under the rename plan.
//!
//! Rewrites one module at a time: first-party imports dissolve into direct
//! references, init calls, or namespace bindings; external imports hoist to
//! the prelude; top-level names are renamed shadow-aware; `global`
//! declarations are lifted. Wrapped modules get their body rewritten for
//! life inside an init function, with every top-level binding mirrored onto
//! the module object.

use indexmap::IndexMap;
use ruff_python_ast::{AtomicNodeIndex, Expr, ExprContext, Identifier, ModModule, Stmt};
use ruff_text_size::TextRange;
use rustc_hash::FxHashSet;

use crate::{
    ast_builder as ast,
    cycles::Disposition,
    diagnostics::{DiagnosticKind, DiagnosticSink},
    graph::ModuleId,
    rename::{RenamePlan, init_function_name},
    resolver::ModuleResolver,
    types::FxIndexMap,
};

/// Where a reference into another module ends up in the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingRef {
    /// A flat global under its emitted name.
    Inline(String),
    /// An attribute of a wrapped module's object.
    WrappedAttr { module: ModuleId, attr: String },
}

/// Read-only view of the whole bundle consulted while rewriting one module.
#[derive(Debug)]
pub struct BundleView<'a> {
    pub ids_by_name: &'a FxIndexMap<String, ModuleId>,
    /// Indexed by `ModuleId`.
    pub module_names: &'a [String],
    pub is_package: &'a [bool],
    pub dispositions: &'a [Disposition],
    pub synthetic_names: &'a [String],
    /// Star-export sets, original names, indexed by `ModuleId`.
    pub export_sets: &'a [Vec<String>],
    /// Module-level re-export chains, resolved to their final origin.
    pub reexports: &'a [IndexMap<String, (ModuleId, String)>],
    pub plan: &'a RenamePlan,
    /// Emitted identifier per namespace chain segment (keyed by dotted
    /// prefix, e.g. `utils` and `utils.helpers`).
    pub ns_vars: &'a IndexMap<String, String>,
}

impl BundleView<'_> {
    pub fn module_id(&self, dotted: &str) -> Option<ModuleId> {
        self.ids_by_name.get(dotted).copied()
    }

    pub fn is_wrapped(&self, id: ModuleId) -> bool {
        self.dispositions[id.index()] == Disposition::Wrap
    }

    /// `__cribo_init_<synthetic>()`
    pub fn init_call(&self, id: ModuleId) -> Expr {
        let function = init_function_name(&self.synthetic_names[id.index()]);
        ast::call(ast::name(&function, ExprContext::Load), vec![], vec![])
    }

    /// Expression reaching an inlined module's namespace object.
    pub fn ns_expr(&self, dotted: &str) -> Expr {
        let segments: Vec<&str> = dotted.split('.').collect();
        let root = self
            .ns_vars
            .get(segments[0])
            .map(String::as_str)
            .unwrap_or(segments[0]);
        let mut expr = ast::name(root, ExprContext::Load);
        for segment in &segments[1..] {
            expr = ast::attribute(expr, segment, ExprContext::Load);
        }
        expr
    }

    /// Resolve `name` as seen by importers of `module`.
    pub fn resolve_binding(&self, module: ModuleId, name: &str) -> Option<BindingRef> {
        if self.is_wrapped(module) {
            return Some(BindingRef::WrappedAttr {
                module,
                attr: name.to_owned(),
            });
        }
        if let Some(emitted) = self.plan.emitted_name(module, name) {
            return Some(BindingRef::Inline(emitted.to_owned()));
        }
        if let Some((origin, original)) = self.reexports[module.index()].get(name) {
            if self.is_wrapped(*origin) {
                return Some(BindingRef::WrappedAttr {
                    module: *origin,
                    attr: original.clone(),
                });
            }
            return self
                .plan
                .emitted_name(*origin, original)
                .map(|emitted| BindingRef::Inline(emitted.to_owned()));
        }
        None
    }

    fn binding_expr(&self, binding: &BindingRef) -> Expr {
        match binding {
            BindingRef::Inline(name) => ast::name(name, ExprContext::Load),
            BindingRef::WrappedAttr { module, attr } => {
                ast::attribute(self.init_call(*module), attr, ExprContext::Load)
            }
        }
    }
}

/// Side results of transforming one module.
#[derive(Debug, Default)]
pub struct TransformResult {
    /// External module-level imports, cloned for the prelude.
    pub hoisted_imports: Vec<Stmt>,
    /// `__future__` features, `(name, alias)`.
    pub future_features: Vec<(String, Option<String>)>,
}

/// What a name rewrites to.
#[derive(Debug, Clone)]
enum Replacement {
    Name(String),
    /// `<base>.<attr>` — used for lifted globals in wrapped modules.
    Attr(String, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GlobalsMode {
    /// Rename the names listed in `global` declarations (inlined modules).
    Rename,
    /// Remove `global` declarations whose names are all mapped (wrapped
    /// modules; the references become attribute access).
    Strip,
}

// ---------------------------------------------------------------------------
// Import rewriting
// ---------------------------------------------------------------------------

struct ImportRewriter<'a, 'b> {
    view: &'a BundleView<'a>,
    module_id: ModuleId,
    module_name: &'a str,
    is_package: bool,
    sink: &'b mut DiagnosticSink,
    result: TransformResult,
    /// Local import binding -> emitted global name; applied as a rename
    /// overlay after import rewriting.
    overlay: IndexMap<String, String>,
}

impl<'a, 'b> ImportRewriter<'a, 'b> {
    fn new(
        view: &'a BundleView<'a>,
        module_id: ModuleId,
        sink: &'b mut DiagnosticSink,
    ) -> Self {
        Self {
            view,
            module_id,
            module_name: &view.module_names[module_id.index()],
            is_package: view.is_package[module_id.index()],
            sink,
            result: TransformResult::default(),
            overlay: IndexMap::new(),
        }
    }

    fn rewrite_body(&mut self, body: Vec<Stmt>, module_level: bool) -> Vec<Stmt> {
        let mut out = Vec::with_capacity(body.len());
        for stmt in body {
            match stmt {
                Stmt::Import(_) | Stmt::ImportFrom(_) => {
                    self.rewrite_import(stmt, module_level, &mut out);
                }
                Stmt::FunctionDef(mut def) => {
                    def.body = self.rewrite_body(def.body, false);
                    out.push(Stmt::FunctionDef(def));
                }
                Stmt::ClassDef(mut def) => {
                    def.body = self.rewrite_body(def.body, false);
                    out.push(Stmt::ClassDef(def));
                }
                Stmt::If(mut if_stmt) => {
                    if_stmt.body = self.rewrite_body(if_stmt.body, module_level);
                    for clause in &mut if_stmt.elif_else_clauses {
                        clause.body =
                            self.rewrite_body(std::mem::take(&mut clause.body), module_level);
                    }
                    out.push(Stmt::If(if_stmt));
                }
                Stmt::Try(mut try_stmt) => {
                    try_stmt.body = self.rewrite_body(try_stmt.body, module_level);
                    for handler in &mut try_stmt.handlers {
                        let ruff_python_ast::ExceptHandler::ExceptHandler(handler) = handler;
                        handler.body =
                            self.rewrite_body(std::mem::take(&mut handler.body), module_level);
                    }
                    try_stmt.orelse = self.rewrite_body(try_stmt.orelse, module_level);
                    try_stmt.finalbody = self.rewrite_body(try_stmt.finalbody, module_level);
                    out.push(Stmt::Try(try_stmt));
                }
                Stmt::For(mut for_stmt) => {
                    for_stmt.body = self.rewrite_body(for_stmt.body, module_level);
                    for_stmt.orelse = self.rewrite_body(for_stmt.orelse, module_level);
                    out.push(Stmt::For(for_stmt));
                }
                Stmt::While(mut while_stmt) => {
                    while_stmt.body = self.rewrite_body(while_stmt.body, module_level);
                    while_stmt.orelse = self.rewrite_body(while_stmt.orelse, module_level);
                    out.push(Stmt::While(while_stmt));
                }
                Stmt::With(mut with_stmt) => {
                    with_stmt.body = self.rewrite_body(with_stmt.body, module_level);
                    out.push(Stmt::With(with_stmt));
                }
                other => out.push(other),
            }
        }
        out
    }

    fn rewrite_import(&mut self, stmt: Stmt, module_level: bool, out: &mut Vec<Stmt>) {
        match stmt {
            Stmt::Import(import) => {
                let mut external = Vec::new();
                for alias in &import.names {
                    let dotted = alias.name.to_string();
                    let local = alias.asname.as_ref().map(ToString::to_string);
                    if self.view.module_id(&dotted).is_some() {
                        self.bind_module_import(&dotted, local.as_deref(), module_level, out);
                    } else {
                        external.push(ast::alias(&dotted, local.as_deref()));
                    }
                }
                if !external.is_empty() {
                    let stmt = ast::import(external);
                    if module_level {
                        self.result.hoisted_imports.push(stmt);
                    } else {
                        out.push(stmt);
                    }
                }
            }
            Stmt::ImportFrom(import) => {
                let written = import
                    .module
                    .as_ref()
                    .map(ToString::to_string);
                let absolute = if import.level == 0 {
                    written.clone()
                } else {
                    ModuleResolver::absolute_name_for_relative(
                        self.module_name,
                        self.is_package,
                        import.level,
                        written.as_deref(),
                    )
                };
                let Some(absolute) = absolute else {
                    self.sink.fatal(
                        DiagnosticKind::Resolution,
                        self.module_name,
                        "relative import escapes the top-level package",
                    );
                    return;
                };

                if absolute == "__future__" {
                    for alias in &import.names {
                        self.result.future_features.push((
                            alias.name.to_string(),
                            alias.asname.as_ref().map(ToString::to_string),
                        ));
                    }
                    return;
                }

                let is_star =
                    import.names.len() == 1 && import.names[0].name.as_str() == "*";
                match self.view.module_id(&absolute) {
                    Some(target) if is_star => {
                        self.expand_star(target, module_level, out);
                    }
                    Some(target) => {
                        // Importing from a wrapped package runs its body; an
                        // inlined package's body already ran in sequence.
                        if self.view.is_wrapped(target) {
                            out.push(ast::expr_stmt(self.view.init_call(target)));
                        }
                        for alias in &import.names {
                            let name = alias.name.to_string();
                            let local = alias
                                .asname
                                .as_ref()
                                .map_or_else(|| name.clone(), ToString::to_string);
                            self.bind_from_import(
                                target,
                                &absolute,
                                &name,
                                &local,
                                module_level,
                                out,
                            );
                        }
                    }
                    None => {
                        // External: hoist module-level imports, keep the
                        // rest. Hoisted statements are rebuilt with default
                        // ranges so identical imports from different files
                        // deduplicate structurally.
                        if module_level {
                            let aliases = import
                                .names
                                .iter()
                                .map(|a| {
                                    ast::alias(
                                        a.name.as_str(),
                                        a.asname.as_ref().map(Identifier::as_str),
                                    )
                                })
                                .collect();
                            self.result.hoisted_imports.push(ast::import_from(
                                import.module.as_ref().map(Identifier::as_str),
                                aliases,
                                import.level,
                            ));
                        } else {
                            out.push(Stmt::ImportFrom(import));
                        }
                    }
                }
            }
            _ => unreachable!("rewrite_import called on a non-import statement"),
        }
    }

    /// `import a.b [as z]` of bundled modules.
    fn bind_module_import(
        &mut self,
        dotted: &str,
        local_alias: Option<&str>,
        module_level: bool,
        out: &mut Vec<Stmt>,
    ) {
        let segments: Vec<&str> = dotted.split('.').collect();
        let bundled_prefixes: Vec<(String, ModuleId)> = prefixes(dotted)
            .filter_map(|prefix| {
                self.view
                    .module_id(&prefix)
                    .map(|id| (prefix, id))
            })
            .collect();
        let any_wrapped_parent = bundled_prefixes
            .iter()
            .take(bundled_prefixes.len().saturating_sub(1))
            .any(|(_, id)| self.view.is_wrapped(*id));
        let leaf = bundled_prefixes
            .last()
            .expect("bundled import must resolve at least one prefix");
        let leaf_wrapped = self.view.is_wrapped(leaf.1);

        if any_wrapped_parent {
            // Chain routed through sys.modules: initialize the wrapped
            // prefixes in order, then bind through the runtime module table.
            for (_, id) in &bundled_prefixes {
                if self.view.is_wrapped(*id) {
                    out.push(ast::expr_stmt(self.view.init_call(*id)));
                }
            }
            let bound = if let Some(alias) = local_alias {
                (alias.to_owned(), dotted.to_owned())
            } else {
                (segments[0].to_owned(), segments[0].to_owned())
            };
            let target = self.local_binding_name(&bound.0, module_level);
            out.push(ast::simple_assign(
                &target,
                ast::subscript(
                    ast::dotted_name(&["sys", "modules"], ExprContext::Load),
                    ast::string_literal(&bound.1),
                    ExprContext::Load,
                ),
            ));
            return;
        }

        if leaf_wrapped {
            if let Some(alias) = local_alias {
                let target = self.local_binding_name(alias, module_level);
                out.push(ast::simple_assign(&target, self.view.init_call(leaf.1)));
            } else if segments.len() == 1 {
                let target = self.local_binding_name(segments[0], module_level);
                out.push(ast::simple_assign(&target, self.view.init_call(leaf.1)));
            } else {
                // Inline parents hold namespaces; hang the wrapped leaf off
                // its parent namespace, then bind the root.
                let parent_dotted = segments[..segments.len() - 1].join(".");
                out.push(ast::assign(
                    vec![ast::attribute(
                        self.view.ns_expr(&parent_dotted),
                        segments[segments.len() - 1],
                        ExprContext::Store,
                    )],
                    self.view.init_call(leaf.1),
                ));
                self.bind_ns_root(segments[0], module_level, out);
            }
            return;
        }

        // Fully inlined chain: namespaces are emitted after the target
        // modules' bodies, so only the local binding is needed here.
        if let Some(alias) = local_alias {
            let target = self.local_binding_name(alias, module_level);
            let ns = self.view.ns_expr(dotted);
            out.push(ast::simple_assign(&target, ns));
        } else {
            self.bind_ns_root(segments[0], module_level, out);
        }
    }

    /// Bind the chain root name (`import a.b` binds `a`).
    fn bind_ns_root(&mut self, root: &str, module_level: bool, out: &mut Vec<Stmt>) {
        let ns_var = self
            .view
            .ns_vars
            .get(root)
            .cloned()
            .unwrap_or_else(|| root.to_owned());
        if module_level {
            // References rewrite to the namespace variable directly.
            self.overlay.insert(root.to_owned(), ns_var);
        } else if ns_var != root {
            out.push(ast::simple_assign(root, ast::name(&ns_var, ExprContext::Load)));
        }
        // ns_var == root at function level: the global namespace variable is
        // already visible under the right name.
    }

    /// One name of a `from target import name as local`.
    fn bind_from_import(
        &mut self,
        target: ModuleId,
        target_name: &str,
        name: &str,
        local: &str,
        module_level: bool,
        out: &mut Vec<Stmt>,
    ) {
        // Submodules win over init-module attributes.
        let submodule = format!("{target_name}.{name}");
        if let Some(sub_id) = self.view.module_id(&submodule) {
            let value = if self.view.is_wrapped(sub_id) {
                self.view.init_call(sub_id)
            } else {
                self.view.ns_expr(&submodule)
            };
            let bound = self.local_binding_name(local, module_level);
            out.push(ast::simple_assign(&bound, value));
            return;
        }

        match self.view.resolve_binding(target, name) {
            Some(BindingRef::Inline(emitted)) => {
                if module_level {
                    self.overlay.insert(local.to_owned(), emitted);
                } else if local != emitted {
                    out.push(ast::simple_assign(
                        local,
                        ast::name(&emitted, ExprContext::Load),
                    ));
                }
                // local == emitted at function level: the global binding is
                // already visible under this name.
            }
            Some(binding @ BindingRef::WrappedAttr { .. }) => {
                let bound = self.local_binding_name(local, module_level);
                out.push(ast::simple_assign(&bound, self.view.binding_expr(&binding)));
            }
            None => {
                self.sink.fatal(
                    DiagnosticKind::Resolution,
                    self.module_name,
                    format!("cannot import name '{name}' from '{target_name}'"),
                );
            }
        }
    }

    /// Expand `from target import *` through the export set.
    fn expand_star(&mut self, target: ModuleId, module_level: bool, out: &mut Vec<Stmt>) {
        if !module_level {
            // A function-level star import is a syntax error in the source
            // language; the parser already rejected it.
            return;
        }
        let exports = self.view.export_sets[target.index()].clone();
        for name in exports {
            match self.view.resolve_binding(target, &name) {
                Some(BindingRef::Inline(emitted)) => {
                    self.overlay.insert(name, emitted);
                }
                Some(binding @ BindingRef::WrappedAttr { .. }) => {
                    let bound = self.local_binding_name(&name, true);
                    out.push(ast::simple_assign(&bound, self.view.binding_expr(&binding)));
                }
                None => {
                    self.sink.fatal(
                        DiagnosticKind::InvalidAll,
                        &self.view.module_names[target.index()],
                        format!("__all__ entry '{name}' is not bound at module level"),
                    );
                }
            }
        }
    }

    /// The output name for a locally-bound import: the planned emitted name
    /// at module level, the original local name inside functions.
    fn local_binding_name(&self, local: &str, module_level: bool) -> String {
        if module_level {
            self.view
                .plan
                .emitted_or_original(self.module_id, local)
                .to_owned()
        } else {
            local.to_owned()
        }
    }
}

fn prefixes(dotted: &str) -> impl Iterator<Item = String> + '_ {
    let segments: Vec<&str> = dotted.split('.').collect();
    (1..=segments.len()).map(move |end| segments[..end].join("."))
}

// ---------------------------------------------------------------------------
// Renaming
// ---------------------------------------------------------------------------

fn rename_identifier(identifier: &mut Identifier, replacement: &str) {
    *identifier = Identifier::new(replacement, TextRange::default());
}

fn apply_replacements(
    body: &mut [Stmt],
    map: &IndexMap<String, Replacement>,
    globals_mode: GlobalsMode,
) {
    let shadowed = FxHashSet::default();
    for stmt in body {
        rename_stmt(stmt, map, &shadowed, globals_mode, true);
    }
}

fn rename_stmt(
    stmt: &mut Stmt,
    map: &IndexMap<String, Replacement>,
    shadowed: &FxHashSet<String>,
    globals_mode: GlobalsMode,
    at_module_level: bool,
) {
    match stmt {
        Stmt::FunctionDef(def) => {
            for decorator in &mut def.decorator_list {
                rename_expr(&mut decorator.expression, map, shadowed);
            }
            rename_parameters_defaults(&mut def.parameters, map, shadowed);
            if let Some(returns) = &mut def.returns {
                rename_expr(returns, map, shadowed);
            }
            if at_module_level
                && !shadowed.contains(def.name.as_str())
                && let Some(Replacement::Name(new_name)) = map.get(def.name.as_str())
            {
                rename_identifier(&mut def.name, new_name);
            }

            let mut inner = shadowed.clone();
            collect_parameter_names(&def.parameters, &mut inner);
            let mut locals = FxHashSet::default();
            collect_local_bindings(&def.body, &mut locals);
            let mut declared_global = FxHashSet::default();
            collect_global_names(&def.body, &mut declared_global);
            for local in locals {
                if !declared_global.contains(&local) {
                    inner.insert(local);
                }
            }

            for stmt in &mut def.body {
                rename_stmt(stmt, map, &inner, globals_mode, false);
            }
        }
        Stmt::ClassDef(def) => {
            for decorator in &mut def.decorator_list {
                rename_expr(&mut decorator.expression, map, shadowed);
            }
            if let Some(arguments) = &mut def.arguments {
                for arg in &mut arguments.args {
                    rename_expr(arg, map, shadowed);
                }
                for keyword in &mut arguments.keywords {
                    rename_expr(&mut keyword.value, map, shadowed);
                }
            }
            if at_module_level
                && !shadowed.contains(def.name.as_str())
                && let Some(Replacement::Name(new_name)) = map.get(def.name.as_str())
            {
                rename_identifier(&mut def.name, new_name);
            }
            // Class-body assignments become class attributes and keep their
            // names; method bodies skip the class scope entirely and see the
            // module scope again.
            let mut class_scope = shadowed.clone();
            collect_local_bindings(&def.body, &mut class_scope);
            for stmt in &mut def.body {
                if matches!(stmt, Stmt::FunctionDef(_)) {
                    rename_stmt(stmt, map, shadowed, globals_mode, false);
                } else {
                    rename_stmt(stmt, map, &class_scope, globals_mode, false);
                }
            }
        }
        Stmt::Assign(assign) => {
            rename_expr(&mut assign.value, map, shadowed);
            for target in &mut assign.targets {
                rename_expr(target, map, shadowed);
            }
        }
        Stmt::AnnAssign(assign) => {
            rename_expr(&mut assign.annotation, map, shadowed);
            if let Some(value) = &mut assign.value {
                rename_expr(value, map, shadowed);
            }
            rename_expr(&mut assign.target, map, shadowed);
        }
        Stmt::AugAssign(assign) => {
            rename_expr(&mut assign.value, map, shadowed);
            rename_expr(&mut assign.target, map, shadowed);
        }
        Stmt::Delete(delete) => {
            for target in &mut delete.targets {
                rename_expr(target, map, shadowed);
            }
        }
        Stmt::Expr(expr_stmt) => rename_expr(&mut expr_stmt.value, map, shadowed),
        Stmt::Return(ret) => {
            if let Some(value) = &mut ret.value {
                rename_expr(value, map, shadowed);
            }
        }
        Stmt::Raise(raise) => {
            if let Some(exc) = &mut raise.exc {
                rename_expr(exc, map, shadowed);
            }
            if let Some(cause) = &mut raise.cause {
                rename_expr(cause, map, shadowed);
            }
        }
        Stmt::Assert(assert_stmt) => {
            rename_expr(&mut assert_stmt.test, map, shadowed);
            if let Some(msg) = &mut assert_stmt.msg {
                rename_expr(msg, map, shadowed);
            }
        }
        Stmt::If(if_stmt) => {
            rename_expr(&mut if_stmt.test, map, shadowed);
            for stmt in &mut if_stmt.body {
                rename_stmt(stmt, map, shadowed, globals_mode, at_module_level);
            }
            for clause in &mut if_stmt.elif_else_clauses {
                if let Some(test) = &mut clause.test {
                    rename_expr(test, map, shadowed);
                }
                for stmt in &mut clause.body {
                    rename_stmt(stmt, map, shadowed, globals_mode, at_module_level);
                }
            }
        }
        Stmt::While(while_stmt) => {
            rename_expr(&mut while_stmt.test, map, shadowed);
            for stmt in &mut while_stmt.body {
                rename_stmt(stmt, map, shadowed, globals_mode, at_module_level);
            }
            for stmt in &mut while_stmt.orelse {
                rename_stmt(stmt, map, shadowed, globals_mode, at_module_level);
            }
        }
        Stmt::For(for_stmt) => {
            rename_expr(&mut for_stmt.iter, map, shadowed);
            rename_expr(&mut for_stmt.target, map, shadowed);
            for stmt in &mut for_stmt.body {
                rename_stmt(stmt, map, shadowed, globals_mode, at_module_level);
            }
            for stmt in &mut for_stmt.orelse {
                rename_stmt(stmt, map, shadowed, globals_mode, at_module_level);
            }
        }
        Stmt::With(with_stmt) => {
            for item in &mut with_stmt.items {
                rename_expr(&mut item.context_expr, map, shadowed);
                if let Some(vars) = &mut item.optional_vars {
                    rename_expr(vars, map, shadowed);
                }
            }
            for stmt in &mut with_stmt.body {
                rename_stmt(stmt, map, shadowed, globals_mode, at_module_level);
            }
        }
        Stmt::Try(try_stmt) => {
            for stmt in &mut try_stmt.body {
                rename_stmt(stmt, map, shadowed, globals_mode, at_module_level);
            }
            for handler in &mut try_stmt.handlers {
                let ruff_python_ast::ExceptHandler::ExceptHandler(handler) = handler;
                if let Some(type_) = &mut handler.type_ {
                    rename_expr(type_, map, shadowed);
                }
                for stmt in &mut handler.body {
                    rename_stmt(stmt, map, shadowed, globals_mode, at_module_level);
                }
            }
            for stmt in &mut try_stmt.orelse {
                rename_stmt(stmt, map, shadowed, globals_mode, at_module_level);
            }
            for stmt in &mut try_stmt.finalbody {
                rename_stmt(stmt, map, shadowed, globals_mode, at_module_level);
            }
        }
        Stmt::Match(match_stmt) => {
            rename_expr(&mut match_stmt.subject, map, shadowed);
            for case in &mut match_stmt.cases {
                if let Some(guard) = &mut case.guard {
                    rename_expr(guard, map, shadowed);
                }
                for stmt in &mut case.body {
                    rename_stmt(stmt, map, shadowed, globals_mode, at_module_level);
                }
            }
        }
        Stmt::Global(global) => match globals_mode {
            GlobalsMode::Rename => {
                for name in &mut global.names {
                    if let Some(Replacement::Name(new_name)) = map.get(name.as_str()) {
                        rename_identifier(name, new_name);
                    }
                }
            }
            GlobalsMode::Strip => {
                global
                    .names
                    .retain(|name| !matches!(map.get(name.as_str()), Some(Replacement::Attr(..))));
                if global.names.is_empty() {
                    *stmt = ruff_python_ast::Stmt::Pass(ruff_python_ast::StmtPass {
                        range: TextRange::default(),
                        node_index: AtomicNodeIndex::NONE,
                    });
                }
            }
        },
        _ => {}
    }
}

fn rename_expr(
    expr: &mut Expr,
    map: &IndexMap<String, Replacement>,
    shadowed: &FxHashSet<String>,
) {
    match expr {
        Expr::Name(name) => {
            if shadowed.contains(name.id.as_str()) {
                return;
            }
            match map.get(name.id.as_str()) {
                Some(Replacement::Name(new_name)) => {
                    name.id = new_name.clone().into();
                }
                Some(Replacement::Attr(base, attr)) => {
                    let ctx = name.ctx;
                    *expr = ast::attribute(ast::name(base, ExprContext::Load), attr, ctx);
                }
                None => {}
            }
        }
        Expr::Attribute(attr) => rename_expr(&mut attr.value, map, shadowed),
        Expr::Call(call) => {
            rename_expr(&mut call.func, map, shadowed);
            for arg in &mut call.arguments.args {
                rename_expr(arg, map, shadowed);
            }
            for keyword in &mut call.arguments.keywords {
                rename_expr(&mut keyword.value, map, shadowed);
            }
        }
        Expr::BinOp(binop) => {
            rename_expr(&mut binop.left, map, shadowed);
            rename_expr(&mut binop.right, map, shadowed);
        }
        Expr::UnaryOp(unary) => rename_expr(&mut unary.operand, map, shadowed),
        Expr::BoolOp(boolop) => {
            for value in &mut boolop.values {
                rename_expr(value, map, shadowed);
            }
        }
        Expr::Compare(compare) => {
            rename_expr(&mut compare.left, map, shadowed);
            for comparator in &mut compare.comparators {
                rename_expr(comparator, map, shadowed);
            }
        }
        Expr::If(if_expr) => {
            rename_expr(&mut if_expr.test, map, shadowed);
            rename_expr(&mut if_expr.body, map, shadowed);
            rename_expr(&mut if_expr.orelse, map, shadowed);
        }
        Expr::Dict(dict) => {
            for item in &mut dict.items {
                if let Some(key) = &mut item.key {
                    rename_expr(key, map, shadowed);
                }
                rename_expr(&mut item.value, map, shadowed);
            }
        }
        Expr::Set(set) => {
            for element in &mut set.elts {
                rename_expr(element, map, shadowed);
            }
        }
        Expr::List(list) => {
            for element in &mut list.elts {
                rename_expr(element, map, shadowed);
            }
        }
        Expr::Tuple(tuple) => {
            for element in &mut tuple.elts {
                rename_expr(element, map, shadowed);
            }
        }
        Expr::Subscript(subscript) => {
            rename_expr(&mut subscript.value, map, shadowed);
            rename_expr(&mut subscript.slice, map, shadowed);
        }
        Expr::Slice(slice) => {
            for bound in [&mut slice.lower, &mut slice.upper, &mut slice.step]
                .into_iter()
                .flatten()
            {
                rename_expr(bound, map, shadowed);
            }
        }
        Expr::Starred(starred) => rename_expr(&mut starred.value, map, shadowed),
        Expr::Lambda(lambda) => {
            let mut inner = shadowed.clone();
            if let Some(parameters) = &mut lambda.parameters {
                rename_parameters_defaults(parameters, map, shadowed);
                collect_parameter_names(parameters, &mut inner);
            }
            rename_expr(&mut lambda.body, map, &inner);
        }
        Expr::ListComp(comp) => {
            rename_comprehension(&mut comp.generators, &mut [&mut comp.elt], map, shadowed);
        }
        Expr::SetComp(comp) => {
            rename_comprehension(&mut comp.generators, &mut [&mut comp.elt], map, shadowed);
        }
        Expr::Generator(comp) => {
            rename_comprehension(&mut comp.generators, &mut [&mut comp.elt], map, shadowed);
        }
        Expr::DictComp(comp) => {
            rename_comprehension(
                &mut comp.generators,
                &mut [&mut comp.key, &mut comp.value],
                map,
                shadowed,
            );
        }
        Expr::Await(await_expr) => rename_expr(&mut await_expr.value, map, shadowed),
        Expr::Yield(yield_expr) => {
            if let Some(value) = &mut yield_expr.value {
                rename_expr(value, map, shadowed);
            }
        }
        Expr::YieldFrom(yield_from) => rename_expr(&mut yield_from.value, map, shadowed),
        Expr::Named(named) => {
            rename_expr(&mut named.target, map, shadowed);
            rename_expr(&mut named.value, map, shadowed);
        }
        Expr::FString(_) => rename_fstring(expr, map, shadowed),
        _ => {}
    }
}

/// Comprehension targets shadow inside the comprehension; the first iterable
/// still evaluates in the enclosing scope.
fn rename_comprehension(
    generators: &mut [ruff_python_ast::Comprehension],
    outputs: &mut [&mut Expr],
    map: &IndexMap<String, Replacement>,
    shadowed: &FxHashSet<String>,
) {
    let mut inner = shadowed.clone();
    for generator in generators.iter() {
        collect_target_names(&generator.target, &mut inner);
    }
    for (index, generator) in generators.iter_mut().enumerate() {
        if index == 0 {
            rename_expr(&mut generator.iter, map, shadowed);
        } else {
            rename_expr(&mut generator.iter, map, &inner);
        }
        for if_clause in &mut generator.ifs {
            rename_expr(if_clause, map, &inner);
        }
    }
    for output in outputs {
        rename_expr(output, map, &inner);
    }
}

/// Renames propagate into f-string interpolations; the elements are rebuilt
/// because the string value only exposes an immutable iterator.
fn rename_fstring(
    expr: &mut Expr,
    map: &IndexMap<String, Replacement>,
    shadowed: &FxHashSet<String>,
) {
    let Expr::FString(fstring) = expr else { return };

    let mut new_elements = Vec::new();
    let mut changed = false;
    for element in fstring.value.elements() {
        match element {
            ruff_python_ast::InterpolatedStringElement::Literal(literal) => {
                new_elements.push(ruff_python_ast::InterpolatedStringElement::Literal(
                    literal.clone(),
                ));
            }
            ruff_python_ast::InterpolatedStringElement::Interpolation(interpolation) => {
                let mut inner = (*interpolation.expression).clone();
                let before = format!("{inner:?}");
                rename_expr(&mut inner, map, shadowed);
                if format!("{inner:?}") != before {
                    changed = true;
                }
                new_elements.push(ruff_python_ast::InterpolatedStringElement::Interpolation(
                    ruff_python_ast::InterpolatedElement {
                        expression: Box::new(inner),
                        debug_text: interpolation.debug_text.clone(),
                        conversion: interpolation.conversion,
                        format_spec: interpolation.format_spec.clone(),
                        range: interpolation.range,
                        node_index: AtomicNodeIndex::NONE,
                    },
                ));
            }
        }
    }

    if changed {
        let flags = fstring
            .value
            .iter()
            .find_map(|part| match part {
                ruff_python_ast::FStringPart::FString(f) => Some(f.flags),
                _ => None,
            })
            .unwrap_or_else(ruff_python_ast::FStringFlags::empty);
        let rebuilt = ruff_python_ast::FString {
            elements: ruff_python_ast::InterpolatedStringElements::from(new_elements),
            range: TextRange::default(),
            flags,
            node_index: AtomicNodeIndex::NONE,
        };
        *expr = Expr::FString(ruff_python_ast::ExprFString {
            value: ruff_python_ast::FStringValue::single(rebuilt),
            range: fstring.range,
            node_index: AtomicNodeIndex::NONE,
        });
    }
}

fn rename_parameters_defaults(
    parameters: &mut ruff_python_ast::Parameters,
    map: &IndexMap<String, Replacement>,
    shadowed: &FxHashSet<String>,
) {
    for parameter in parameters
        .posonlyargs
        .iter_mut()
        .chain(parameters.args.iter_mut())
        .chain(parameters.kwonlyargs.iter_mut())
    {
        if let Some(default) = &mut parameter.default {
            rename_expr(default, map, shadowed);
        }
        if let Some(annotation) = &mut parameter.parameter.annotation {
            rename_expr(annotation, map, shadowed);
        }
    }
}

fn collect_parameter_names(parameters: &ruff_python_ast::Parameters, into: &mut FxHashSet<String>) {
    for parameter in parameters.posonlyargs.iter().chain(&parameters.args).chain(&parameters.kwonlyargs) {
        into.insert(parameter.parameter.name.to_string());
    }
    if let Some(vararg) = &parameters.vararg {
        into.insert(vararg.name.to_string());
    }
    if let Some(kwarg) = &parameters.kwarg {
        into.insert(kwarg.name.to_string());
    }
}

fn collect_target_names(target: &Expr, into: &mut FxHashSet<String>) {
    match target {
        Expr::Name(name) => {
            into.insert(name.id.to_string());
        }
        Expr::Tuple(tuple) => {
            for element in &tuple.elts {
                collect_target_names(element, into);
            }
        }
        Expr::List(list) => {
            for element in &list.elts {
                collect_target_names(element, into);
            }
        }
        Expr::Starred(starred) => collect_target_names(&starred.value, into),
        _ => {}
    }
}

/// Names bound in a function body (one scope deep; nested functions and
/// classes contribute only their own names).
fn collect_local_bindings(body: &[Stmt], into: &mut FxHashSet<String>) {
    for stmt in body {
        match stmt {
            Stmt::FunctionDef(def) => {
                into.insert(def.name.to_string());
            }
            Stmt::ClassDef(def) => {
                into.insert(def.name.to_string());
            }
            Stmt::Assign(assign) => {
                for target in &assign.targets {
                    collect_target_names(target, into);
                }
            }
            Stmt::AnnAssign(assign) => collect_target_names(&assign.target, into),
            Stmt::AugAssign(assign) => collect_target_names(&assign.target, into),
            Stmt::Delete(delete) => {
                for target in &delete.targets {
                    collect_target_names(target, into);
                }
            }
            Stmt::For(for_stmt) => {
                collect_target_names(&for_stmt.target, into);
                collect_local_bindings(&for_stmt.body, into);
                collect_local_bindings(&for_stmt.orelse, into);
            }
            Stmt::While(while_stmt) => {
                collect_local_bindings(&while_stmt.body, into);
                collect_local_bindings(&while_stmt.orelse, into);
            }
            Stmt::If(if_stmt) => {
                collect_local_bindings(&if_stmt.body, into);
                for clause in &if_stmt.elif_else_clauses {
                    collect_local_bindings(&clause.body, into);
                }
            }
            Stmt::With(with_stmt) => {
                for item in &with_stmt.items {
                    if let Some(vars) = &item.optional_vars {
                        collect_target_names(vars, into);
                    }
                }
                collect_local_bindings(&with_stmt.body, into);
            }
            Stmt::Try(try_stmt) => {
                collect_local_bindings(&try_stmt.body, into);
                for handler in &try_stmt.handlers {
                    let ruff_python_ast::ExceptHandler::ExceptHandler(handler) = handler;
                    if let Some(name) = &handler.name {
                        into.insert(name.to_string());
                    }
                    collect_local_bindings(&handler.body, into);
                }
                collect_local_bindings(&try_stmt.orelse, into);
                collect_local_bindings(&try_stmt.finalbody, into);
            }
            Stmt::Import(import) => {
                for alias in &import.names {
                    match &alias.asname {
                        Some(asname) => {
                            into.insert(asname.to_string());
                        }
                        None => {
                            into.insert(
                                alias
                                    .name
                                    .as_str()
                                    .split('.')
                                    .next()
                                    .unwrap_or_default()
                                    .to_owned(),
                            );
                        }
                    }
                }
            }
            Stmt::ImportFrom(import) => {
                for alias in &import.names {
                    if alias.name.as_str() == "*" {
                        continue;
                    }
                    let binding = alias.asname.as_ref().unwrap_or(&alias.name);
                    into.insert(binding.to_string());
                }
            }
            _ => {}
        }
    }
}

/// `global` names declared in a function body (not inside nested functions).
fn collect_global_names(body: &[Stmt], into: &mut FxHashSet<String>) {
    for stmt in body {
        match stmt {
            Stmt::Global(global) => {
                for name in &global.names {
                    into.insert(name.to_string());
                }
            }
            Stmt::If(if_stmt) => {
                collect_global_names(&if_stmt.body, into);
                for clause in &if_stmt.elif_else_clauses {
                    collect_global_names(&clause.body, into);
                }
            }
            Stmt::For(for_stmt) => {
                collect_global_names(&for_stmt.body, into);
                collect_global_names(&for_stmt.orelse, into);
            }
            Stmt::While(while_stmt) => {
                collect_global_names(&while_stmt.body, into);
                collect_global_names(&while_stmt.orelse, into);
            }
            Stmt::With(with_stmt) => collect_global_names(&with_stmt.body, into),
            Stmt::Try(try_stmt) => {
                collect_global_names(&try_stmt.body, into);
                for handler in &try_stmt.handlers {
                    let ruff_python_ast::ExceptHandler::ExceptHandler(handler) = handler;
                    collect_global_names(&handler.body, into);
                }
                collect_global_names(&try_stmt.orelse, into);
                collect_global_names(&try_stmt.finalbody, into);
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Rewrite an inlined module in place.
pub fn transform_inline_module(
    module: &mut ModModule,
    module_id: ModuleId,
    view: &BundleView<'_>,
    sink: &mut DiagnosticSink,
) -> TransformResult {
    let mut rewriter = ImportRewriter::new(view, module_id, sink);
    let body = std::mem::take(&mut module.body);
    let mut body = rewriter.rewrite_body(body, true);
    let overlay = rewriter.overlay.clone();
    let result = rewriter.result;

    let mut map: IndexMap<String, Replacement> = IndexMap::new();
    for (key, emitted) in view.plan.iter() {
        let (owner, original) = key;
        if *owner == module_id && original != emitted {
            map.insert(original.clone(), Replacement::Name(emitted.to_owned()));
        }
    }
    for (local, emitted) in overlay {
        if local != emitted {
            map.insert(local, Replacement::Name(emitted));
        }
    }

    if !map.is_empty() {
        apply_replacements(&mut body, &map, GlobalsMode::Rename);
    }
    module.body = body;
    result
}

/// Rewrite a wrapped module's body for life inside its init function.
/// Returns the statements to place between the module-object preamble and
/// the `return module`.
pub fn transform_wrapped_body(
    module: &ModModule,
    module_id: ModuleId,
    view: &BundleView<'_>,
    sink: &mut DiagnosticSink,
) -> (Vec<Stmt>, TransformResult) {
    let mut rewriter = ImportRewriter::new(view, module_id, sink);
    let mut body = rewriter.rewrite_body(module.body.clone(), true);
    let overlay = rewriter.overlay.clone();
    let result = rewriter.result;

    // References to other inlined modules' bindings.
    let overlay_map: IndexMap<String, Replacement> = overlay
        .iter()
        .filter(|(local, emitted)| local != emitted)
        .map(|(local, emitted)| (local.clone(), Replacement::Name(emitted.clone())))
        .collect();
    if !overlay_map.is_empty() {
        apply_replacements(&mut body, &overlay_map, GlobalsMode::Rename);
    }

    // Functions declaring `global x` operate on the module object's slot.
    let mut declared = FxHashSet::default();
    for stmt in &body {
        if let Stmt::FunctionDef(def) = stmt {
            collect_global_names(&def.body, &mut declared);
        }
    }
    collect_global_names_nested(&body, &mut declared);
    if !declared.is_empty() {
        let lift_map: IndexMap<String, Replacement> = declared
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    Replacement::Attr("module".to_owned(), name.clone()),
                )
            })
            .collect();
        lift_globals_in_functions(&mut body, &lift_map);
    }

    // Mirror every top-level binding onto the module object.
    let mut mirrored = Vec::with_capacity(body.len() * 2);
    for stmt in body {
        let bound = top_level_binding_names(&stmt);
        mirrored.push(stmt);
        for name in bound {
            mirrored.push(ast::attr_assign(
                ast::name("module", ExprContext::Load),
                &name,
                ast::name(&name, ExprContext::Load),
            ));
        }
    }

    // Re-exported inline bindings still need to be visible as attributes.
    let exports = &view.export_sets[module_id.index()];
    for (local, emitted) in &overlay {
        if exports.contains(local) {
            mirrored.push(ast::attr_assign(
                ast::name("module", ExprContext::Load),
                local,
                ast::name(emitted, ExprContext::Load),
            ));
        }
    }

    (mirrored, result)
}

/// Apply global-lifting inside every function of a wrapped body.
fn lift_globals_in_functions(body: &mut [Stmt], lift_map: &IndexMap<String, Replacement>) {
    for stmt in body {
        if let Stmt::FunctionDef(def) = stmt {
            let mut declared_here = FxHashSet::default();
            collect_global_names(&def.body, &mut declared_here);
            if !declared_here.is_empty() {
                let scoped: IndexMap<String, Replacement> = lift_map
                    .iter()
                    .filter(|(name, _)| declared_here.contains(name.as_str()))
                    .map(|(name, replacement)| (name.clone(), replacement.clone()))
                    .collect();
                let shadowed = FxHashSet::default();
                for inner in &mut def.body {
                    rename_stmt(inner, &scoped, &shadowed, GlobalsMode::Strip, false);
                }
            }
            // Nested defs may declare globals of their own.
            lift_globals_in_functions(&mut def.body, lift_map);
        } else if let Stmt::ClassDef(def) = stmt {
            lift_globals_in_functions(&mut def.body, lift_map);
        }
    }
}

fn collect_global_names_nested(body: &[Stmt], into: &mut FxHashSet<String>) {
    for stmt in body {
        match stmt {
            Stmt::FunctionDef(def) => {
                collect_global_names(&def.body, into);
                collect_global_names_nested(&def.body, into);
            }
            Stmt::ClassDef(def) => collect_global_names_nested(&def.body, into),
            _ => {}
        }
    }
}

/// Names a top-level statement binds, for module-object mirroring.
fn top_level_binding_names(stmt: &Stmt) -> Vec<String> {
    let mut names = FxHashSet::default();
    match stmt {
        Stmt::FunctionDef(def) => {
            names.insert(def.name.to_string());
        }
        Stmt::ClassDef(def) => {
            names.insert(def.name.to_string());
        }
        Stmt::Assign(assign) => {
            for target in &assign.targets {
                collect_target_names(target, &mut names);
            }
        }
        Stmt::AnnAssign(assign) => {
            if assign.value.is_some() {
                collect_target_names(&assign.target, &mut names);
            }
        }
        Stmt::AugAssign(assign) => collect_target_names(&assign.target, &mut names),
        _ => {}
    }
    let mut sorted: Vec<String> = names.into_iter().collect();
    sorted.sort();
    sorted
}

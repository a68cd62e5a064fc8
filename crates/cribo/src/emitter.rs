//! Output assembly.
//!
//! Stitches the transformed modules into one artifact:
//! future imports, hoisted external imports, wrapped-module init functions,
//! the module registry plus the meta-path finder, the inlined bodies in
//! dependency order, and finally the entry script body. The AST-to-text step
//! is `ruff_python_codegen`, one statement at a time.

use std::path::PathBuf;

use indexmap::{IndexMap, IndexSet};
use log::debug;
use ruff_python_ast::{ExprContext, Stmt};

use crate::{
    ast_builder as ast,
    cycles::Disposition,
    graph::ModuleId,
    rename::init_function_name,
};

/// A module ready for emission.
#[derive(Debug)]
pub struct PreparedModule {
    pub id: ModuleId,
    /// Dotted name.
    pub name: String,
    pub path: PathBuf,
    pub disposition: Disposition,
    /// Inline: rewritten top-level statements. Wrap: init-body statements
    /// (module-attribute mirrors included).
    pub body: Vec<Stmt>,
    /// Exported `(original, emitted)` pairs for the namespace object.
    pub ns_exports: Vec<(String, String)>,
    /// Another module binds this one as an object; a namespace is emitted
    /// after its body.
    pub needs_namespace: bool,
    /// Static `__all__`, mirrored onto the namespace object.
    pub static_all: Option<Vec<String>>,
    /// Synthetic id (wrapped modules only).
    pub synthetic: String,
}

#[derive(Debug)]
pub struct EmitInputs {
    /// In emission order; the entry module is last.
    pub modules: Vec<PreparedModule>,
    /// Deduplicated `__future__` features.
    pub future_features: Vec<(String, Option<String>)>,
    /// Hoisted external imports, first-seen order.
    pub hoisted_imports: Vec<Stmt>,
    /// Namespace chain root segment -> emitted variable name.
    pub ns_vars: IndexMap<String, String>,
}

/// The meta-path hook: routes imports of original dotted names through the
/// init-function table so late `import x` statements and `__import__` calls
/// still resolve.
const FINDER_SNIPPET: &str = r#"
class CriboBundledFinder:
    def __init__(self, module_registry, init_functions):
        self.module_registry = module_registry
        self.init_functions = init_functions

    def find_spec(self, fullname, path, target=None):
        if fullname in self.module_registry:
            synthetic_name = self.module_registry[fullname]
            if synthetic_name not in sys.modules:
                init_func = self.init_functions.get(synthetic_name)
                if init_func:
                    init_func()
            import importlib.util

            return importlib.util.find_spec(synthetic_name)
        return None


sys.meta_path.insert(0, CriboBundledFinder(__cribo_modules, __cribo_init_functions))
"#;

pub fn emit_bundle(inputs: &EmitInputs) -> String {
    let wrapped: Vec<&PreparedModule> = inputs
        .modules
        .iter()
        .filter(|m| m.disposition == Disposition::Wrap)
        .collect();
    let any_namespace = inputs.modules.iter().any(|m| m.needs_namespace);

    // Each chunk becomes a blank-line-separated block in the output.
    let mut chunks: Vec<Vec<Stmt>> = Vec::new();

    if !inputs.future_features.is_empty() {
        let aliases = inputs
            .future_features
            .iter()
            .map(|(name, alias)| ast::alias(name, alias.as_deref()))
            .collect();
        chunks.push(vec![ast::import_from(Some("__future__"), aliases, 0)]);
    }

    let mut prelude = Vec::new();
    let mut runtime_names = Vec::new();
    if !wrapped.is_empty() {
        runtime_names.push("sys");
        runtime_names.push("types");
    } else if any_namespace {
        runtime_names.push("types");
    }
    if !runtime_names.is_empty() {
        prelude.push(ast::import(
            runtime_names.iter().map(|n| ast::alias(n, None)).collect(),
        ));
    }
    prelude.extend(inputs.hoisted_imports.iter().cloned());
    if !prelude.is_empty() {
        chunks.push(prelude);
    }

    for module in &wrapped {
        chunks.push(vec![init_function(module)]);
    }

    if !wrapped.is_empty() {
        chunks.push(registry_block(&wrapped));
        let finder = ruff_python_parser::parse_module(FINDER_SNIPPET)
            .expect("finder snippet must parse")
            .into_syntax();
        chunks.push(finder.body);
    }

    let mut created_namespaces: IndexSet<String> = IndexSet::new();
    let entry_index = inputs.modules.len().saturating_sub(1);
    for (index, module) in inputs.modules.iter().enumerate() {
        if module.disposition == Disposition::Wrap {
            continue;
        }
        let is_entry = index == entry_index;
        let mut block = Vec::new();
        block.extend(module.body.iter().cloned());
        if module.needs_namespace {
            block.extend(namespace_statements(
                module,
                &inputs.ns_vars,
                &mut created_namespaces,
            ));
        }
        if !block.is_empty() || is_entry {
            debug!("Emitting module '{}'", module.name);
            chunks.push(block);
        }
    }

    render(&chunks)
}

/// The idempotent init function for one wrapped module.
fn init_function(module: &PreparedModule) -> Stmt {
    let synthetic = module.synthetic.as_str();
    let sys_modules = || ast::dotted_name(&["sys", "modules"], ExprContext::Load);

    let mut body = Vec::with_capacity(module.body.len() + 6);

    // Re-entry during a cycle returns the partially-initialized module.
    body.push(ast::if_stmt(
        ast::contains(ast::string_literal(synthetic), sys_modules()),
        vec![ast::return_stmt(Some(ast::subscript(
            sys_modules(),
            ast::string_literal(synthetic),
            ExprContext::Load,
        )))],
    ));

    body.push(ast::simple_assign(
        "module",
        ast::call(
            ast::dotted_name(&["types", "ModuleType"], ExprContext::Load),
            vec![ast::string_literal(&module.name)],
            vec![],
        ),
    ));
    body.push(ast::attr_assign(
        ast::name("module", ExprContext::Load),
        "__file__",
        ast::string_literal(&module.path.display().to_string()),
    ));

    // Register under the synthetic id and the original dotted name.
    for key in [synthetic, module.name.as_str()] {
        body.push(ast::assign(
            vec![ast::subscript(
                sys_modules(),
                ast::string_literal(key),
                ExprContext::Store,
            )],
            ast::name("module", ExprContext::Load),
        ));
    }

    // Attach to the parent package when it is already initialized.
    if let Some((parent, leaf)) = module.name.rsplit_once('.') {
        body.push(ast::if_stmt(
            ast::contains(ast::string_literal(parent), sys_modules()),
            vec![ast::assign(
                vec![ast::attribute(
                    ast::subscript(
                        sys_modules(),
                        ast::string_literal(parent),
                        ExprContext::Load,
                    ),
                    leaf,
                    ExprContext::Store,
                )],
                ast::name("module", ExprContext::Load),
            )],
        ));
    }

    body.extend(module.body.iter().cloned());
    body.push(ast::return_stmt(Some(ast::name(
        "module",
        ExprContext::Load,
    ))));

    ast::function_def(&init_function_name(synthetic), body)
}

/// `__cribo_modules` and `__cribo_init_functions` literals.
fn registry_block(wrapped: &[&PreparedModule]) -> Vec<Stmt> {
    let registry = ast::string_dict(
        wrapped
            .iter()
            .map(|m| (m.name.clone(), ast::string_literal(&m.synthetic)))
            .collect(),
    );
    let init_table = ast::string_dict(
        wrapped
            .iter()
            .map(|m| {
                (
                    m.synthetic.clone(),
                    ast::name(&init_function_name(&m.synthetic), ExprContext::Load),
                )
            })
            .collect(),
    );
    vec![
        ast::simple_assign("__cribo_modules", registry),
        ast::simple_assign("__cribo_init_functions", init_table),
    ]
}

/// Namespace object(s) for an inlined module bound as a module object.
fn namespace_statements(
    module: &PreparedModule,
    ns_vars: &IndexMap<String, String>,
    created: &mut IndexSet<String>,
) -> Vec<Stmt> {
    let mut stmts = Vec::new();
    let segments: Vec<&str> = module.name.split('.').collect();
    let root_var = ns_vars
        .get(segments[0])
        .map(String::as_str)
        .unwrap_or(segments[0]);

    // Build the chain of namespace objects, creating missing links.
    if created.insert(segments[0].to_owned()) {
        stmts.push(ast::simple_assign(
            root_var,
            ast::call(ast::simple_namespace_ctor(), vec![], vec![]),
        ));
    }
    let mut prefix = segments[0].to_owned();
    let mut chain = ast::name(root_var, ExprContext::Load);
    for segment in &segments[1..] {
        prefix.push('.');
        prefix.push_str(segment);
        if created.insert(prefix.clone()) {
            stmts.push(ast::attr_assign(
                chain.clone(),
                segment,
                ast::call(ast::simple_namespace_ctor(), vec![], vec![]),
            ));
        }
        chain = ast::attribute(chain, segment, ExprContext::Load);
    }

    for (original, emitted) in &module.ns_exports {
        stmts.push(ast::attr_assign(
            chain.clone(),
            original,
            ast::name(emitted, ExprContext::Load),
        ));
    }
    if let Some(all_names) = &module.static_all {
        stmts.push(ast::attr_assign(
            chain,
            "__all__",
            ast::list(
                all_names.iter().map(|n| ast::string_literal(n)).collect(),
                ExprContext::Load,
            ),
        ));
    }
    stmts
}

/// Unparse chunks; statements joined by newlines, chunks separated by one
/// blank line, shebang and header up front.
fn render(chunks: &[Vec<Stmt>]) -> String {
    let parsed = ruff_python_parser::parse_module("").expect("empty module must parse");
    let stylist = ruff_python_codegen::Stylist::from_tokens(parsed.tokens(), "");

    let mut blocks = Vec::with_capacity(chunks.len() + 1);
    blocks.push("#!/usr/bin/env python3\n# Generated by Cribo - Python Source Bundler".to_owned());
    for chunk in chunks {
        if chunk.is_empty() {
            continue;
        }
        let text = chunk
            .iter()
            .map(|stmt| ruff_python_codegen::Generator::from(&stylist).stmt(stmt))
            .collect::<Vec<_>>()
            .join("\n");
        blocks.push(text);
    }
    let mut output = blocks.join("\n\n");
    output.push('\n');
    output
}

#[cfg(test)]
mod tests {
    use ruff_python_parser::parse_module;

    use super::*;

    fn inline_module(id: u32, name: &str, source: &str) -> PreparedModule {
        PreparedModule {
            id: ModuleId::new(id),
            name: name.to_owned(),
            path: PathBuf::from(format!("{name}.py")),
            disposition: Disposition::Inline,
            body: parse_module(source).unwrap().into_syntax().body,
            ns_exports: Vec::new(),
            needs_namespace: false,
            static_all: None,
            synthetic: String::new(),
        }
    }

    #[test]
    fn inline_bodies_come_before_entry() {
        let inputs = EmitInputs {
            modules: vec![
                inline_module(1, "utils", "def helper():\n    return 1\n"),
                inline_module(0, "main", "print(helper())\n"),
            ],
            future_features: Vec::new(),
            hoisted_imports: Vec::new(),
            ns_vars: IndexMap::new(),
        };
        let output = emit_bundle(&inputs);
        let helper_pos = output.find("def helper").unwrap();
        let entry_pos = output.find("print(helper())").unwrap();
        assert!(helper_pos < entry_pos);
        assert!(output.starts_with("#!/usr/bin/env python3"));
    }

    #[test]
    fn future_imports_lead_the_output() {
        let inputs = EmitInputs {
            modules: vec![inline_module(0, "main", "x = 1\n")],
            future_features: vec![("annotations".to_owned(), None)],
            hoisted_imports: vec![ast::import(vec![ast::alias("os", None)])],
            ns_vars: IndexMap::new(),
        };
        let output = emit_bundle(&inputs);
        let future_pos = output.find("from __future__ import annotations").unwrap();
        let os_pos = output.find("import os").unwrap();
        let body_pos = output.find("x = 1").unwrap();
        assert!(future_pos < os_pos);
        assert!(os_pos < body_pos);
    }

    #[test]
    fn wrapped_module_gets_registry_and_finder() {
        let mut wrapped = inline_module(1, "config", "value = 42\nmodule.value = value\n");
        wrapped.disposition = Disposition::Wrap;
        wrapped.synthetic = "__cribo_abc123_config".to_owned();

        let inputs = EmitInputs {
            modules: vec![wrapped, inline_module(0, "main", "pass\n")],
            future_features: Vec::new(),
            hoisted_imports: Vec::new(),
            ns_vars: IndexMap::new(),
        };
        let output = emit_bundle(&inputs);
        assert!(output.contains("import sys, types"));
        assert!(output.contains("def __cribo_init___cribo_abc123_config():"));
        assert!(output.contains("sys.modules['__cribo_abc123_config'] = module")
            || output.contains("sys.modules[\"__cribo_abc123_config\"] = module"));
        assert!(output.contains("__cribo_modules"));
        assert!(output.contains("__cribo_init_functions"));
        assert!(output.contains("class CriboBundledFinder"));
        assert!(output.contains("sys.meta_path.insert(0, CriboBundledFinder"));
        // The init function is defined before the registry references it.
        let def_pos = output.find("def __cribo_init___cribo_abc123_config").unwrap();
        let table_pos = output.find("__cribo_init_functions").unwrap();
        assert!(def_pos < table_pos);
    }

    #[test]
    fn namespace_objects_follow_the_module_body() {
        let mut module = inline_module(1, "utils.helpers", "def fmt():\n    return ''\n");
        module.needs_namespace = true;
        module.ns_exports = vec![("fmt".to_owned(), "fmt".to_owned())];

        let mut ns_vars = IndexMap::new();
        ns_vars.insert("utils".to_owned(), "utils".to_owned());
        let inputs = EmitInputs {
            modules: vec![module, inline_module(0, "main", "print(utils.helpers.fmt())\n")],
            future_features: Vec::new(),
            hoisted_imports: Vec::new(),
            ns_vars,
        };
        let output = emit_bundle(&inputs);
        assert!(output.contains("import types"));
        assert!(output.contains("utils = types.SimpleNamespace()"));
        assert!(output.contains("utils.helpers = types.SimpleNamespace()"));
        assert!(output.contains("utils.helpers.fmt = fmt"));
        let ns_pos = output.find("utils.helpers.fmt = fmt").unwrap();
        let use_pos = output.find("print(utils.helpers.fmt())").unwrap();
        assert!(ns_pos < use_pos);
    }

    #[test]
    fn identical_inputs_render_identically() {
        let build = || EmitInputs {
            modules: vec![
                inline_module(1, "utils", "a = 1\n"),
                inline_module(0, "main", "print(a)\n"),
            ],
            future_features: Vec::new(),
            hoisted_imports: Vec::new(),
            ns_vars: IndexMap::new(),
        };
        assert_eq!(emit_bundle(&build()), emit_bundle(&build()));
    }
}

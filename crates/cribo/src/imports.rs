//! Import discovery.
//!
//! A single AST walk that finds every import in a module, wherever it sits:
//! module level, inside functions, behind conditionals. Each import is tagged
//! with its syntactic scope, because function-level imports are evaluated
//! lazily and therefore never constrain module ordering. Literal
//! `importlib.import_module` / `__import__` calls are discovered as bare
//! module imports; non-literal ones are reported for the dynamic-import
//! diagnostic.

use ruff_python_ast::{
    Expr, ModModule, Stmt,
    visitor::{Visitor, walk_expr, walk_stmt},
};
use ruff_text_size::TextRange;

/// Where an import statement sits syntactically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportScope {
    /// Executes when the module is imported.
    Module,
    /// Executes when the enclosing function is called.
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportForm {
    /// `import a.b [as c]` — binds a module object.
    Module,
    /// `from m import a [as b], ...` — binds values out of `m`.
    From,
    /// `from m import *`.
    Star,
}

#[derive(Debug, Clone)]
pub struct DiscoveredImport {
    pub form: ImportForm,
    /// Dotted target as written; empty for `from . import x`.
    pub module: String,
    /// Leading dots of a relative import.
    pub level: u32,
    /// `(name, alias)` pairs for `From`; the single optional alias for
    /// `Module` lives in the alias slot of the only pair.
    pub names: Vec<(String, Option<String>)>,
    pub scope: ImportScope,
    pub range: TextRange,
}

/// A dynamic import whose target cannot be known statically.
#[derive(Debug, Clone)]
pub struct DynamicImportUse {
    pub callee: String,
    pub range: TextRange,
}

#[derive(Debug, Default)]
pub struct ImportCollector {
    imports: Vec<DiscoveredImport>,
    dynamic: Vec<DynamicImportUse>,
    function_depth: usize,
}

impl ImportCollector {
    pub fn collect(module: &ModModule) -> (Vec<DiscoveredImport>, Vec<DynamicImportUse>) {
        let mut collector = Self::default();
        collector.visit_body(&module.body);
        (collector.imports, collector.dynamic)
    }

    fn scope(&self) -> ImportScope {
        if self.function_depth > 0 {
            ImportScope::Function
        } else {
            ImportScope::Module
        }
    }

    fn record_call(&mut self, call: &ruff_python_ast::ExprCall) {
        let callee = match call.func.as_ref() {
            Expr::Name(name) if name.id.as_str() == "__import__" => "__import__",
            Expr::Attribute(attr) => {
                let is_importlib = matches!(
                    attr.value.as_ref(),
                    Expr::Name(base) if base.id.as_str() == "importlib"
                );
                if is_importlib && attr.attr.as_str() == "import_module" {
                    "importlib.import_module"
                } else {
                    return;
                }
            }
            _ => return,
        };

        match call.arguments.args.first() {
            Some(Expr::StringLiteral(literal)) => {
                let target = literal.value.to_str().to_owned();
                let level = target.chars().take_while(|&c| c == '.').count() as u32;
                let module = target.trim_start_matches('.').to_owned();
                self.imports.push(DiscoveredImport {
                    form: ImportForm::Module,
                    module,
                    level,
                    names: vec![(target, None)],
                    scope: self.scope(),
                    range: call.range,
                });
            }
            _ => self.dynamic.push(DynamicImportUse {
                callee: callee.to_owned(),
                range: call.range,
            }),
        }
    }
}

impl<'a> Visitor<'a> for ImportCollector {
    fn visit_stmt(&mut self, stmt: &'a Stmt) {
        match stmt {
            Stmt::Import(import) => {
                for alias in &import.names {
                    self.imports.push(DiscoveredImport {
                        form: ImportForm::Module,
                        module: alias.name.to_string(),
                        level: 0,
                        names: vec![(
                            alias.name.to_string(),
                            alias.asname.as_ref().map(ToString::to_string),
                        )],
                        scope: self.scope(),
                        range: import.range,
                    });
                }
            }
            Stmt::ImportFrom(import) => {
                let module = import
                    .module
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                let is_star =
                    import.names.len() == 1 && import.names[0].name.as_str() == "*";
                let (form, names) = if is_star {
                    (ImportForm::Star, Vec::new())
                } else {
                    (
                        ImportForm::From,
                        import
                            .names
                            .iter()
                            .map(|alias| {
                                (
                                    alias.name.to_string(),
                                    alias.asname.as_ref().map(ToString::to_string),
                                )
                            })
                            .collect(),
                    )
                };
                self.imports.push(DiscoveredImport {
                    form,
                    module,
                    level: import.level,
                    names,
                    scope: self.scope(),
                    range: import.range,
                });
            }
            Stmt::FunctionDef(_) => {
                self.function_depth += 1;
                walk_stmt(self, stmt);
                self.function_depth -= 1;
                return;
            }
            _ => {}
        }
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &'a Expr) {
        if let Expr::Call(call) = expr {
            self.record_call(call);
        }
        walk_expr(self, expr);
    }
}

#[cfg(test)]
mod tests {
    use ruff_python_parser::parse_module;

    use super::*;

    fn collect(source: &str) -> (Vec<DiscoveredImport>, Vec<DynamicImportUse>) {
        let parsed = parse_module(source).expect("test module must parse");
        ImportCollector::collect(&parsed.into_syntax())
    }

    #[test]
    fn module_and_function_scopes() {
        let (imports, _) = collect(
            r#"
import os

def work():
    import json
    from helpers import transform
"#,
        );
        assert_eq!(imports.len(), 3);
        assert_eq!(imports[0].module, "os");
        assert_eq!(imports[0].scope, ImportScope::Module);
        assert_eq!(imports[1].module, "json");
        assert_eq!(imports[1].scope, ImportScope::Function);
        assert_eq!(imports[2].module, "helpers");
        assert_eq!(imports[2].form, ImportForm::From);
        assert_eq!(imports[2].scope, ImportScope::Function);
    }

    #[test]
    fn conditional_imports_stay_module_level() {
        let (imports, _) = collect(
            r#"
try:
    import fast_json as json
except ImportError:
    import json
"#,
        );
        assert_eq!(imports.len(), 2);
        assert!(imports.iter().all(|i| i.scope == ImportScope::Module));
        assert_eq!(imports[0].names[0].1.as_deref(), Some("json"));
    }

    #[test]
    fn relative_from_import() {
        let (imports, _) = collect("from ..pkg import thing as alias\n");
        assert_eq!(imports[0].level, 2);
        assert_eq!(imports[0].module, "pkg");
        assert_eq!(
            imports[0].names,
            vec![("thing".to_owned(), Some("alias".to_owned()))]
        );
    }

    #[test]
    fn star_import_form() {
        let (imports, _) = collect("from utils import *\n");
        assert_eq!(imports[0].form, ImportForm::Star);
        assert!(imports[0].names.is_empty());
    }

    #[test]
    fn literal_importlib_is_static() {
        let (imports, dynamic) = collect(
            r#"
import importlib
mod = importlib.import_module("plugins.default")
"#,
        );
        assert!(dynamic.is_empty());
        assert!(imports
            .iter()
            .any(|i| i.module == "plugins.default" && i.form == ImportForm::Module));
    }

    #[test]
    fn non_literal_importlib_is_dynamic() {
        let (_, dynamic) = collect(
            r#"
import importlib

def load(name):
    return importlib.import_module(name)
"#,
        );
        assert_eq!(dynamic.len(), 1);
        assert_eq!(dynamic[0].callee, "importlib.import_module");
    }

    #[test]
    fn dunder_import_is_detected() {
        let (_, dynamic) = collect("mod = __import__(name)\n");
        assert_eq!(dynamic.len(), 1);
        assert_eq!(dynamic[0].callee, "__import__");
    }
}

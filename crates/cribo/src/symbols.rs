//! Top-level symbol and export collection.
//!
//! A single pass over a module's top-level statements produces its ordered
//! symbol table; a second visitor extracts the `__all__` export declaration.
//! Declaration order is preserved because emission must keep it.

use ruff_python_ast::{
    Expr, ModModule, Stmt,
    visitor::{Visitor, walk_expr},
};

use crate::types::FxIndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Class,
    Variable,
    /// Binding introduced by an import statement.
    Import,
    /// The `__all__` declaration itself.
    AllList,
}

/// Ordered table of a module's top-level bindings.
#[derive(Debug, Default)]
pub struct SymbolTable {
    pub symbols: FxIndexMap<String, SymbolKind>,
    /// The module subscripts `globals()`; its name table must survive into
    /// the output, so it cannot be flattened.
    pub uses_dynamic_globals: bool,
}

impl SymbolTable {
    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    fn bind(&mut self, name: &str, kind: SymbolKind) {
        // First binding wins for ordering; later rebinds keep the slot.
        self.symbols.entry(name.to_owned()).or_insert(kind);
    }

    /// Whether the top level consists purely of variable bindings — the shape
    /// that makes an import cycle a temporal paradox.
    pub fn defines_only_variables(&self) -> bool {
        let mut saw_value = false;
        for kind in self.symbols.values() {
            match kind {
                SymbolKind::Function | SymbolKind::Class => return false,
                SymbolKind::Variable => saw_value = true,
                SymbolKind::Import | SymbolKind::AllList => {}
            }
        }
        saw_value
    }
}

/// The module's declared export set.
#[derive(Debug, Clone, Default)]
pub struct ExportInfo {
    /// Static `__all__` contents, when the declaration is a literal list or
    /// tuple of string literals.
    pub names: Option<Vec<String>>,
    /// `__all__` exists but is computed or mutated at runtime.
    pub is_dynamic: bool,
}

/// Collect the ordered top-level symbol table.
pub fn collect_symbols(module: &ModModule) -> SymbolTable {
    let mut table = SymbolTable::default();
    bind_statements(&module.body, &mut table);

    let mut detector = DynamicGlobalsDetector::default();
    detector.visit_body(&module.body);
    table.uses_dynamic_globals = detector.found;

    table
}

fn bind_statements(body: &[Stmt], table: &mut SymbolTable) {
    for stmt in body {
        match stmt {
            Stmt::FunctionDef(def) => table.bind(def.name.as_str(), SymbolKind::Function),
            Stmt::ClassDef(def) => table.bind(def.name.as_str(), SymbolKind::Class),
            Stmt::Assign(assign) => {
                for target in &assign.targets {
                    bind_target(target, table);
                }
            }
            Stmt::AnnAssign(assign) => bind_target(&assign.target, table),
            Stmt::AugAssign(assign) => bind_target(&assign.target, table),
            Stmt::Import(import) => {
                for alias in &import.names {
                    let binding = match &alias.asname {
                        Some(asname) => asname.to_string(),
                        // `import a.b` binds the top-level package name.
                        None => alias
                            .name
                            .as_str()
                            .split('.')
                            .next()
                            .unwrap_or_default()
                            .to_owned(),
                    };
                    table.bind(&binding, SymbolKind::Import);
                }
            }
            Stmt::ImportFrom(import) => {
                if import
                    .module
                    .as_ref()
                    .is_some_and(|m| m.as_str() == "__future__")
                {
                    continue;
                }
                for alias in &import.names {
                    if alias.name.as_str() == "*" {
                        continue;
                    }
                    let binding = alias.asname.as_ref().unwrap_or(&alias.name);
                    table.bind(binding.as_str(), SymbolKind::Import);
                }
            }
            // Conditional top-level bindings still execute at import time.
            Stmt::If(if_stmt) => {
                bind_statements(&if_stmt.body, table);
                for clause in &if_stmt.elif_else_clauses {
                    bind_statements(&clause.body, table);
                }
            }
            Stmt::Try(try_stmt) => {
                bind_statements(&try_stmt.body, table);
                for handler in &try_stmt.handlers {
                    let ruff_python_ast::ExceptHandler::ExceptHandler(handler) = handler;
                    bind_statements(&handler.body, table);
                }
                bind_statements(&try_stmt.orelse, table);
                bind_statements(&try_stmt.finalbody, table);
            }
            Stmt::For(for_stmt) => {
                bind_target(&for_stmt.target, table);
                bind_statements(&for_stmt.body, table);
                bind_statements(&for_stmt.orelse, table);
            }
            Stmt::While(while_stmt) => {
                bind_statements(&while_stmt.body, table);
                bind_statements(&while_stmt.orelse, table);
            }
            Stmt::With(with_stmt) => {
                for item in &with_stmt.items {
                    if let Some(vars) = &item.optional_vars {
                        bind_target(vars, table);
                    }
                }
                bind_statements(&with_stmt.body, table);
            }
            _ => {}
        }
    }
}

fn bind_target(target: &Expr, table: &mut SymbolTable) {
    match target {
        Expr::Name(name) => {
            let kind = if name.id.as_str() == "__all__" {
                SymbolKind::AllList
            } else {
                SymbolKind::Variable
            };
            table.bind(name.id.as_str(), kind);
        }
        Expr::Tuple(tuple) => {
            for element in &tuple.elts {
                bind_target(element, table);
            }
        }
        Expr::List(list) => {
            for element in &list.elts {
                bind_target(element, table);
            }
        }
        Expr::Starred(starred) => bind_target(&starred.value, table),
        // Attribute/subscript targets do not create module bindings.
        _ => {}
    }
}

/// Detects `globals()[...]` anywhere in the module, including inside
/// function bodies.
#[derive(Debug, Default)]
struct DynamicGlobalsDetector {
    found: bool,
}

impl<'a> Visitor<'a> for DynamicGlobalsDetector {
    fn visit_expr(&mut self, expr: &'a Expr) {
        if let Expr::Subscript(subscript) = expr
            && let Expr::Call(call) = subscript.value.as_ref()
            && let Expr::Name(name) = call.func.as_ref()
            && name.id.as_str() == "globals"
            && call.arguments.is_empty()
        {
            self.found = true;
        }
        walk_expr(self, expr);
    }
}

/// Extract the `__all__` declaration.
pub fn collect_exports(module: &ModModule) -> ExportInfo {
    let mut info = ExportInfo::default();
    for stmt in &module.body {
        match stmt {
            Stmt::Assign(assign) => {
                if let Some(Expr::Name(name)) = assign.targets.first()
                    && name.id.as_str() == "__all__"
                {
                    match literal_string_list(&assign.value) {
                        Some(names) => info.names = Some(names),
                        None => info.is_dynamic = true,
                    }
                }
            }
            Stmt::AugAssign(assign) => {
                if let Expr::Name(name) = assign.target.as_ref()
                    && name.id.as_str() == "__all__"
                {
                    info.is_dynamic = true;
                }
            }
            Stmt::Expr(expr_stmt) => {
                // __all__.append / __all__.extend make the set dynamic.
                if let Expr::Call(call) = expr_stmt.value.as_ref()
                    && let Expr::Attribute(attr) = call.func.as_ref()
                    && let Expr::Name(base) = attr.value.as_ref()
                    && base.id.as_str() == "__all__"
                {
                    info.is_dynamic = true;
                }
            }
            _ => {}
        }
    }
    if info.is_dynamic {
        info.names = None;
    }
    info
}

fn literal_string_list(expr: &Expr) -> Option<Vec<String>> {
    let elements = match expr {
        Expr::List(list) => &list.elts,
        Expr::Tuple(tuple) => &tuple.elts,
        _ => return None,
    };
    let mut names = Vec::with_capacity(elements.len());
    for element in elements {
        let Expr::StringLiteral(literal) = element else {
            return None;
        };
        names.push(literal.value.to_str().to_owned());
    }
    Some(names)
}

/// The names a `from m import *` would bind: static `__all__` when present,
/// otherwise every non-underscore top-level binding.
pub fn exported_names(table: &SymbolTable, exports: &ExportInfo) -> Vec<String> {
    if let Some(names) = &exports.names {
        return names.clone();
    }
    table
        .symbols
        .iter()
        .filter(|(name, kind)| !name.starts_with('_') && **kind != SymbolKind::AllList)
        .map(|(name, _)| name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use ruff_python_parser::parse_module;

    use super::*;

    fn table(source: &str) -> SymbolTable {
        let parsed = parse_module(source).expect("test module must parse");
        collect_symbols(&parsed.into_syntax())
    }

    fn exports(source: &str) -> ExportInfo {
        let parsed = parse_module(source).expect("test module must parse");
        collect_exports(&parsed.into_syntax())
    }

    #[test]
    fn collects_in_declaration_order() {
        let table = table(
            r#"
CONSTANT = 1

def helper():
    pass

class Thing:
    pass

x, y = 1, 2
import os
from json import dumps as to_json
"#,
        );
        let names: Vec<&str> = table.symbols.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            vec!["CONSTANT", "helper", "Thing", "x", "y", "os", "to_json"]
        );
        assert_eq!(table.symbols["helper"], SymbolKind::Function);
        assert_eq!(table.symbols["Thing"], SymbolKind::Class);
        assert_eq!(table.symbols["os"], SymbolKind::Import);
    }

    #[test]
    fn conditional_bindings_are_seen() {
        let table = table(
            r#"
try:
    import ujson as json_impl
except ImportError:
    json_impl = None

if True:
    FLAG = 1
"#,
        );
        assert!(table.contains("json_impl"));
        assert!(table.contains("FLAG"));
    }

    #[test]
    fn dotted_import_binds_top_name() {
        let table = table("import os.path\n");
        assert!(table.contains("os"));
        assert!(!table.contains("os.path"));
    }

    #[test]
    fn nested_functions_do_not_bind() {
        let table = table(
            r#"
def outer():
    inner = 1
    def nested():
        pass
"#,
        );
        assert!(table.contains("outer"));
        assert!(!table.contains("inner"));
        assert!(!table.contains("nested"));
    }

    #[test]
    fn constants_only_module_shape() {
        assert!(table("A = 1\nB = A + 1\n").defines_only_variables());
        assert!(!table("A = 1\ndef f():\n    pass\n").defines_only_variables());
        assert!(!table("import os\n").defines_only_variables());
    }

    #[test]
    fn dynamic_globals_detected() {
        assert!(table("def get(name):\n    return globals()[name]\n").uses_dynamic_globals);
        assert!(!table("x = globals\n").uses_dynamic_globals);
    }

    #[test]
    fn static_all_list_and_tuple() {
        assert_eq!(
            exports("__all__ = [\"a\", \"b\"]\n").names,
            Some(vec!["a".to_owned(), "b".to_owned()])
        );
        assert_eq!(
            exports("__all__ = (\"x\",)\n").names,
            Some(vec!["x".to_owned()])
        );
    }

    #[test]
    fn dynamic_all_variants() {
        assert!(exports("__all__ = [n for n in dir()]\n").is_dynamic);
        assert!(exports("__all__ = [\"a\"]\n__all__ += [\"b\"]\n").is_dynamic);
        assert!(exports("__all__ = [\"a\"]\n__all__.append(\"b\")\n").is_dynamic);
    }

    #[test]
    fn star_fallback_skips_underscores() {
        let source = r#"
__all__backup = 1
public = 1
_private = 2

def _hidden():
    pass

def visible():
    pass
"#;
        let parsed = parse_module(source).unwrap();
        let module = parsed.into_syntax();
        let table = collect_symbols(&module);
        let info = collect_exports(&module);
        assert_eq!(
            exported_names(&table, &info),
            vec!["public".to_owned(), "visible".to_owned()]
        );
    }

    #[test]
    fn static_all_wins_over_fallback() {
        let source = r#"
__all__ = ["public_func", "CONSTANT"]

def public_func():
    pass

def _private_func():
    pass

CONSTANT = 42
"#;
        let parsed = parse_module(source).unwrap();
        let module = parsed.into_syntax();
        let table = collect_symbols(&module);
        let info = collect_exports(&module);
        assert_eq!(
            exported_names(&table, &info),
            vec!["public_func".to_owned(), "CONSTANT".to_owned()]
        );
    }
}

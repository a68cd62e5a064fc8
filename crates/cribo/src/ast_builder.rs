//! Factories for synthetic AST nodes.
//!
//! Everything is built with `TextRange::default()` and a dummy node index,
//! marking the nodes as generated rather than parsed.

use ruff_python_ast::{
    Alias, Arguments, AtomicNodeIndex, CmpOp, DictItem, Expr, ExprAttribute, ExprCall,
    ExprCompare, ExprContext, ExprDict, ExprList, ExprName, ExprStringLiteral, ExprSubscript,
    Identifier, Keyword, Parameters, Stmt, StmtAssign, StmtExpr, StmtFunctionDef, StmtIf,
    StmtImport, StmtImportFrom, StmtReturn, StringLiteral, StringLiteralFlags, StringLiteralValue,
};
use ruff_text_size::TextRange;

pub fn name(id: &str, ctx: ExprContext) -> Expr {
    Expr::Name(ExprName {
        id: id.to_owned().into(),
        ctx,
        range: TextRange::default(),
        node_index: AtomicNodeIndex::NONE,
    })
}

pub fn attribute(value: Expr, attr: &str, ctx: ExprContext) -> Expr {
    Expr::Attribute(ExprAttribute {
        value: Box::new(value),
        attr: Identifier::new(attr, TextRange::default()),
        ctx,
        range: TextRange::default(),
        node_index: AtomicNodeIndex::NONE,
    })
}

/// Chain attribute accesses: `["a", "b", "c"]` becomes `a.b.c`.
pub fn dotted_name(parts: &[&str], ctx: ExprContext) -> Expr {
    debug_assert!(!parts.is_empty());
    let mut expr = name(parts[0], if parts.len() == 1 { ctx } else { ExprContext::Load });
    for (index, part) in parts.iter().enumerate().skip(1) {
        let part_ctx = if index == parts.len() - 1 {
            ctx
        } else {
            ExprContext::Load
        };
        expr = attribute(expr, part, part_ctx);
    }
    expr
}

pub fn string_literal(value: &str) -> Expr {
    Expr::StringLiteral(ExprStringLiteral {
        value: StringLiteralValue::single(StringLiteral {
            value: value.into(),
            flags: StringLiteralFlags::empty(),
            range: TextRange::default(),
            node_index: AtomicNodeIndex::NONE,
        }),
        range: TextRange::default(),
        node_index: AtomicNodeIndex::NONE,
    })
}

pub fn call(func: Expr, args: Vec<Expr>, keywords: Vec<Keyword>) -> Expr {
    Expr::Call(ExprCall {
        func: Box::new(func),
        arguments: Arguments {
            args: args.into_boxed_slice(),
            keywords: keywords.into_boxed_slice(),
            range: TextRange::default(),
            node_index: AtomicNodeIndex::NONE,
        },
        range: TextRange::default(),
        node_index: AtomicNodeIndex::NONE,
    })
}

pub fn subscript(value: Expr, slice: Expr, ctx: ExprContext) -> Expr {
    Expr::Subscript(ExprSubscript {
        value: Box::new(value),
        slice: Box::new(slice),
        ctx,
        range: TextRange::default(),
        node_index: AtomicNodeIndex::NONE,
    })
}

pub fn list(elts: Vec<Expr>, ctx: ExprContext) -> Expr {
    Expr::List(ExprList {
        elts,
        ctx,
        range: TextRange::default(),
        node_index: AtomicNodeIndex::NONE,
    })
}

/// `{key: value, ...}` with every key a string literal.
pub fn string_dict(items: Vec<(String, Expr)>) -> Expr {
    Expr::Dict(ExprDict {
        items: items
            .into_iter()
            .map(|(key, value)| DictItem {
                key: Some(string_literal(&key)),
                value,
            })
            .collect(),
        range: TextRange::default(),
        node_index: AtomicNodeIndex::NONE,
    })
}

/// `left in right`
pub fn contains(left: Expr, right: Expr) -> Expr {
    Expr::Compare(ExprCompare {
        left: Box::new(left),
        ops: vec![CmpOp::In].into_boxed_slice(),
        comparators: vec![right].into_boxed_slice(),
        range: TextRange::default(),
        node_index: AtomicNodeIndex::NONE,
    })
}

pub fn assign(targets: Vec<Expr>, value: Expr) -> Stmt {
    Stmt::Assign(StmtAssign {
        targets,
        value: Box::new(value),
        range: TextRange::default(),
        node_index: AtomicNodeIndex::NONE,
    })
}

pub fn simple_assign(target: &str, value: Expr) -> Stmt {
    assign(vec![name(target, ExprContext::Store)], value)
}

/// `base.attr = value`
pub fn attr_assign(base: Expr, attr: &str, value: Expr) -> Stmt {
    assign(vec![attribute(base, attr, ExprContext::Store)], value)
}

pub fn expr_stmt(value: Expr) -> Stmt {
    Stmt::Expr(StmtExpr {
        value: Box::new(value),
        range: TextRange::default(),
        node_index: AtomicNodeIndex::NONE,
    })
}

pub fn alias(name: &str, asname: Option<&str>) -> Alias {
    Alias {
        name: Identifier::new(name, TextRange::default()),
        asname: asname.map(|a| Identifier::new(a, TextRange::default())),
        range: TextRange::default(),
        node_index: AtomicNodeIndex::NONE,
    }
}

pub fn import(names: Vec<Alias>) -> Stmt {
    Stmt::Import(StmtImport {
        names,
        range: TextRange::default(),
        node_index: AtomicNodeIndex::NONE,
    })
}

pub fn import_from(module: Option<&str>, names: Vec<Alias>, level: u32) -> Stmt {
    Stmt::ImportFrom(StmtImportFrom {
        module: module.map(|m| Identifier::new(m, TextRange::default())),
        names,
        level,
        range: TextRange::default(),
        node_index: AtomicNodeIndex::NONE,
    })
}

pub fn return_stmt(value: Option<Expr>) -> Stmt {
    Stmt::Return(StmtReturn {
        value: value.map(Box::new),
        range: TextRange::default(),
        node_index: AtomicNodeIndex::NONE,
    })
}

pub fn if_stmt(test: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::If(StmtIf {
        test: Box::new(test),
        body,
        elif_else_clauses: Vec::new(),
        range: TextRange::default(),
        node_index: AtomicNodeIndex::NONE,
    })
}

/// A no-argument function definition.
pub fn function_def(name: &str, body: Vec<Stmt>) -> Stmt {
    Stmt::FunctionDef(StmtFunctionDef {
        name: Identifier::new(name, TextRange::default()),
        type_params: None,
        parameters: Box::new(Parameters {
            posonlyargs: Vec::new(),
            args: Vec::new(),
            vararg: None,
            kwonlyargs: Vec::new(),
            kwarg: None,
            range: TextRange::default(),
            node_index: AtomicNodeIndex::NONE,
        }),
        returns: None,
        body,
        decorator_list: Vec::new(),
        is_async: false,
        range: TextRange::default(),
        node_index: AtomicNodeIndex::NONE,
    })
}

/// `types.SimpleNamespace`
pub fn simple_namespace_ctor() -> Expr {
    dotted_name(&["types", "SimpleNamespace"], ExprContext::Load)
}

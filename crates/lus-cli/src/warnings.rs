// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Static warnings for `-W` / `-Wpedantic`.
//!
//! `-W` flags writes to undeclared globals; `-Wpedantic` also flags
//! reads of names that are neither declared, assigned anywhere in
//! the chunk, nor part of the standard globals.

use std::collections::HashSet;

use lus_ast::expr::{Expr, ExprKind, TableItem};
use lus_ast::stmt::{Block, Stmt, StmtKind};
use lus_ast::Chunk;

const STANDARD_GLOBALS: &[&str] = &[
    "print", "type", "tostring", "tonumber", "error", "assert", "pledge", "os", "fs", "worker",
    "arg",
];

/// Collect warnings for a chunk. Scoping is approximated: any
/// `local` anywhere in the chunk counts as declared.
pub fn check(chunk: &Chunk, pedantic: bool) -> Vec<String> {
    let mut declared: HashSet<String> = STANDARD_GLOBALS.iter().map(|s| s.to_string()).collect();
    let mut assigned: HashSet<String> = HashSet::new();
    collect_block(&chunk.body, &mut declared, &mut assigned);

    let mut warnings = Vec::new();
    warn_block(&chunk.body, &declared, &assigned, pedantic, &mut warnings);
    warnings
}

fn collect_block(block: &Block, declared: &mut HashSet<String>, assigned: &mut HashSet<String>) {
    for stmt in block {
        match &stmt.kind {
            StmtKind::Local { names, exprs } => {
                declared.extend(names.iter().cloned());
                for expr in exprs {
                    collect_expr(expr, declared, assigned);
                }
            }
            StmtKind::LocalFunction { name, params, body } => {
                declared.insert(name.clone());
                declared.extend(params.iter().cloned());
                collect_block(body, declared, assigned);
            }
            StmtKind::Function { path, params, body } => {
                if path.len() == 1 {
                    assigned.insert(path[0].clone());
                }
                declared.extend(params.iter().cloned());
                collect_block(body, declared, assigned);
            }
            StmtKind::Assign { targets, exprs } => {
                for target in targets {
                    if let ExprKind::Ident(name) = &target.kind {
                        assigned.insert(name.clone());
                    }
                }
                for expr in exprs {
                    collect_expr(expr, declared, assigned);
                }
            }
            StmtKind::NumericFor { var, body, .. } => {
                declared.insert(var.clone());
                collect_block(body, declared, assigned);
            }
            StmtKind::If { arms, else_body } => {
                for (_, body) in arms {
                    collect_block(body, declared, assigned);
                }
                if let Some(body) = else_body {
                    collect_block(body, declared, assigned);
                }
            }
            StmtKind::While { body, .. }
            | StmtKind::Repeat { body, .. }
            | StmtKind::Do(body) => collect_block(body, declared, assigned),
            StmtKind::Call(expr) => collect_expr(expr, declared, assigned),
            StmtKind::Return(exprs) => {
                for expr in exprs {
                    collect_expr(expr, declared, assigned);
                }
            }
            StmtKind::Break => {}
        }
    }
}

fn collect_expr(expr: &Expr, declared: &mut HashSet<String>, assigned: &mut HashSet<String>) {
    match &expr.kind {
        ExprKind::Function { params, body } => {
            declared.extend(params.iter().cloned());
            collect_block(body, declared, assigned);
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_expr(lhs, declared, assigned);
            collect_expr(rhs, declared, assigned);
        }
        ExprKind::Unary { operand, .. } => collect_expr(operand, declared, assigned),
        ExprKind::Index { object, index } => {
            collect_expr(object, declared, assigned);
            collect_expr(index, declared, assigned);
        }
        ExprKind::Call { func, args } => {
            collect_expr(func, declared, assigned);
            for arg in args {
                collect_expr(arg, declared, assigned);
            }
        }
        ExprKind::Method { object, args, .. } => {
            collect_expr(object, declared, assigned);
            for arg in args {
                collect_expr(arg, declared, assigned);
            }
        }
        ExprKind::Table { items } => {
            for item in items {
                match item {
                    TableItem::Positional(e) | TableItem::Named(_, e) => {
                        collect_expr(e, declared, assigned)
                    }
                    TableItem::Keyed(k, v) => {
                        collect_expr(k, declared, assigned);
                        collect_expr(v, declared, assigned);
                    }
                }
            }
        }
        _ => {}
    }
}

fn warn_block(
    block: &Block,
    declared: &HashSet<String>,
    assigned: &HashSet<String>,
    pedantic: bool,
    out: &mut Vec<String>,
) {
    for stmt in block {
        match &stmt.kind {
            StmtKind::Assign { targets, exprs } => {
                for target in targets {
                    if let ExprKind::Ident(name) = &target.kind {
                        if !declared.contains(name) {
                            out.push(format!("assignment to undeclared global '{name}'"));
                        }
                    }
                }
                for expr in exprs {
                    warn_expr(expr, declared, assigned, pedantic, out);
                }
            }
            StmtKind::Local { exprs, .. } | StmtKind::Return(exprs) => {
                for expr in exprs {
                    warn_expr(expr, declared, assigned, pedantic, out);
                }
            }
            StmtKind::Call(expr) => warn_expr(expr, declared, assigned, pedantic, out),
            StmtKind::Function { body, .. }
            | StmtKind::LocalFunction { body, .. }
            | StmtKind::While { body, .. }
            | StmtKind::Repeat { body, .. }
            | StmtKind::NumericFor { body, .. }
            | StmtKind::Do(body) => warn_block(body, declared, assigned, pedantic, out),
            StmtKind::If { arms, else_body } => {
                for (cond, body) in arms {
                    warn_expr(cond, declared, assigned, pedantic, out);
                    warn_block(body, declared, assigned, pedantic, out);
                }
                if let Some(body) = else_body {
                    warn_block(body, declared, assigned, pedantic, out);
                }
            }
            StmtKind::Break => {}
        }
    }
}

fn warn_expr(
    expr: &Expr,
    declared: &HashSet<String>,
    assigned: &HashSet<String>,
    pedantic: bool,
    out: &mut Vec<String>,
) {
    match &expr.kind {
        ExprKind::Ident(name) => {
            if pedantic && !declared.contains(name) && !assigned.contains(name) {
                out.push(format!("read of undefined global '{name}'"));
            }
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            warn_expr(lhs, declared, assigned, pedantic, out);
            warn_expr(rhs, declared, assigned, pedantic, out);
        }
        ExprKind::Unary { operand, .. } => warn_expr(operand, declared, assigned, pedantic, out),
        ExprKind::Index { object, index } => {
            warn_expr(object, declared, assigned, pedantic, out);
            warn_expr(index, declared, assigned, pedantic, out);
        }
        ExprKind::Call { func, args } => {
            warn_expr(func, declared, assigned, pedantic, out);
            for arg in args {
                warn_expr(arg, declared, assigned, pedantic, out);
            }
        }
        ExprKind::Method { object, args, .. } => {
            warn_expr(object, declared, assigned, pedantic, out);
            for arg in args {
                warn_expr(arg, declared, assigned, pedantic, out);
            }
        }
        ExprKind::Function { body, .. } => warn_block(body, declared, assigned, pedantic, out),
        ExprKind::Table { items } => {
            for item in items {
                match item {
                    TableItem::Positional(e) | TableItem::Named(_, e) => {
                        warn_expr(e, declared, assigned, pedantic, out)
                    }
                    TableItem::Keyed(k, v) => {
                        warn_expr(k, declared, assigned, pedantic, out);
                        warn_expr(v, declared, assigned, pedantic, out);
                    }
                }
            }
        }
        _ => {}
    }
}

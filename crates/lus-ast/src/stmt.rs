// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Statement AST nodes.

use crate::expr::Expr;
use crate::Span;

/// A sequence of statements.
pub type Block = Vec<Stmt>;

/// A statement in the AST.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

/// The kind of statement.
#[derive(Debug, Clone)]
pub enum StmtKind {
    /// `local a, b = e1, e2`
    Local { names: Vec<String>, exprs: Vec<Expr> },
    /// `a, t[k] = e1, e2` — targets are identifiers or index
    /// expressions
    Assign { targets: Vec<Expr>, exprs: Vec<Expr> },
    /// A call (or method call) in statement position
    Call(Expr),
    /// `function a.b.c(params) body end`
    Function {
        path: Vec<String>,
        params: Vec<String>,
        body: Block,
    },
    /// `local function name(params) body end`
    LocalFunction {
        name: String,
        params: Vec<String>,
        body: Block,
    },
    /// `if c1 then b1 elseif c2 then b2 else b3 end`
    If {
        arms: Vec<(Expr, Block)>,
        else_body: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    Repeat {
        body: Block,
        cond: Expr,
    },
    /// Numeric `for var = start, limit [, step] do body end`
    NumericFor {
        var: String,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
    },
    Return(Vec<Expr>),
    Break,
    /// `do body end`
    Do(Block),
}

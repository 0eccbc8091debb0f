// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Recursive descent parser for Lus source.

use lus_ast::expr::{BinOp, Expr, ExprKind, TableItem, UnOp};
use lus_ast::stmt::{Block, Stmt, StmtKind};
use lus_ast::token::{Token, TokenKind};
use lus_ast::{Chunk, Span};
use lus_lexer::LexError;

/// Parse errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("expected {expected}, found {found}")]
    Unexpected {
        expected: String,
        found: &'static str,
        span: Span,
    },
    #[error("cannot assign to this expression")]
    BadAssignTarget { span: Span },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::Lex(e) => e.span(),
            ParseError::Unexpected { span, .. } => *span,
            ParseError::BadAssignTarget { span } => *span,
        }
    }
}

type PResult<T> = Result<T, ParseError>;

/// Parse a full source unit.
pub fn parse(source: &str) -> PResult<Chunk> {
    let tokens = lus_lexer::tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let body = parser.block()?;
    parser.expect_kind(&TokenKind::Eof, "end of input")?;
    Ok(Chunk { body })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

// Binary operator precedence: (op, left, right). Right-associative
// operators carry right < left so recursion re-enters the same level.
fn bin_prec(kind: &TokenKind) -> Option<(BinOp, u8, u8)> {
    Some(match kind {
        TokenKind::Or => (BinOp::Or, 1, 2),
        TokenKind::And => (BinOp::And, 3, 4),
        TokenKind::EqEq => (BinOp::Eq, 5, 6),
        TokenKind::NotEq => (BinOp::Ne, 5, 6),
        TokenKind::Lt => (BinOp::Lt, 5, 6),
        TokenKind::LtEq => (BinOp::Le, 5, 6),
        TokenKind::Gt => (BinOp::Gt, 5, 6),
        TokenKind::GtEq => (BinOp::Ge, 5, 6),
        TokenKind::DotDot => (BinOp::Concat, 9, 8),
        TokenKind::Plus => (BinOp::Add, 10, 11),
        TokenKind::Minus => (BinOp::Sub, 10, 11),
        TokenKind::Star => (BinOp::Mul, 12, 13),
        TokenKind::Slash => (BinOp::Div, 12, 13),
        TokenKind::Percent => (BinOp::Mod, 12, 13),
        TokenKind::Caret => (BinOp::Pow, 16, 15),
        _ => return None,
    })
}

/// Precedence of the operand position under a unary operator; `^`
/// binds tighter, so `-x^2` parses as `-(x^2)`.
const UNARY_PREC: u8 = 14;

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let tok = self.peek();
        ParseError::Unexpected {
            expected: expected.to_string(),
            found: tok.kind.describe(),
            span: tok.span,
        }
    }

    fn expect_kind(&mut self, kind: &TokenKind, expected: &str) -> PResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_name(&mut self) -> PResult<(String, Span)> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                let tok = self.advance();
                Ok((name, tok.span))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    // === Statements ===

    /// Parse statements until a block-closing token.
    fn block(&mut self) -> PResult<Block> {
        let mut stmts = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::Eof
                | TokenKind::End
                | TokenKind::Else
                | TokenKind::Elseif
                | TokenKind::Until => return Ok(stmts),
                TokenKind::Semi => {
                    self.advance();
                }
                _ => stmts.push(self.statement()?),
            }
        }
    }

    fn statement(&mut self) -> PResult<Stmt> {
        let start = self.peek().span;
        match self.peek_kind() {
            TokenKind::Local => self.local_stmt(),
            TokenKind::Function => self.function_stmt(),
            TokenKind::If => self.if_stmt(),
            TokenKind::While => self.while_stmt(),
            TokenKind::Repeat => self.repeat_stmt(),
            TokenKind::For => self.for_stmt(),
            TokenKind::Return => {
                self.advance();
                let exprs = if self.block_ends() {
                    Vec::new()
                } else {
                    self.expr_list()?
                };
                let span = exprs.last().map(|e| start.to(e.span)).unwrap_or(start);
                Ok(Stmt {
                    kind: StmtKind::Return(exprs),
                    span,
                })
            }
            TokenKind::Break => {
                self.advance();
                Ok(Stmt {
                    kind: StmtKind::Break,
                    span: start,
                })
            }
            TokenKind::Do => {
                self.advance();
                let body = self.block()?;
                let end = self.expect_kind(&TokenKind::End, "'end'")?;
                Ok(Stmt {
                    kind: StmtKind::Do(body),
                    span: start.to(end.span),
                })
            }
            _ => self.expr_stmt(),
        }
    }

    fn block_ends(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Eof
                | TokenKind::End
                | TokenKind::Else
                | TokenKind::Elseif
                | TokenKind::Until
                | TokenKind::Semi
        )
    }

    fn local_stmt(&mut self) -> PResult<Stmt> {
        let start = self.advance().span; // 'local'
        if self.eat(&TokenKind::Function) {
            let (name, _) = self.expect_name()?;
            let (params, body, end) = self.function_body()?;
            return Ok(Stmt {
                kind: StmtKind::LocalFunction { name, params, body },
                span: start.to(end),
            });
        }
        let mut names = vec![self.expect_name()?.0];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_name()?.0);
        }
        let exprs = if self.eat(&TokenKind::Eq) {
            self.expr_list()?
        } else {
            Vec::new()
        };
        let span = exprs.last().map(|e| start.to(e.span)).unwrap_or(start);
        Ok(Stmt {
            kind: StmtKind::Local { names, exprs },
            span,
        })
    }

    fn function_stmt(&mut self) -> PResult<Stmt> {
        let start = self.advance().span; // 'function'
        let mut path = vec![self.expect_name()?.0];
        while self.eat(&TokenKind::Dot) {
            path.push(self.expect_name()?.0);
        }
        let (params, body, end) = self.function_body()?;
        Ok(Stmt {
            kind: StmtKind::Function { path, params, body },
            span: start.to(end),
        })
    }

    /// `( params ) block end` — shared by all function forms. Returns
    /// the span of the closing `end`.
    fn function_body(&mut self) -> PResult<(Vec<String>, Block, Span)> {
        self.expect_kind(&TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            params.push(self.expect_name()?.0);
            while self.eat(&TokenKind::Comma) {
                params.push(self.expect_name()?.0);
            }
        }
        self.expect_kind(&TokenKind::RParen, "')'")?;
        let body = self.block()?;
        let end = self.expect_kind(&TokenKind::End, "'end'")?;
        Ok((params, body, end.span))
    }

    fn if_stmt(&mut self) -> PResult<Stmt> {
        let start = self.advance().span; // 'if'
        let mut arms = Vec::new();
        let cond = self.expression()?;
        self.expect_kind(&TokenKind::Then, "'then'")?;
        arms.push((cond, self.block()?));
        let mut else_body = None;
        loop {
            if self.eat(&TokenKind::Elseif) {
                let cond = self.expression()?;
                self.expect_kind(&TokenKind::Then, "'then'")?;
                arms.push((cond, self.block()?));
            } else if self.eat(&TokenKind::Else) {
                else_body = Some(self.block()?);
                break;
            } else {
                break;
            }
        }
        let end = self.expect_kind(&TokenKind::End, "'end'")?;
        Ok(Stmt {
            kind: StmtKind::If { arms, else_body },
            span: start.to(end.span),
        })
    }

    fn while_stmt(&mut self) -> PResult<Stmt> {
        let start = self.advance().span; // 'while'
        let cond = self.expression()?;
        self.expect_kind(&TokenKind::Do, "'do'")?;
        let body = self.block()?;
        let end = self.expect_kind(&TokenKind::End, "'end'")?;
        Ok(Stmt {
            kind: StmtKind::While { cond, body },
            span: start.to(end.span),
        })
    }

    fn repeat_stmt(&mut self) -> PResult<Stmt> {
        let start = self.advance().span; // 'repeat'
        let body = self.block()?;
        self.expect_kind(&TokenKind::Until, "'until'")?;
        let cond = self.expression()?;
        let span = start.to(cond.span);
        Ok(Stmt {
            kind: StmtKind::Repeat { body, cond },
            span,
        })
    }

    fn for_stmt(&mut self) -> PResult<Stmt> {
        let start = self.advance().span; // 'for'
        let (var, _) = self.expect_name()?;
        self.expect_kind(&TokenKind::Eq, "'='")?;
        let init = self.expression()?;
        self.expect_kind(&TokenKind::Comma, "','")?;
        let limit = self.expression()?;
        let step = if self.eat(&TokenKind::Comma) {
            Some(self.expression()?)
        } else {
            None
        };
        self.expect_kind(&TokenKind::Do, "'do'")?;
        let body = self.block()?;
        let end = self.expect_kind(&TokenKind::End, "'end'")?;
        Ok(Stmt {
            kind: StmtKind::NumericFor {
                var,
                start: init,
                limit,
                step,
                body,
            },
            span: start.to(end.span),
        })
    }

    /// Call statement or (multi-)assignment.
    fn expr_stmt(&mut self) -> PResult<Stmt> {
        let first = self.suffixed_expr()?;
        let start = first.span;

        if self.check(&TokenKind::Comma) || self.check(&TokenKind::Eq) {
            let mut targets = vec![first];
            while self.eat(&TokenKind::Comma) {
                targets.push(self.suffixed_expr()?);
            }
            for target in &targets {
                if !matches!(target.kind, ExprKind::Ident(_) | ExprKind::Index { .. }) {
                    return Err(ParseError::BadAssignTarget { span: target.span });
                }
            }
            self.expect_kind(&TokenKind::Eq, "'='")?;
            let exprs = self.expr_list()?;
            let span = start.to(exprs.last().map(|e| e.span).unwrap_or(start));
            return Ok(Stmt {
                kind: StmtKind::Assign { targets, exprs },
                span,
            });
        }

        if !matches!(first.kind, ExprKind::Call { .. } | ExprKind::Method { .. }) {
            return Err(self.unexpected("statement"));
        }
        Ok(Stmt {
            kind: StmtKind::Call(first),
            span: start,
        })
    }

    // === Expressions ===

    fn expr_list(&mut self) -> PResult<Vec<Expr>> {
        let mut exprs = vec![self.expression()?];
        while self.eat(&TokenKind::Comma) {
            exprs.push(self.expression()?);
        }
        Ok(exprs)
    }

    fn expression(&mut self) -> PResult<Expr> {
        self.binary_expr(0)
    }

    fn binary_expr(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut lhs = self.unary_expr()?;
        while let Some((op, lprec, rprec)) = bin_prec(self.peek_kind()) {
            if lprec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.binary_expr(rprec)?;
            let span = lhs.span.to(rhs.span);
            lhs = Expr {
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            };
        }
        Ok(lhs)
    }

    fn unary_expr(&mut self) -> PResult<Expr> {
        let op = match self.peek_kind() {
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Not => Some(UnOp::Not),
            TokenKind::Hash => Some(UnOp::Len),
            _ => None,
        };
        if let Some(op) = op {
            let start = self.advance().span;
            let operand = self.binary_expr(UNARY_PREC)?;
            let span = start.to(operand.span);
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span,
            });
        }
        self.simple_expr()
    }

    fn simple_expr(&mut self) -> PResult<Expr> {
        let tok = self.peek().clone();
        let kind = match tok.kind {
            TokenKind::Nil => ExprKind::Nil,
            TokenKind::True => ExprKind::True,
            TokenKind::False => ExprKind::False,
            TokenKind::Int(v) => ExprKind::Int(v),
            TokenKind::Float(v) => ExprKind::Float(v),
            TokenKind::Str(ref s) => ExprKind::Str(s.clone()),
            TokenKind::Function => {
                self.advance();
                let (params, body, end) = self.function_body()?;
                return Ok(Expr {
                    kind: ExprKind::Function { params, body },
                    span: tok.span.to(end),
                });
            }
            TokenKind::LBrace => return self.table_expr(),
            _ => return self.suffixed_expr(),
        };
        self.advance();
        Ok(Expr {
            kind,
            span: tok.span,
        })
    }

    /// A primary expression followed by any number of suffixes:
    /// `.name`, `[expr]`, `:name(args)`, `(args)`.
    fn suffixed_expr(&mut self) -> PResult<Expr> {
        let mut expr = self.primary_expr()?;
        loop {
            match self.peek_kind() {
                TokenKind::Dot => {
                    self.advance();
                    let (name, span) = self.expect_name()?;
                    let full = expr.span.to(span);
                    expr = Expr {
                        kind: ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(Expr {
                                kind: ExprKind::Str(name),
                                span,
                            }),
                        },
                        span: full,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.expression()?;
                    let close = self.expect_kind(&TokenKind::RBracket, "']'")?;
                    let full = expr.span.to(close.span);
                    expr = Expr {
                        kind: ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        span: full,
                    };
                }
                TokenKind::Colon => {
                    self.advance();
                    let (name, _) = self.expect_name()?;
                    let (args, end) = self.call_args()?;
                    let full = expr.span.to(end);
                    expr = Expr {
                        kind: ExprKind::Method {
                            object: Box::new(expr),
                            name,
                            args,
                        },
                        span: full,
                    };
                }
                TokenKind::LParen => {
                    let (args, end) = self.call_args()?;
                    let full = expr.span.to(end);
                    expr = Expr {
                        kind: ExprKind::Call {
                            func: Box::new(expr),
                            args,
                        },
                        span: full,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary_expr(&mut self) -> PResult<Expr> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                let tok = self.advance();
                Ok(Expr {
                    kind: ExprKind::Ident(name),
                    span: tok.span,
                })
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect_kind(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn call_args(&mut self) -> PResult<(Vec<Expr>, Span)> {
        self.expect_kind(&TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            args = self.expr_list()?;
        }
        let close = self.expect_kind(&TokenKind::RParen, "')'")?;
        Ok((args, close.span))
    }

    fn table_expr(&mut self) -> PResult<Expr> {
        let start = self.advance().span; // '{'
        let mut items = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            match self.peek_kind().clone() {
                TokenKind::LBracket => {
                    self.advance();
                    let key = self.expression()?;
                    self.expect_kind(&TokenKind::RBracket, "']'")?;
                    self.expect_kind(&TokenKind::Eq, "'='")?;
                    let value = self.expression()?;
                    items.push(TableItem::Keyed(key, value));
                }
                TokenKind::Ident(name)
                    if self.tokens[self.pos + 1].kind == TokenKind::Eq =>
                {
                    self.advance();
                    self.advance(); // '='
                    let value = self.expression()?;
                    items.push(TableItem::Named(name, value));
                }
                _ => items.push(TableItem::Positional(self.expression()?)),
            }
            if !self.eat(&TokenKind::Comma) && !self.eat(&TokenKind::Semi) {
                break;
            }
        }
        let close = self.expect_kind(&TokenKind::RBrace, "'}'")?;
        Ok(Expr {
            kind: ExprKind::Table { items },
            span: start.to(close.span),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Chunk {
        parse(src).unwrap_or_else(|e| panic!("parse failed for {src:?}: {e}"))
    }

    #[test]
    fn local_and_assignment() {
        let chunk = parse_ok("local a, b = 1, 2\na = b");
        assert_eq!(chunk.body.len(), 2);
        assert!(matches!(chunk.body[0].kind, StmtKind::Local { .. }));
        assert!(matches!(chunk.body[1].kind, StmtKind::Assign { .. }));
    }

    #[test]
    fn precedence_and_associativity() {
        let chunk = parse_ok("return 1 + 2 * 3");
        let StmtKind::Return(exprs) = &chunk.body[0].kind else {
            panic!("expected return");
        };
        let ExprKind::Binary { op, rhs, .. } = &exprs[0].kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(
            rhs.kind,
            ExprKind::Binary { op: BinOp::Mul, .. }
        ));
    }

    #[test]
    fn concat_is_right_associative() {
        let chunk = parse_ok("return a .. b .. c");
        let StmtKind::Return(exprs) = &chunk.body[0].kind else {
            panic!("expected return");
        };
        let ExprKind::Binary { op, rhs, .. } = &exprs[0].kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinOp::Concat);
        assert!(matches!(
            rhs.kind,
            ExprKind::Binary {
                op: BinOp::Concat,
                ..
            }
        ));
    }

    #[test]
    fn unary_binds_below_pow() {
        let chunk = parse_ok("return -x ^ 2");
        let StmtKind::Return(exprs) = &chunk.body[0].kind else {
            panic!("expected return");
        };
        assert!(matches!(
            exprs[0].kind,
            ExprKind::Unary { op: UnOp::Neg, .. }
        ));
    }

    #[test]
    fn control_flow() {
        parse_ok("if x then y() elseif z then w() else v() end");
        parse_ok("while true do f() end");
        parse_ok("repeat f() until done");
        parse_ok("for i = 1, 10, 2 do f(i) end");
    }

    #[test]
    fn functions_and_calls() {
        parse_ok("function m.helper(a, b) return a + b end");
        parse_ok("local function f() end");
        parse_ok("local g = function(x) return x end");
        parse_ok("obj:method(1, 2)");
    }

    #[test]
    fn table_constructors() {
        parse_ok("local t = { 1, 2, x = 3, [\"k\"] = 4, }");
    }

    #[test]
    fn dotted_access_desugars_to_index() {
        let chunk = parse_ok("return a.b");
        let StmtKind::Return(exprs) = &chunk.body[0].kind else {
            panic!("expected return");
        };
        let ExprKind::Index { index, .. } = &exprs[0].kind else {
            panic!("expected index");
        };
        assert!(matches!(index.kind, ExprKind::Str(ref s) if s == "b"));
    }

    #[test]
    fn rejects_bad_assignment_target() {
        assert!(matches!(
            parse("f() = 3"),
            Err(ParseError::BadAssignTarget { .. })
        ));
    }

    #[test]
    fn rejects_stray_expression_statement() {
        assert!(parse("1 + 2").is_err());
    }
}

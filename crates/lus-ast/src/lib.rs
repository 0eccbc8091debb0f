// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! AST for the Lus language.
//!
//! The runtime drives scripts through this tree: the CLI, the worker
//! pool and `-e` chunks all parse to it. Nodes carry byte spans back
//! into the source for error reporting.

pub mod expr;
pub mod span;
pub mod stmt;
pub mod token;

pub use span::{LineMap, Span};

/// A parsed source unit: the top-level statement list.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub body: Vec<stmt::Stmt>,
}

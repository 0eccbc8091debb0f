// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The Lus lexer.

mod lexer;

pub use lexer::{tokenize, LexError};

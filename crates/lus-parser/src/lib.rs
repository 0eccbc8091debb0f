// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The Lus parser.

mod parser;

pub use parser::{parse, ParseError};

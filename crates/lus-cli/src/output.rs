// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Terminal output helpers.

use colored::Colorize;

/// Colors off when stdout is not a terminal.
pub fn init() {
    if std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }
}

pub fn error_label() -> String {
    "error".red().bold().to_string()
}

pub fn warn_label() -> String {
    "warning".yellow().bold().to_string()
}

pub fn command(s: &str) -> String {
    s.cyan().to_string()
}

pub fn arg(s: &str) -> String {
    s.green().to_string()
}

/// Report a failure against its source location when a span is
/// available.
pub fn report_error(file: &str, source: Option<&str>, message: &str, offset: Option<usize>) {
    match (source, offset) {
        (Some(source), Some(offset)) => {
            let lm = lus_ast::LineMap::new(source);
            let (line, col) = lm.line_col(offset.min(source.len()));
            eprintln!("{}: {file}:{line}:{col}: {message}", error_label());
        }
        _ => eprintln!("{}: {file}: {message}", error_label()),
    }
}

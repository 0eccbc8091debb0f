// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Interactive mode.

use std::io::{BufRead, Write};

use lus_interp::{Interpreter, Value};

use crate::output;

/// Read-eval-print until EOF. A line is first tried as an
/// expression (`return <line>`), then as a statement list.
pub fn run(interp: &mut Interpreter) {
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        let Some(Ok(line)) = lines.next() else {
            println!();
            return;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let as_expr = format!("return {line}");
        let chunk = match lus_parser::parse(&as_expr) {
            Ok(chunk) => Ok(chunk),
            Err(_) => lus_parser::parse(line),
        };
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                eprintln!("{}: {e}", output::error_label());
                continue;
            }
        };

        match interp.run(&chunk) {
            Ok(values) => {
                if !values.is_empty() {
                    let rendered = values
                        .iter()
                        .map(Value::display)
                        .collect::<Vec<_>>()
                        .join("\t");
                    println!("{rendered}");
                }
            }
            Err(e) => eprintln!("{}: {e}", output::error_label()),
        }
    }
}

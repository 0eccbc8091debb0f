// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The worker-pool script engine.
//!
//! Each worker body builds a fresh interpreter state on the pool
//! thread: stdlib installed, the parent's pledge store adopted, the
//! worker-side bindings added, initial arguments bound as the `arg`
//! table, then the script runs to completion. Errors become the
//! worker's error status.

use lus_worker::{WorkerContext, WorkerEngine};

use crate::builtins;
use crate::interp::Interpreter;
use crate::value::{Table, TableKey, Value};

pub struct InterpEngine;

impl WorkerEngine for InterpEngine {
    fn run(&self, ctx: &WorkerContext) -> Result<(), String> {
        let path = ctx.script_path().to_string();
        let source = std::fs::read_to_string(&path)
            .map_err(|e| format!("cannot open {path}: {e}"))?;

        let mut interp = Interpreter::new();
        interp.pledges = ctx.pledges();
        interp.current_worker = Some(ctx.worker().clone());
        builtins::install_worker_side(&mut interp);

        let mut arg_table = Table::new();
        for (i, message) in ctx.take_args().iter().enumerate() {
            let value = builtins::decode_message(message).map_err(|e| e.to_string())?;
            arg_table.set(TableKey::Int(i as i64 + 1), value);
        }
        interp.define_global("arg", Value::table(arg_table));

        interp
            .run_source(&source, &path)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Register the engine with the worker pool. Idempotent; called
/// before any worker is created.
pub fn ensure_engine() {
    lus_worker::register_engine(Box::new(InterpEngine));
}

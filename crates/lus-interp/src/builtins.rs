// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Built-in functions.
//!
//! The minimal stdlib the runtime's consumers need: core globals,
//! `os`, pledge-checked `fs`, and the `worker` table. The worker-side
//! bindings (`message`, `peek`) are installed only inside worker
//! states.

use lus_worker::{Message, WireValue, WorkerHandle};

use crate::interp::{Interpreter, RuntimeError};
use crate::value::{BuiltinKind, Table, TableKey, Value};

/// Serialization nesting bound, shared with the wire format.
const MAX_SERIALIZE_DEPTH: usize = lus_worker::wire::MAX_DEPTH;

/// Install the default globals into a state.
pub fn install(interp: &mut Interpreter) {
    interp.define_global("print", Value::Builtin(BuiltinKind::Print));
    interp.define_global("type", Value::Builtin(BuiltinKind::Type));
    interp.define_global("tostring", Value::Builtin(BuiltinKind::Tostring));
    interp.define_global("tonumber", Value::Builtin(BuiltinKind::Tonumber));
    interp.define_global("error", Value::Builtin(BuiltinKind::Error));
    interp.define_global("assert", Value::Builtin(BuiltinKind::Assert));
    interp.define_global("pledge", Value::Builtin(BuiltinKind::Pledge));

    let mut os = Table::new();
    os.set(
        TableKey::Str("sleep".into()),
        Value::Builtin(BuiltinKind::OsSleep),
    );
    os.set(
        TableKey::Str("clock".into()),
        Value::Builtin(BuiltinKind::OsClock),
    );
    os.set(
        TableKey::Str("getenv".into()),
        Value::Builtin(BuiltinKind::OsGetenv),
    );
    interp.define_global("os", Value::table(os));

    let mut fs = Table::new();
    fs.set(
        TableKey::Str("read".into()),
        Value::Builtin(BuiltinKind::FsRead),
    );
    fs.set(
        TableKey::Str("write".into()),
        Value::Builtin(BuiltinKind::FsWrite),
    );
    interp.define_global("fs", Value::table(fs));

    let mut worker = Table::new();
    worker.set(
        TableKey::Str("create".into()),
        Value::Builtin(BuiltinKind::WorkerCreate),
    );
    worker.set(
        TableKey::Str("send".into()),
        Value::Builtin(BuiltinKind::WorkerSend),
    );
    worker.set(
        TableKey::Str("receive".into()),
        Value::Builtin(BuiltinKind::WorkerReceive),
    );
    worker.set(
        TableKey::Str("status".into()),
        Value::Builtin(BuiltinKind::WorkerStatus),
    );
    interp.define_global("worker", Value::table(worker));
}

/// Add the worker-side bindings. Called by the worker engine on the
/// fresh state, never on the main state.
pub fn install_worker_side(interp: &mut Interpreter) {
    if let Value::Table(worker) = interp.global("worker") {
        let mut worker = worker.borrow_mut();
        worker.set(
            TableKey::Str("message".into()),
            Value::Builtin(BuiltinKind::WorkerMessage),
        );
        worker.set(
            TableKey::Str("peek".into()),
            Value::Builtin(BuiltinKind::WorkerPeek),
        );
    }
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Nil)
}

fn check_str(args: &[Value], i: usize, name: &str) -> Result<String, RuntimeError> {
    match arg(args, i) {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(RuntimeError::msg(format!(
            "bad argument #{} to '{}' (string expected, got {})",
            i + 1,
            name,
            other.type_name()
        ))),
    }
}

fn check_worker(args: &[Value], i: usize, name: &str) -> Result<WorkerHandle, RuntimeError> {
    match arg(args, i) {
        Value::Worker(w) => Ok(w),
        other => Err(RuntimeError::msg(format!(
            "bad argument #{} to '{}' (worker expected, got {})",
            i + 1,
            name,
            other.type_name()
        ))),
    }
}

/// Dispatch one builtin call.
pub fn call(
    interp: &mut Interpreter,
    kind: BuiltinKind,
    args: Vec<Value>,
) -> Result<Vec<Value>, RuntimeError> {
    match kind {
        BuiltinKind::Print => {
            let line = args
                .iter()
                .map(Value::display)
                .collect::<Vec<_>>()
                .join("\t");
            interp.write_output(&line);
            interp.write_output_ln();
            Ok(Vec::new())
        }
        BuiltinKind::Type => Ok(vec![Value::str(arg(&args, 0).type_name())]),
        BuiltinKind::Tostring => Ok(vec![Value::str(arg(&args, 0).display())]),
        BuiltinKind::Tonumber => Ok(vec![match arg(&args, 0) {
            v @ (Value::Int(_) | Value::Float(_)) => v,
            Value::Str(s) => {
                let s = s.trim();
                if let Ok(i) = s.parse::<i64>() {
                    Value::Int(i)
                } else if let Ok(f) = s.parse::<f64>() {
                    Value::Float(f)
                } else {
                    Value::Nil
                }
            }
            _ => Value::Nil,
        }]),
        BuiltinKind::Error => Err(RuntimeError::msg(arg(&args, 0).display())),
        BuiltinKind::Assert => {
            if arg(&args, 0).truthy() {
                Ok(args)
            } else {
                let message = match arg(&args, 1) {
                    Value::Nil => "assertion failed!".to_string(),
                    other => other.display(),
                };
                Err(RuntimeError::msg(message))
            }
        }
        BuiltinKind::Pledge => {
            let mut results = Vec::with_capacity(args.len());
            for (i, spec) in args.iter().enumerate() {
                let Value::Str(spec) = spec else {
                    return Err(RuntimeError::msg(format!(
                        "bad argument #{} to 'pledge' (string expected, got {})",
                        i + 1,
                        spec.type_name()
                    )));
                };
                let granted = interp.pledges.apply_spec(spec)?;
                results.push(Value::Bool(granted));
            }
            Ok(results)
        }
        BuiltinKind::OsSleep => {
            let seconds = interp.to_number(&arg(&args, 0), "'sleep'")?;
            if seconds < 0.0 {
                return Err(RuntimeError::msg("sleep duration must be non-negative"));
            }
            std::thread::sleep(std::time::Duration::from_secs_f64(seconds));
            Ok(Vec::new())
        }
        BuiltinKind::OsClock => Ok(vec![Value::Float(lus_rt::time::now())]),
        BuiltinKind::OsGetenv => {
            let name = check_str(&args, 0, "getenv")?;
            Ok(vec![match std::env::var(&name) {
                Ok(value) => Value::str(value),
                Err(_) => Value::Nil,
            }])
        }
        BuiltinKind::FsRead => {
            let path = check_str(&args, 0, "read")?;
            interp.pledges.check_fs_perm("fs:read", &path)?;
            match std::fs::read_to_string(&path) {
                Ok(content) => Ok(vec![Value::str(content)]),
                Err(e) => Err(RuntimeError::msg(format!("cannot read '{path}': {e}"))),
            }
        }
        BuiltinKind::FsWrite => {
            let path = check_str(&args, 0, "write")?;
            let content = check_str(&args, 1, "write")?;
            interp.pledges.check_fs_perm("fs:write", &path)?;
            match std::fs::write(&path, content) {
                Ok(()) => Ok(vec![Value::Bool(true)]),
                Err(e) => Err(RuntimeError::msg(format!("cannot write '{path}': {e}"))),
            }
        }
        BuiltinKind::WorkerCreate => {
            let path = check_str(&args, 0, "create")?;
            interp.pledges.check_fs_perm("fs:read", &path)?;
            let mut messages = Vec::with_capacity(args.len().saturating_sub(1));
            for value in &args[1..] {
                messages.push(encode_value(value)?);
            }
            crate::engine::ensure_engine();
            let handle = lus_worker::pool::spawn_worker(&path, &interp.pledges, messages);
            Ok(vec![Value::Worker(handle)])
        }
        BuiltinKind::WorkerSend => {
            let worker = check_worker(&args, 0, "send")?;
            let message = encode_value(&arg(&args, 1))?;
            worker.send(message);
            Ok(Vec::new())
        }
        BuiltinKind::WorkerReceive => {
            if args.is_empty() {
                return Err(RuntimeError::msg("expected at least one worker"));
            }
            let mut workers = Vec::with_capacity(args.len());
            for i in 0..args.len() {
                workers.push(check_worker(&args, i, "receive")?);
            }
            let slots = lus_worker::receive(&workers)
                .map_err(|e| RuntimeError::msg(e.to_string()))?;
            let mut results = Vec::with_capacity(slots.len());
            for slot in slots {
                results.push(match slot {
                    Some(message) => decode_message(&message)?,
                    None => Value::Nil,
                });
            }
            Ok(results)
        }
        BuiltinKind::WorkerStatus => {
            let worker = check_worker(&args, 0, "status")?;
            Ok(vec![Value::str(worker.status().as_script_str())])
        }
        BuiltinKind::WorkerMessage => {
            let Some(worker) = interp.current_worker.clone() else {
                return Err(RuntimeError::msg(
                    "worker.message called outside worker context",
                ));
            };
            let message = encode_value(&arg(&args, 0))?;
            worker.post(message);
            Ok(Vec::new())
        }
        BuiltinKind::WorkerPeek => {
            let Some(worker) = interp.current_worker.clone() else {
                return Err(RuntimeError::msg(
                    "worker.peek called outside worker context",
                ));
            };
            let message = worker.wait_message();
            Ok(vec![decode_message(&message)?])
        }
    }
}

/// Serialize a script value into a mailbox message. Fails on the
/// producer side for functions, threads and foreign handles.
pub fn encode_value(value: &Value) -> Result<Message, RuntimeError> {
    let wire = value_to_wire(value, 0)?;
    Message::encode(&wire).map_err(|e| RuntimeError::msg(e.to_string()))
}

pub fn decode_message(message: &Message) -> Result<Value, RuntimeError> {
    let wire = message
        .decode()
        .map_err(|e| RuntimeError::msg(format!("failed to deserialize message: {e}")))?;
    Ok(wire_to_value(&wire))
}

fn value_to_wire(value: &Value, depth: usize) -> Result<WireValue, RuntimeError> {
    if depth > MAX_SERIALIZE_DEPTH {
        return Err(RuntimeError::msg(
            "table nesting too deep for serialization",
        ));
    }
    match value {
        Value::Nil => Ok(WireValue::Nil),
        Value::Bool(b) => Ok(WireValue::Bool(*b)),
        Value::Int(i) => Ok(WireValue::Int(*i)),
        Value::Float(f) => Ok(WireValue::Float(*f)),
        Value::Str(s) => Ok(WireValue::Str(s.to_string())),
        Value::Table(t) => {
            let table = t.borrow();
            let mut pairs = Vec::with_capacity(table.iter().count());
            for (key, value) in table.iter() {
                let key = match key {
                    TableKey::Int(i) => WireValue::Int(*i),
                    TableKey::Str(s) => WireValue::Str(s.clone()),
                    TableKey::Bool(b) => WireValue::Bool(*b),
                    TableKey::Float(bits) => WireValue::Float(f64::from_bits(*bits)),
                };
                pairs.push((key, value_to_wire(value, depth + 1)?));
            }
            Ok(WireValue::Table(pairs))
        }
        other => Err(RuntimeError::msg(format!(
            "cannot serialize {} to worker",
            other.type_name()
        ))),
    }
}

fn wire_to_value(wire: &WireValue) -> Value {
    match wire {
        WireValue::Nil => Value::Nil,
        WireValue::Bool(b) => Value::Bool(*b),
        WireValue::Int(i) => Value::Int(*i),
        WireValue::Float(f) => Value::Float(*f),
        WireValue::Str(s) => Value::str(s),
        WireValue::Table(pairs) => {
            let mut table = Table::new();
            for (key, value) in pairs {
                let key = match key {
                    WireValue::Int(i) => TableKey::Int(*i),
                    WireValue::Str(s) => TableKey::Str(s.clone()),
                    WireValue::Bool(b) => TableKey::Bool(*b),
                    WireValue::Float(f) => match TableKey::from_value(&Value::Float(*f)) {
                        Ok(key) => key,
                        Err(_) => continue,
                    },
                    // Nil and table keys do not occur on the wire.
                    _ => continue,
                };
                table.set(key, wire_to_value(value));
            }
            Value::table(table)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::Interpreter;

    fn run_capture(source: &str) -> String {
        let (mut interp, out) = Interpreter::with_captured_output();
        interp.run_source(source, "test").unwrap();
        let s = out.borrow().clone();
        s
    }

    #[test]
    fn core_builtins() {
        assert_eq!(run_capture("print(type(nil), type(1), type('s'))"), "nil\tnumber\tstring\n");
        assert_eq!(run_capture("print(tostring(1.5), tostring(true))"), "1.5\ttrue\n");
        assert_eq!(
            run_capture("print(tonumber('42'), tonumber('2.5'), tonumber('x'))"),
            "42\t2.5\tnil\n"
        );
    }

    #[test]
    fn error_and_assert() {
        let mut interp = Interpreter::new();
        let err = interp.run_source("error('boom')", "test").unwrap_err();
        assert_eq!(err.to_string(), "boom");

        let err = interp.run_source("assert(false)", "test").unwrap_err();
        assert_eq!(err.to_string(), "assertion failed!");

        let err = interp
            .run_source("assert(nil, 'custom message')", "test")
            .unwrap_err();
        assert_eq!(err.to_string(), "custom message");
    }

    #[test]
    fn pledge_from_script() {
        let out = run_capture(
            "print(pledge('fs:read=/tmp/*'))\n\
             print(pledge('seal'))\n\
             print(pledge('fs:write=/tmp/*'))",
        );
        assert_eq!(out, "true\ntrue\nfalse\n");
    }

    #[test]
    fn pledge_unknown_name_raises() {
        let mut interp = Interpreter::new();
        let err = interp
            .run_source("pledge('teleport')", "test")
            .unwrap_err();
        assert!(err.to_string().contains("unknown permission"));
    }

    #[test]
    fn fs_read_denied_without_pledge() {
        let mut interp = Interpreter::new();
        let err = interp
            .run_source("fs.read('/etc/passwd')", "test")
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("fs:read"));
        assert!(message.contains("/etc/passwd"));
    }

    #[test]
    fn fs_round_trip_with_pledges() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("lus-fs-test-{}", std::process::id()));
        let path = path.to_str().unwrap();

        let source = format!(
            "pledge('fs:read={dir}/*', 'fs:write={dir}/*')\n\
             fs.write('{path}', 'written from lus')\n\
             print(fs.read('{path}'))",
            dir = dir.display(),
        );
        assert_eq!(run_capture(&source), "written from lus\n");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn serialization_rejects_functions() {
        let err = encode_value(&Value::Builtin(crate::value::BuiltinKind::Print)).unwrap_err();
        assert!(err.to_string().contains("cannot serialize function"));
    }

    #[test]
    fn wire_round_trip_preserves_tables() {
        let (mut interp, _) = Interpreter::with_captured_output();
        interp
            .run_source("t = { 1, 2.5, name = 'x', [true] = false }", "test")
            .unwrap();
        let t = interp.global("t");
        let message = encode_value(&t).unwrap();
        let back = decode_message(&message).unwrap();

        let Value::Table(back) = back else {
            panic!("expected table");
        };
        let back = back.borrow();
        assert!(matches!(back.get(&TableKey::Int(1)), Value::Int(1)));
        assert!(matches!(back.get(&TableKey::Int(2)), Value::Float(f) if f == 2.5));
        assert!(matches!(back.get(&TableKey::Str("name".into())), Value::Str(ref s) if &**s == "x"));
        assert!(matches!(back.get(&TableKey::Bool(true)), Value::Bool(false)));
    }

    #[test]
    fn cyclic_table_serialization_fails_cleanly() {
        let (mut interp, _) = Interpreter::with_captured_output();
        interp.run_source("t = {} t.own = t", "test").unwrap();
        let t = interp.global("t");
        let err = encode_value(&t).unwrap_err();
        assert!(err.to_string().contains("too deep"));
    }
}

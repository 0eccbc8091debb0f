// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime values.

use std::rc::Rc;

use indexmap::IndexMap;
use lus_ast::stmt::Block;
use lus_worker::WorkerHandle;

use crate::env::Env;
use crate::interp::RuntimeError;

/// A Lus value.
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Table(Rc<std::cell::RefCell<Table>>),
    Function(Rc<LusFunction>),
    Builtin(BuiltinKind),
    /// A worker handle, opaque to scripts.
    Worker(WorkerHandle),
}

/// A script function with its captured environment.
pub struct LusFunction {
    pub params: Vec<String>,
    pub body: Block,
    pub captured: Env,
    pub name: Option<String>,
}

/// Built-in functions, dispatched by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    Print,
    Type,
    Tostring,
    Tonumber,
    Error,
    Assert,
    Pledge,
    OsSleep,
    OsClock,
    OsGetenv,
    FsRead,
    FsWrite,
    WorkerCreate,
    WorkerSend,
    WorkerReceive,
    WorkerStatus,
    /// Worker-side only: post to the parent.
    WorkerMessage,
    /// Worker-side only: block for the next parent message.
    WorkerPeek,
}

/// A table key. Float keys with an integral value collapse to the
/// integer key, as in Lua.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableKey {
    Int(i64),
    Str(String),
    Bool(bool),
    /// Non-integral float, stored by bits (normalized -0.0 → 0.0).
    Float(u64),
}

impl TableKey {
    pub fn from_value(value: &Value) -> Result<TableKey, RuntimeError> {
        match value {
            Value::Int(i) => Ok(TableKey::Int(*i)),
            Value::Float(f) => {
                if f.is_nan() {
                    return Err(RuntimeError::msg("table index is NaN"));
                }
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Ok(TableKey::Int(*f as i64))
                } else {
                    let normalized = if *f == 0.0 { 0.0 } else { *f };
                    Ok(TableKey::Float(normalized.to_bits()))
                }
            }
            Value::Str(s) => Ok(TableKey::Str(s.to_string())),
            Value::Bool(b) => Ok(TableKey::Bool(*b)),
            Value::Nil => Err(RuntimeError::msg("table index is nil")),
            other => Err(RuntimeError::msg(format!(
                "table index is a {} value",
                other.type_name()
            ))),
        }
    }
}

/// A Lus table: one map with insertion-ordered iteration.
#[derive(Default)]
pub struct Table {
    map: IndexMap<TableKey, Value>,
}

impl Table {
    pub fn new() -> Self {
        Table::default()
    }

    pub fn get(&self, key: &TableKey) -> Value {
        self.map.get(key).cloned().unwrap_or(Value::Nil)
    }

    pub fn set(&mut self, key: TableKey, value: Value) {
        if matches!(value, Value::Nil) {
            self.map.shift_remove(&key);
        } else {
            self.map.insert(key, value);
        }
    }

    /// The border: the count of consecutive integer keys from 1.
    pub fn len(&self) -> i64 {
        let mut n = 0i64;
        while self.map.contains_key(&TableKey::Int(n + 1)) {
            n += 1;
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TableKey, &Value)> {
        self.map.iter()
    }
}

impl Value {
    pub fn table(t: Table) -> Value {
        Value::Table(Rc::new(std::cell::RefCell::new(t)))
    }

    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) | Value::Builtin(_) => "function",
            Value::Worker(_) => "userdata",
        }
    }

    /// nil and false are falsey, everything else truthy.
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Lua `==` semantics: numbers compare across int/float, other
    /// types by value or identity.
    pub fn lus_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Worker(a), Value::Worker(b)) => std::sync::Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// The `tostring` rendering.
    pub fn display(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{f:.1}")
                } else {
                    format!("{f}")
                }
            }
            Value::Str(s) => s.to_string(),
            Value::Table(t) => format!("table: {:p}", Rc::as_ptr(t)),
            Value::Function(f) => format!("function: {:p}", Rc::as_ptr(f)),
            Value::Builtin(_) => "function: builtin".to_string(),
            Value::Worker(w) => format!("worker: {:p}", std::sync::Arc::as_ptr(w)),
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.truthy());
        assert!(!Value::Bool(false).truthy());
        assert!(Value::Bool(true).truthy());
        assert!(Value::Int(0).truthy());
        assert!(Value::str("").truthy());
    }

    #[test]
    fn numeric_equality_crosses_int_and_float() {
        assert!(Value::Int(2).lus_eq(&Value::Float(2.0)));
        assert!(!Value::Int(2).lus_eq(&Value::Float(2.5)));
        assert!(!Value::Int(2).lus_eq(&Value::str("2")));
    }

    #[test]
    fn integral_float_keys_collapse() {
        let k1 = TableKey::from_value(&Value::Float(3.0)).unwrap();
        let k2 = TableKey::from_value(&Value::Int(3)).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn table_border_length() {
        let mut t = Table::new();
        t.set(TableKey::Int(1), Value::Int(10));
        t.set(TableKey::Int(2), Value::Int(20));
        t.set(TableKey::Int(4), Value::Int(40));
        assert_eq!(t.len(), 2);
        t.set(TableKey::Int(3), Value::Int(30));
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn nil_assignment_deletes() {
        let mut t = Table::new();
        t.set(TableKey::Str("k".into()), Value::Int(1));
        t.set(TableKey::Str("k".into()), Value::Nil);
        assert!(matches!(t.get(&TableKey::Str("k".into())), Value::Nil));
        assert!(t.is_empty());
    }
}

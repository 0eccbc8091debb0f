// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The interpreter implementation.
//!
//! A tree-walk evaluator over the AST. One `Interpreter` is one
//! state: globals, pledge store, the coroutine runtime, and (inside
//! a worker) the worker binding. Multi-value semantics follow Lua:
//! a call expands in tail position of argument, return and
//! assignment lists, and truncates to one value elsewhere.

use std::cell::RefCell;
use std::rc::Rc;

use lus_ast::expr::{BinOp, Expr, ExprKind, TableItem, UnOp};
use lus_ast::stmt::{Block, Stmt, StmtKind};
use lus_ast::Chunk;
use lus_pledge::PledgeStore;
use lus_worker::WorkerHandle;

use crate::builtins;
use crate::coro::CoRuntime;
use crate::env::Env;
use crate::value::{LusFunction, Table, TableKey, Value};

/// Nested call limit; the tree walker shares the host stack.
const MAX_CALL_DEPTH: usize = 200;

/// Runtime errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Pledge(#[from] lus_pledge::PledgeError),
}

impl RuntimeError {
    pub fn msg(message: impl Into<String>) -> RuntimeError {
        RuntimeError::Message(message.into())
    }
}

/// Control flow escaping a statement.
enum Flow {
    Normal,
    Break,
    Return(Vec<Value>),
}

/// One interpreter state.
pub struct Interpreter {
    pub(crate) env: Env,
    /// This state's capability set.
    pub pledges: PledgeStore,
    pub(crate) runtime: Option<CoRuntime>,
    /// Set inside worker states; gates `worker.message` / `peek`.
    pub(crate) current_worker: Option<WorkerHandle>,
    /// Captured stdout for tests.
    output: Option<Rc<RefCell<String>>>,
    call_depth: usize,
}

impl Interpreter {
    pub fn new() -> Self {
        let mut interp = Interpreter {
            env: Env::new(),
            pledges: PledgeStore::new(),
            runtime: None,
            current_worker: None,
            output: None,
            call_depth: 0,
        };
        lus_pledge::fs::install(&mut interp.pledges);
        builtins::install(&mut interp);
        interp
    }

    /// Returns interpreter and output buffer reference.
    pub fn with_captured_output() -> (Self, Rc<RefCell<String>>) {
        let buffer = Rc::new(RefCell::new(String::new()));
        let mut interp = Interpreter::new();
        interp.output = Some(buffer.clone());
        (interp, buffer)
    }

    pub(crate) fn write_output(&self, s: &str) {
        if let Some(buffer) = &self.output {
            buffer.borrow_mut().push_str(s);
        } else {
            print!("{s}");
        }
    }

    pub(crate) fn write_output_ln(&self) {
        if let Some(buffer) = &self.output {
            buffer.borrow_mut().push('\n');
        } else {
            println!();
        }
    }

    /// The coroutine runtime, created on first use. Backend creation
    /// failure surfaces here.
    pub fn runtime(&mut self) -> Result<&mut CoRuntime, RuntimeError> {
        if self.runtime.is_none() {
            self.runtime = Some(CoRuntime::new()?);
        }
        Ok(self.runtime.as_mut().expect("runtime just created"))
    }

    pub fn define_global(&mut self, name: &str, value: Value) {
        self.env.define_global(name, value);
    }

    pub fn global(&self, name: &str) -> Value {
        self.env.get(name)
    }

    /// Run a whole chunk; returns its `return` values.
    pub fn run(&mut self, chunk: &Chunk) -> Result<Vec<Value>, RuntimeError> {
        match self.exec_block(&chunk.body)? {
            Flow::Return(values) => Ok(values),
            _ => Ok(Vec::new()),
        }
    }

    /// Parse and run source in this state.
    pub fn run_source(&mut self, source: &str, chunk_name: &str) -> Result<Vec<Value>, RuntimeError> {
        let chunk = lus_parser::parse(source)
            .map_err(|e| RuntimeError::msg(format!("{chunk_name}: {e}")))?;
        self.run(&chunk)
    }

    // === Statements ===

    fn exec_block(&mut self, block: &Block) -> Result<Flow, RuntimeError> {
        for stmt in block {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_block_scoped(&mut self, block: &Block) -> Result<Flow, RuntimeError> {
        self.env.push_scope();
        let result = self.exec_block(block);
        self.env.pop_scope();
        result
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, RuntimeError> {
        match &stmt.kind {
            StmtKind::Local { names, exprs } => {
                let mut values = self.eval_multi(exprs)?;
                values.resize(names.len(), Value::Nil);
                for (name, value) in names.iter().zip(values) {
                    self.env.define(name, value);
                }
                Ok(Flow::Normal)
            }
            StmtKind::Assign { targets, exprs } => {
                let mut values = self.eval_multi(exprs)?;
                values.resize(targets.len(), Value::Nil);
                for (target, value) in targets.iter().zip(values) {
                    self.assign(target, value)?;
                }
                Ok(Flow::Normal)
            }
            StmtKind::Call(expr) => {
                self.eval_values(expr)?;
                Ok(Flow::Normal)
            }
            StmtKind::Function { path, params, body } => {
                let function = self.make_function(params, body, Some(path.join(".")));
                if path.len() == 1 {
                    self.env.set(&path[0], function);
                } else {
                    let mut object = self.env.get(&path[0]);
                    for segment in &path[1..path.len() - 1] {
                        object = self.index_value(&object, &Value::str(segment))?;
                    }
                    self.set_index(
                        &object,
                        Value::str(path.last().expect("dotted path has segments")),
                        function,
                    )?;
                }
                Ok(Flow::Normal)
            }
            StmtKind::LocalFunction { name, params, body } => {
                // Declare first so the body can call itself.
                self.env.define(name, Value::Nil);
                let function = self.make_function(params, body, Some(name.clone()));
                self.env.set(name, function);
                Ok(Flow::Normal)
            }
            StmtKind::If { arms, else_body } => {
                for (cond, body) in arms {
                    if self.eval(cond)?.truthy() {
                        return self.exec_block_scoped(body);
                    }
                }
                if let Some(body) = else_body {
                    return self.exec_block_scoped(body);
                }
                Ok(Flow::Normal)
            }
            StmtKind::While { cond, body } => {
                while self.eval(cond)?.truthy() {
                    match self.exec_block_scoped(body)? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Repeat { body, cond } => {
                loop {
                    // Body locals stay visible to the until condition.
                    self.env.push_scope();
                    let flow = self.exec_block(body);
                    let flow = match flow {
                        Ok(flow) => flow,
                        Err(e) => {
                            self.env.pop_scope();
                            return Err(e);
                        }
                    };
                    match flow {
                        Flow::Normal => {
                            let stop = self.eval(cond);
                            self.env.pop_scope();
                            if stop?.truthy() {
                                break;
                            }
                        }
                        Flow::Break => {
                            self.env.pop_scope();
                            break;
                        }
                        flow @ Flow::Return(_) => {
                            self.env.pop_scope();
                            return Ok(flow);
                        }
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => self.exec_numeric_for(var, start, limit, step.as_ref(), body),
            StmtKind::Return(exprs) => Ok(Flow::Return(self.eval_multi(exprs)?)),
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Do(block) => self.exec_block_scoped(block),
        }
    }

    fn exec_numeric_for(
        &mut self,
        var: &str,
        start: &Expr,
        limit: &Expr,
        step: Option<&Expr>,
        body: &Block,
    ) -> Result<Flow, RuntimeError> {
        let start = self.eval(start)?;
        let limit = self.eval(limit)?;
        let step = match step {
            Some(expr) => self.eval(expr)?,
            None => Value::Int(1),
        };

        // Integer loop when every control value is an integer.
        if let (Value::Int(first), Value::Int(limit), Value::Int(step)) = (&start, &limit, &step) {
            let (mut i, limit, step) = (*first, *limit, *step);
            if step == 0 {
                return Err(RuntimeError::msg("'for' step is zero"));
            }
            while (step > 0 && i <= limit) || (step < 0 && i >= limit) {
                self.env.push_scope();
                self.env.define(var, Value::Int(i));
                let flow = self.exec_block(body);
                self.env.pop_scope();
                match flow? {
                    Flow::Normal => {}
                    Flow::Break => return Ok(Flow::Normal),
                    flow @ Flow::Return(_) => return Ok(flow),
                }
                match i.checked_add(step) {
                    Some(next) => i = next,
                    None => break,
                }
            }
            return Ok(Flow::Normal);
        }

        let mut i = self.to_number(&start, "'for' initial value")?;
        let limit = self.to_number(&limit, "'for' limit")?;
        let step = self.to_number(&step, "'for' step")?;
        if step == 0.0 {
            return Err(RuntimeError::msg("'for' step is zero"));
        }
        while (step > 0.0 && i <= limit) || (step < 0.0 && i >= limit) {
            self.env.push_scope();
            self.env.define(var, Value::Float(i));
            let flow = self.exec_block(body);
            self.env.pop_scope();
            match flow? {
                Flow::Normal => {}
                Flow::Break => return Ok(Flow::Normal),
                flow @ Flow::Return(_) => return Ok(flow),
            }
            i += step;
        }
        Ok(Flow::Normal)
    }

    fn assign(&mut self, target: &Expr, value: Value) -> Result<(), RuntimeError> {
        match &target.kind {
            ExprKind::Ident(name) => {
                self.env.set(name, value);
                Ok(())
            }
            ExprKind::Index { object, index } => {
                let object = self.eval(object)?;
                let key = self.eval(index)?;
                self.set_index(&object, key, value)
            }
            _ => Err(RuntimeError::msg("cannot assign to this expression")),
        }
    }

    // === Expressions ===

    /// Evaluate an expression list with tail expansion.
    pub(crate) fn eval_multi(&mut self, exprs: &[Expr]) -> Result<Vec<Value>, RuntimeError> {
        let mut values = Vec::with_capacity(exprs.len());
        for (i, expr) in exprs.iter().enumerate() {
            let last = i + 1 == exprs.len();
            if last && is_multi(expr) {
                values.extend(self.eval_values(expr)?);
            } else {
                values.push(self.eval(expr)?);
            }
        }
        Ok(values)
    }

    /// Evaluate to exactly one value (calls truncate).
    pub(crate) fn eval(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        if is_multi(expr) {
            let mut values = self.eval_values(expr)?;
            return Ok(if values.is_empty() {
                Value::Nil
            } else {
                values.swap_remove(0)
            });
        }
        match &expr.kind {
            ExprKind::Nil => Ok(Value::Nil),
            ExprKind::True => Ok(Value::Bool(true)),
            ExprKind::False => Ok(Value::Bool(false)),
            ExprKind::Int(i) => Ok(Value::Int(*i)),
            ExprKind::Float(f) => Ok(Value::Float(*f)),
            ExprKind::Str(s) => Ok(Value::str(s)),
            ExprKind::Ident(name) => Ok(self.env.get(name)),
            ExprKind::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs),
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand)?;
                self.apply_unop(*op, value)
            }
            ExprKind::Index { object, index } => {
                let object = self.eval(object)?;
                let key = self.eval(index)?;
                self.index_value(&object, &key)
            }
            ExprKind::Function { params, body } => {
                Ok(self.make_function(params, body, None))
            }
            ExprKind::Table { items } => self.eval_table(items),
            ExprKind::Call { .. } | ExprKind::Method { .. } => {
                unreachable!("multi-value expressions handled above")
            }
        }
    }

    /// Evaluate a call or method expression to all of its results.
    pub(crate) fn eval_values(&mut self, expr: &Expr) -> Result<Vec<Value>, RuntimeError> {
        match &expr.kind {
            ExprKind::Call { func, args } => {
                let function = self.eval(func)?;
                let argv = self.eval_multi(args)?;
                self.call_value(function, argv)
            }
            ExprKind::Method { object, name, args } => {
                let object = self.eval(object)?;
                let function = self.index_value(&object, &Value::str(name))?;
                let mut argv = vec![object];
                argv.extend(self.eval_multi(args)?);
                self.call_value(function, argv)
            }
            _ => Ok(vec![self.eval(expr)?]),
        }
    }

    /// Call any callable value with already-evaluated arguments.
    pub fn call_value(
        &mut self,
        function: Value,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, RuntimeError> {
        match function {
            Value::Function(f) => {
                if self.call_depth >= MAX_CALL_DEPTH {
                    return Err(RuntimeError::msg("stack overflow"));
                }
                self.call_depth += 1;
                let saved = std::mem::replace(&mut self.env, f.captured.capture());
                self.env.push_scope();
                let mut args = args;
                args.resize(f.params.len(), Value::Nil);
                for (param, value) in f.params.iter().zip(args) {
                    self.env.define(param, value);
                }
                let flow = self.exec_block(&f.body);
                self.env = saved;
                self.call_depth -= 1;
                match flow? {
                    Flow::Return(values) => Ok(values),
                    _ => Ok(Vec::new()),
                }
            }
            Value::Builtin(kind) => builtins::call(self, kind, args),
            other => Err(RuntimeError::msg(format!(
                "attempt to call a {} value",
                other.type_name()
            ))),
        }
    }

    fn make_function(&self, params: &[String], body: &Block, name: Option<String>) -> Value {
        Value::Function(Rc::new(LusFunction {
            params: params.to_vec(),
            body: body.to_vec(),
            captured: self.env.capture(),
            name,
        }))
    }

    fn eval_table(&mut self, items: &[TableItem]) -> Result<Value, RuntimeError> {
        let mut table = Table::new();
        let mut next_index = 1i64;
        for (i, item) in items.iter().enumerate() {
            match item {
                TableItem::Positional(expr) => {
                    let last = i + 1 == items.len();
                    if last && is_multi(expr) {
                        for value in self.eval_values(expr)? {
                            table.set(TableKey::Int(next_index), value);
                            next_index += 1;
                        }
                    } else {
                        let value = self.eval(expr)?;
                        table.set(TableKey::Int(next_index), value);
                        next_index += 1;
                    }
                }
                TableItem::Named(name, expr) => {
                    let value = self.eval(expr)?;
                    table.set(TableKey::Str(name.clone()), value);
                }
                TableItem::Keyed(key, expr) => {
                    let key = self.eval(key)?;
                    let value = self.eval(expr)?;
                    table.set(TableKey::from_value(&key)?, value);
                }
            }
        }
        Ok(Value::table(table))
    }

    fn eval_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<Value, RuntimeError> {
        if op == BinOp::And {
            let left = self.eval(lhs)?;
            return if left.truthy() { self.eval(rhs) } else { Ok(left) };
        }
        if op == BinOp::Or {
            let left = self.eval(lhs)?;
            return if left.truthy() { Ok(left) } else { self.eval(rhs) };
        }

        let left = self.eval(lhs)?;
        let right = self.eval(rhs)?;
        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow => {
                self.arith(op, left, right)
            }
            BinOp::Concat => {
                let left = self.concat_operand(left)?;
                let right = self.concat_operand(right)?;
                Ok(Value::str(format!("{left}{right}")))
            }
            BinOp::Eq => Ok(Value::Bool(left.lus_eq(&right))),
            BinOp::Ne => Ok(Value::Bool(!left.lus_eq(&right))),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => self.compare(op, left, right),
            BinOp::And | BinOp::Or => unreachable!("short-circuit handled above"),
        }
    }

    fn arith(&self, op: BinOp, left: Value, right: Value) -> Result<Value, RuntimeError> {
        // Integer arithmetic stays integral except division and
        // exponentiation, as in Lua.
        if let (Value::Int(a), Value::Int(b)) = (&left, &right) {
            let (a, b) = (*a, *b);
            return match op {
                BinOp::Add => Ok(Value::Int(a.wrapping_add(b))),
                BinOp::Sub => Ok(Value::Int(a.wrapping_sub(b))),
                BinOp::Mul => Ok(Value::Int(a.wrapping_mul(b))),
                BinOp::Div => Ok(Value::Float(a as f64 / b as f64)),
                BinOp::Mod => {
                    if b == 0 {
                        Err(RuntimeError::msg("attempt to perform 'n%0'"))
                    } else {
                        Ok(Value::Int(a.rem_euclid(b)))
                    }
                }
                BinOp::Pow => Ok(Value::Float((a as f64).powf(b as f64))),
                _ => unreachable!("arith op"),
            };
        }
        let a = self.to_number(&left, "arithmetic")?;
        let b = self.to_number(&right, "arithmetic")?;
        Ok(Value::Float(match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            BinOp::Mod => a - (a / b).floor() * b,
            BinOp::Pow => a.powf(b),
            _ => unreachable!("arith op"),
        }))
    }

    fn compare(&self, op: BinOp, left: Value, right: Value) -> Result<Value, RuntimeError> {
        let ordering = match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
            (a, b) if is_number(a) && is_number(b) => {
                let a = self.to_number(a, "comparison")?;
                let b = self.to_number(b, "comparison")?;
                a.partial_cmp(&b)
            }
            (a, b) => {
                return Err(RuntimeError::msg(format!(
                    "attempt to compare {} with {}",
                    a.type_name(),
                    b.type_name()
                )))
            }
        };
        let result = match (op, ordering) {
            (_, None) => false, // NaN comparisons
            (BinOp::Lt, Some(o)) => o.is_lt(),
            (BinOp::Le, Some(o)) => o.is_le(),
            (BinOp::Gt, Some(o)) => o.is_gt(),
            (BinOp::Ge, Some(o)) => o.is_ge(),
            _ => unreachable!("comparison op"),
        };
        Ok(Value::Bool(result))
    }

    fn apply_unop(&self, op: UnOp, value: Value) -> Result<Value, RuntimeError> {
        match op {
            UnOp::Neg => match value {
                Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(RuntimeError::msg(format!(
                    "attempt to perform arithmetic on a {} value",
                    other.type_name()
                ))),
            },
            UnOp::Not => Ok(Value::Bool(!value.truthy())),
            UnOp::Len => match value {
                Value::Str(s) => Ok(Value::Int(s.len() as i64)),
                Value::Table(t) => Ok(Value::Int(t.borrow().len())),
                other => Err(RuntimeError::msg(format!(
                    "attempt to get length of a {} value",
                    other.type_name()
                ))),
            },
        }
    }

    pub(crate) fn index_value(&self, object: &Value, key: &Value) -> Result<Value, RuntimeError> {
        match object {
            Value::Table(t) => {
                let key = TableKey::from_value(key)?;
                Ok(t.borrow().get(&key))
            }
            other => Err(RuntimeError::msg(format!(
                "attempt to index a {} value",
                other.type_name()
            ))),
        }
    }

    fn set_index(&self, object: &Value, key: Value, value: Value) -> Result<(), RuntimeError> {
        match object {
            Value::Table(t) => {
                let key = TableKey::from_value(&key)?;
                t.borrow_mut().set(key, value);
                Ok(())
            }
            other => Err(RuntimeError::msg(format!(
                "attempt to index a {} value",
                other.type_name()
            ))),
        }
    }

    fn concat_operand(&self, value: Value) -> Result<String, RuntimeError> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            Value::Int(_) | Value::Float(_) => Ok(value.display()),
            other => Err(RuntimeError::msg(format!(
                "attempt to concatenate a {} value",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn to_number(&self, value: &Value, what: &str) -> Result<f64, RuntimeError> {
        match value {
            Value::Int(i) => Ok(*i as f64),
            Value::Float(f) => Ok(*f),
            other => Err(RuntimeError::msg(format!(
                "{} expects a number, got {}",
                what,
                other.type_name()
            ))),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new()
    }
}

fn is_multi(expr: &Expr) -> bool {
    matches!(expr.kind, ExprKind::Call { .. } | ExprKind::Method { .. })
}

fn is_number(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Float(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_capture(source: &str) -> String {
        let (mut interp, out) = Interpreter::with_captured_output();
        interp.run_source(source, "test").unwrap();
        let s = out.borrow().clone();
        s
    }

    fn eval_one(source: &str) -> Value {
        let mut interp = Interpreter::new();
        let mut values = interp.run_source(source, "test").unwrap();
        if values.is_empty() {
            Value::Nil
        } else {
            values.swap_remove(0)
        }
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert!(matches!(eval_one("return 1 + 2 * 3"), Value::Int(7)));
        assert!(matches!(eval_one("return 7 % 3"), Value::Int(1)));
        assert!(matches!(eval_one("return -7 % 3"), Value::Int(2)));
        match eval_one("return 7 / 2") {
            Value::Float(f) => assert_eq!(f, 3.5),
            other => panic!("expected float, got {other:?}"),
        }
        match eval_one("return 2 ^ 10") {
            Value::Float(f) => assert_eq!(f, 1024.0),
            other => panic!("expected float, got {other:?}"),
        }
    }

    #[test]
    fn string_concat() {
        match eval_one("return 'a' .. 1 .. '!' ") {
            Value::Str(s) => assert_eq!(&*s, "a1!"),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn short_circuit_returns_operands() {
        assert!(matches!(eval_one("return nil or 5"), Value::Int(5)));
        assert!(matches!(eval_one("return false and 5"), Value::Bool(false)));
        assert!(matches!(eval_one("return 1 and 2"), Value::Int(2)));
    }

    #[test]
    fn locals_functions_and_closures() {
        let out = run_capture(
            "local function make_counter()\n\
             local n = 0\n\
             return function() n = n + 1 return n end\n\
             end\n\
             local c = make_counter()\n\
             c()\n\
             c()\n\
             print(c())",
        );
        assert_eq!(out, "3\n");
    }

    #[test]
    fn multiple_returns_and_assignment() {
        let out = run_capture(
            "local function pair() return 1, 2 end\n\
             local a, b = pair()\n\
             print(a, b)\n\
             local c, d, e = pair()\n\
             print(c, d, e)",
        );
        assert_eq!(out, "1\t2\n1\t2\tnil\n");
    }

    #[test]
    fn call_truncates_in_middle_of_list() {
        let out = run_capture(
            "local function pair() return 1, 2 end\n\
             local a, b, c = pair(), 9\n\
             print(a, b, c)",
        );
        assert_eq!(out, "1\t9\tnil\n");
    }

    #[test]
    fn control_flow() {
        let out = run_capture(
            "local total = 0\n\
             for i = 1, 5 do total = total + i end\n\
             print(total)\n\
             local n = 0\n\
             while true do n = n + 1 if n >= 3 then break end end\n\
             print(n)\n\
             local m = 0\n\
             repeat m = m + 1 until m >= 2\n\
             print(m)",
        );
        assert_eq!(out, "15\n3\n2\n");
    }

    #[test]
    fn tables_and_indexing() {
        let out = run_capture(
            "local t = { 10, 20, x = 'hi', [\"y\"] = 4 }\n\
             print(t[1], t[2], t.x, t.y, #t)\n\
             t.z = t.x .. '!'\n\
             print(t.z)",
        );
        assert_eq!(out, "10\t20\thi\t4\t2\nhi!\n");
    }

    #[test]
    fn method_call_passes_self() {
        let out = run_capture(
            "local obj = { value = 41 }\n\
             function obj.bump(self, by) return self.value + by end\n\
             print(obj:bump(1))",
        );
        assert_eq!(out, "42\n");
    }

    #[test]
    fn dotted_function_definition() {
        let out = run_capture(
            "local m = {}\n\
             function m.double(x) return x * 2 end\n\
             print(m.double(21))",
        );
        assert_eq!(out, "42\n");
    }

    #[test]
    fn global_assignment_from_inner_scope() {
        let out = run_capture(
            "local function set() g = 99 end\n\
             set()\n\
             print(g)",
        );
        assert_eq!(out, "99\n");
    }

    #[test]
    fn runtime_errors_carry_messages() {
        let mut interp = Interpreter::new();
        let err = interp.run_source("return 1 + {}", "test").unwrap_err();
        assert!(err.to_string().contains("arithmetic"));

        let err = interp.run_source("local x = nil x.y = 1", "test").unwrap_err();
        assert!(err.to_string().contains("index a nil value"));

        let err = interp.run_source("local f = 3 f()", "test").unwrap_err();
        assert!(err.to_string().contains("call a number value"));
    }

    #[test]
    fn stack_overflow_is_an_error() {
        let mut interp = Interpreter::new();
        let err = interp
            .run_source("local function f() return f() end return f()", "test")
            .unwrap_err();
        assert!(err.to_string().contains("stack overflow"));
    }

    #[test]
    fn numeric_for_with_float_step() {
        let out = run_capture(
            "local n = 0\n\
             for x = 0, 1, 0.25 do n = n + 1 end\n\
             print(n)",
        );
        assert_eq!(out, "5\n");
    }
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coroutines and the detached-execution glue.
//!
//! A coroutine is a resumable body behind a stable identity. The
//! body is a state machine implementing [`CoroBody`]; each
//! resumption advances it until it yields, parks on an async wait,
//! returns, or errors. This is exactly the surface the scheduler
//! consumes from the execution engine — the bytecode VM of a full
//! build produces the same shape from compiled code.
//!
//! The detached flag and the yield descriptor live in a side table
//! keyed by coroutine id, not on the coroutine itself: readers never
//! allocate, writers create entries on first use.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use lus_rt::pool::TaskHandle;
use lus_rt::sched::{DetachedTask, ResumeOutcome, Scheduler, Wait, WakeReason};

use crate::interp::RuntimeError;
use crate::value::Value;

static NEXT_CORO_ID: AtomicU64 = AtomicU64::new(1);

/// Coroutine lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroStatus {
    Fresh,
    Suspended,
    Running,
    Dead,
    Errored,
}

/// What one resumption of a body produced.
pub enum CoroStep {
    /// Plain yield with values for the ordinary caller.
    Yield(Vec<Value>),
    /// Suspend into the scheduler with an async wait.
    Park(Wait),
    /// Finished with return values.
    Done(Vec<Value>),
    /// Errored with a message.
    Fail(String),
}

/// A resumable execution body.
pub trait CoroBody {
    fn step(&mut self, wake: WakeReason) -> CoroStep;
}

/// A coroutine: identity, status, body and final results.
pub struct Coroutine {
    pub id: u64,
    pub status: CoroStatus,
    body: Box<dyn CoroBody>,
    pub results: Vec<Value>,
    pub error: Option<String>,
}

/// Shared handle; the scheduler's pending entry holds one of these,
/// which is what keeps a suspended coroutine alive after the user
/// drops theirs.
#[derive(Clone)]
pub struct CoroHandle(pub Rc<RefCell<Coroutine>>);

impl CoroHandle {
    pub fn new(body: Box<dyn CoroBody>) -> Self {
        CoroHandle(Rc::new(RefCell::new(Coroutine {
            id: NEXT_CORO_ID.fetch_add(1, Ordering::Relaxed),
            status: CoroStatus::Fresh,
            body,
            results: Vec::new(),
            error: None,
        })))
    }

    pub fn id(&self) -> u64 {
        self.0.borrow().id
    }

    pub fn status(&self) -> CoroStatus {
        self.0.borrow().status
    }

    pub fn results(&self) -> Vec<Value> {
        self.0.borrow().results.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.0.borrow().error.clone()
    }
}

/// Per-coroutine scheduler-facing state.
pub struct CoState {
    pub detached: bool,
    pub wait: Wait,
}

impl Default for CoState {
    fn default() -> Self {
        CoState {
            detached: false,
            wait: Wait::Normal,
        }
    }
}

/// The side table. Getters return zero-valued defaults and never
/// allocate; setters create the record on first write.
#[derive(Default)]
pub struct YieldTable {
    map: HashMap<u64, CoState>,
}

impl YieldTable {
    pub fn is_detached(&self, id: u64) -> bool {
        self.map.get(&id).map(|s| s.detached).unwrap_or(false)
    }

    pub fn wait(&self, id: u64) -> Wait {
        self.map
            .get(&id)
            .map(|s| s.wait.clone())
            .unwrap_or(Wait::Normal)
    }

    pub fn mark_detached(&mut self, id: u64) {
        self.map.entry(id).or_default().detached = true;
    }

    pub fn unmark_detached(&mut self, id: u64) {
        if let Some(state) = self.map.get_mut(&id) {
            state.detached = false;
        }
    }

    pub fn set_wait(&mut self, id: u64, wait: Wait) {
        self.map.entry(id).or_default().wait = wait;
    }

    /// Reset the descriptor to a plain yield, without creating a
    /// record.
    pub fn clear_wait(&mut self, id: u64) {
        if let Some(state) = self.map.get_mut(&id) {
            state.wait = Wait::Normal;
        }
    }

    pub fn forget(&mut self, id: u64) {
        self.map.remove(&id);
    }

    #[cfg(test)]
    fn record_count(&self) -> usize {
        self.map.len()
    }
}

/// A detached coroutine as the scheduler sees it.
pub struct DetachedCoro {
    co: CoroHandle,
    yields: Rc<RefCell<YieldTable>>,
}

impl DetachedTask for DetachedCoro {
    fn is_resumable(&self) -> bool {
        matches!(
            self.co.status(),
            CoroStatus::Fresh | CoroStatus::Suspended
        )
    }

    fn resume(&mut self, wake: WakeReason) -> ResumeOutcome {
        let id = self.co.id();
        // The descriptor resets to a plain yield before the body
        // runs; parking writes the next one.
        self.yields.borrow_mut().clear_wait(id);

        let step = {
            let mut co = self.co.0.borrow_mut();
            co.status = CoroStatus::Running;
            co.body.step(wake)
        };

        match step {
            CoroStep::Yield(values) => {
                let mut co = self.co.0.borrow_mut();
                co.status = CoroStatus::Suspended;
                co.results = values;
                ResumeOutcome::Yielded
            }
            CoroStep::Park(wait) => {
                self.co.0.borrow_mut().status = CoroStatus::Suspended;
                let mut yields = self.yields.borrow_mut();
                yields.set_wait(id, wait.clone());
                match wait {
                    Wait::Normal => ResumeOutcome::Yielded,
                    wait => ResumeOutcome::Parked(wait),
                }
            }
            CoroStep::Done(values) => {
                {
                    let mut co = self.co.0.borrow_mut();
                    co.status = CoroStatus::Dead;
                    co.results = values;
                }
                self.yields.borrow_mut().unmark_detached(id);
                ResumeOutcome::Completed
            }
            CoroStep::Fail(message) => {
                {
                    let mut co = self.co.0.borrow_mut();
                    co.status = CoroStatus::Errored;
                    co.error = Some(message.clone());
                }
                self.yields.borrow_mut().unmark_detached(id);
                ResumeOutcome::Failed(message)
            }
        }
    }
}

/// The per-state coroutine runtime: one scheduler plus the yield
/// side table.
pub struct CoRuntime {
    sched: Scheduler<DetachedCoro>,
    yields: Rc<RefCell<YieldTable>>,
}

impl CoRuntime {
    pub fn new() -> Result<Self, RuntimeError> {
        let sched = Scheduler::new().map_err(|e| {
            RuntimeError::msg(format!("failed to create event loop backend: {e}"))
        })?;
        Ok(CoRuntime {
            sched,
            yields: Rc::new(RefCell::new(YieldTable::default())),
        })
    }

    /// Start a coroutine for event-driven execution: mark it
    /// detached and run it immediately until it parks, completes or
    /// errors. An immediate error propagates to the spawner.
    pub fn spawn_detached(
        &mut self,
        body: Box<dyn CoroBody>,
    ) -> Result<CoroHandle, RuntimeError> {
        let co = CoroHandle::new(body);
        self.yields.borrow_mut().mark_detached(co.id());
        let mut task = DetachedCoro {
            co: co.clone(),
            yields: self.yields.clone(),
        };
        match task.resume(WakeReason::Init) {
            ResumeOutcome::Parked(wait) => {
                self.sched
                    .add_pending(task, wait)
                    .map_err(|e| RuntimeError::msg(format!("event registration failed: {e}")))?;
            }
            ResumeOutcome::Yielded | ResumeOutcome::Completed => {}
            ResumeOutcome::Failed(message) => return Err(RuntimeError::msg(message)),
        }
        Ok(co)
    }

    /// One scheduler cycle. Raises errors stored by earlier cycles.
    pub fn poll(&mut self, timeout_ms: i32) -> Result<usize, RuntimeError> {
        self.sched
            .poll(timeout_ms)
            .map_err(|e| RuntimeError::msg(e.to_string()))
    }

    pub fn pending(&self) -> usize {
        self.sched.pending_count()
    }

    /// Drive the loop until nothing is pending. Blocks efficiently;
    /// each cycle waits on the backend rather than spinning.
    pub fn run_until_idle(&mut self) -> Result<(), RuntimeError> {
        while self.pending() > 0 {
            self.poll(-1)?;
        }
        Ok(())
    }

    /// Hand blocking work to the scheduler's pool.
    pub fn submit_job(&self, task: TaskHandle) {
        self.sched.pool().submit(task);
    }

    pub fn yields(&self) -> Rc<RefCell<YieldTable>> {
        self.yields.clone()
    }
}

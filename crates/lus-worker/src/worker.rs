// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Worker state and the select-style receive.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use lus_pledge::PledgeStore;

use crate::message::Message;

/// Worker lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Running,
    /// Blocked inside `worker.peek` waiting for the parent.
    Blocked,
    Dead,
    Errored,
}

impl WorkerStatus {
    /// The two-state view scripts observe.
    pub fn as_script_str(self) -> &'static str {
        match self {
            WorkerStatus::Running | WorkerStatus::Blocked => "running",
            WorkerStatus::Dead | WorkerStatus::Errored => "dead",
        }
    }
}

/// Worker errors surfaced to the parent.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    /// The worker's own load or runtime error, raised by `receive`.
    #[error("{0}")]
    Script(String),
}

/// Shared condition a parent attaches to several workers before a
/// multi-worker receive. The ready flag is set before the signal so
/// a post between scan and wait is never lost.
pub struct ReceiveContext {
    ready: Mutex<bool>,
    cond: Condvar,
}

impl ReceiveContext {
    fn new() -> Arc<Self> {
        Arc::new(ReceiveContext {
            ready: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    fn notify(&self) {
        let mut ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
        *ready = true;
        self.cond.notify_one();
    }

    fn wait(&self) {
        let mut ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
        while !*ready {
            ready = self.cond.wait(ready).unwrap_or_else(|e| e.into_inner());
        }
        *ready = false;
    }
}

struct WorkerInner {
    inbox: VecDeque<Message>,
    outbox: VecDeque<Message>,
    status: WorkerStatus,
    error: Option<String>,
    recv_ctx: Option<Arc<ReceiveContext>>,
    /// How many leading inbox messages are the script's initial
    /// arguments.
    nargs: usize,
}

/// One worker: its mailboxes, status word and inherited pledges.
/// Jointly owned by the parent handle and the pool thread through
/// `Arc`; the last owner frees it.
pub struct Worker {
    script_path: String,
    pledges: PledgeStore,
    inner: Mutex<WorkerInner>,
    inbox_cond: Condvar,
    outbox_cond: Condvar,
}

/// Shared reference to a worker.
pub type WorkerHandle = Arc<Worker>;

impl Worker {
    pub(crate) fn new(
        script_path: &str,
        pledges: PledgeStore,
        args: Vec<Message>,
    ) -> WorkerHandle {
        Arc::new(Worker {
            script_path: script_path.to_string(),
            pledges,
            inner: Mutex::new(WorkerInner {
                nargs: args.len(),
                inbox: args.into(),
                outbox: VecDeque::new(),
                status: WorkerStatus::Running,
                error: None,
                recv_ctx: None,
            }),
            inbox_cond: Condvar::new(),
            outbox_cond: Condvar::new(),
        })
    }

    pub fn script_path(&self) -> &str {
        &self.script_path
    }

    /// The deep copy of the parent's pledge store taken at creation.
    pub fn pledges(&self) -> &PledgeStore {
        &self.pledges
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WorkerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> WorkerStatus {
        self.lock().status
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// Parent → worker: append to the inbox and wake a blocked peek.
    pub fn send(&self, message: Message) {
        let mut inner = self.lock();
        inner.inbox.push_back(message);
        self.inbox_cond.notify_one();
    }

    /// Worker → parent: append to the outbox, wake a blocked
    /// receive, and signal any attached select context. Ownership of
    /// the message's arena transfers with the enqueue.
    pub fn post(&self, message: Message) {
        let ctx = {
            let mut inner = self.lock();
            inner.outbox.push_back(message);
            self.outbox_cond.notify_one();
            inner.recv_ctx.clone()
        };
        if let Some(ctx) = ctx {
            ctx.notify();
        }
    }

    /// Worker side: block until the parent sends a message.
    pub fn wait_message(&self) -> Message {
        let mut inner = self.lock();
        inner.status = WorkerStatus::Blocked;
        loop {
            if let Some(message) = inner.inbox.pop_front() {
                inner.status = WorkerStatus::Running;
                return message;
            }
            inner = self
                .inbox_cond
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Worker side: pop the initial arguments off the inbox.
    pub fn take_args(&self) -> Vec<Message> {
        let mut inner = self.lock();
        let nargs = inner.nargs;
        inner.nargs = 0;
        let mut args = Vec::with_capacity(nargs);
        for _ in 0..nargs {
            match inner.inbox.pop_front() {
                Some(message) => args.push(message),
                None => break,
            }
        }
        args
    }

    /// Pop one outbox message without blocking.
    pub fn try_receive(&self) -> Option<Message> {
        self.lock().outbox.pop_front()
    }

    /// Terminal transition, called by the pool thread when the body
    /// ends. Wakes blocked receivers and any select context.
    pub(crate) fn finish(&self, status: WorkerStatus, error: Option<String>) {
        let ctx = {
            let mut inner = self.lock();
            inner.status = status;
            inner.error = error;
            self.outbox_cond.notify_all();
            inner.recv_ctx.clone()
        };
        if let Some(ctx) = ctx {
            ctx.notify();
        }
    }

    fn set_recv_ctx(&self, ctx: Option<Arc<ReceiveContext>>) {
        self.lock().recv_ctx = ctx;
    }
}

/// Select-style receive over one or more workers.
///
/// Blocks until some listed worker has an outbox message, then
/// returns one slot per worker in positional order: the first ready
/// worker's message, `None` everywhere else. Ties break by position.
/// When every worker is dead with nothing queued, all slots are
/// `None`. A worker that died with an error raises that error
/// instead.
pub fn receive(workers: &[WorkerHandle]) -> Result<Vec<Option<Message>>, WorkerError> {
    if workers.is_empty() {
        return Ok(Vec::new());
    }

    let ctx = ReceiveContext::new();
    for worker in workers {
        worker.set_recv_ctx(Some(ctx.clone()));
    }

    let result = loop {
        let mut all_dead = true;
        let mut found: Option<(usize, Message)> = None;

        for (i, worker) in workers.iter().enumerate() {
            let mut inner = worker.lock();
            if inner.status == WorkerStatus::Errored {
                if let Some(message) = inner.error.clone() {
                    drop(inner);
                    for w in workers {
                        w.set_recv_ctx(None);
                    }
                    return Err(WorkerError::Script(message));
                }
            }
            if !matches!(inner.status, WorkerStatus::Dead | WorkerStatus::Errored) {
                all_dead = false;
            }
            if let Some(message) = inner.outbox.pop_front() {
                found = Some((i, message));
                break;
            }
        }

        if let Some((slot, message)) = found {
            let mut out: Vec<Option<Message>> = (0..workers.len()).map(|_| None).collect();
            out[slot] = Some(message);
            break out;
        }
        if all_dead {
            break (0..workers.len()).map(|_| None).collect();
        }

        ctx.wait();
    };

    for worker in workers {
        worker.set_recv_ctx(None);
    }
    Ok(result)
}

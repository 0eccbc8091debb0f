// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The detached-coroutine scheduler.
//!
//! Owns one event backend and one thread pool, and a FIFO set of
//! pending entries, one per suspended task. A pending entry holding
//! its task handle is what keeps the task alive while the user's own
//! references may be gone; releasing the entry releases the anchor.
//!
//! A single `poll` cycle waits on the backend (with the timeout
//! clipped to the earliest pending deadline), then walks the pending
//! set once in arrival order and resumes every entry that became
//! ready. An entry resumed in a cycle is never resumed again in the
//! same cycle, so tight re-parkers cannot starve the backend.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::io::RawFd;

use crate::event::{create_backend, EventBackend, EventResult, Events};
use crate::pool::{TaskHandle, ThreadPool};
use crate::time;

/// Why a task is suspended and what it is waiting for.
#[derive(Clone)]
pub enum Wait {
    /// Ordinary yield: returns to the caller, never enters the
    /// scheduler.
    Normal,
    /// Readable/writable fd, with an optional timeout deadline
    /// (monotonic seconds; `0.0` = no timer). Either condition
    /// resumes the task.
    Io {
        fd: RawFd,
        events: Events,
        deadline: f64,
    },
    /// Wake no earlier than the deadline (monotonic seconds).
    Sleep { deadline: f64 },
    /// Wake once the pool task's done flag is observed set.
    Job { task: TaskHandle },
}

/// What a resumption is told about why it woke.
#[derive(Clone, Copy, Debug)]
pub enum WakeReason {
    /// First resumption, before the task has ever parked.
    Init,
    /// The awaited fd signaled these events.
    Ready(Events),
    /// The deadline passed.
    Timeout,
    /// The awaited pool task completed.
    JobDone,
}

/// What a resumption produced.
pub enum ResumeOutcome {
    /// Suspended again with an async reason; re-admitted to the
    /// pending set. `Parked(Wait::Normal)` is treated as `Yielded`.
    Parked(Wait),
    /// Plain yield: released to the ordinary caller.
    Yielded,
    /// Ran to completion.
    Completed,
    /// Errored; the message is raised by the next `poll`.
    Failed(String),
}

/// A task the scheduler can drive. The interpreter implements this
/// for coroutine handles; tests implement it directly.
pub trait DetachedTask {
    /// False once the task is dead; a non-resumable ready entry is
    /// skipped but still counts as processed.
    fn is_resumable(&self) -> bool;
    fn resume(&mut self, wake: WakeReason) -> ResumeOutcome;
}

/// Scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    #[error("event backend error: {0}")]
    Backend(#[from] io::Error),
    /// An error raised inside a detached task, surfaced by the first
    /// `poll` after it was stored.
    #[error("{0}")]
    Task(String),
}

/// Per-cycle result batch bound.
const POLL_BATCH: usize = 16;
/// Backend tag reserved for the thread-pool notify pipe.
const NOTIFY_TAG: u64 = u64::MAX;
/// Worker threads started with the scheduler.
pub const DEFAULT_POOL_THREADS: usize = 4;

struct Entry<T> {
    task: T,
    fd: RawFd,
    /// Interest registered for `fd`; kept for bookkeeping symmetry
    /// with the backend registration.
    #[allow(dead_code)]
    events: Events,
    deadline: f64,
    job: Option<TaskHandle>,
}

pub struct Scheduler<T: DetachedTask> {
    backend: Box<dyn EventBackend>,
    pool: ThreadPool,
    pending: VecDeque<Entry<T>>,
    /// Most recent unreported task error; earlier ones are replaced.
    stored_error: Option<String>,
}

impl<T: DetachedTask> Scheduler<T> {
    /// Create the backend and start the pool. Backend creation
    /// failure is fatal to the caller.
    pub fn new() -> Result<Self, SchedError> {
        let mut backend = create_backend()?;
        let pool = ThreadPool::new(DEFAULT_POOL_THREADS)?;
        backend.add(pool.notify_fd(), Events::READ, NOTIFY_TAG)?;
        Ok(Scheduler {
            backend,
            pool,
            pending: VecDeque::new(),
            stored_error: None,
        })
    }

    /// The pool blocking work is delegated to.
    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Admit a suspended task. Registers the fd with the backend when
    /// the wait carries one; the entry anchors the task until it is
    /// resumed or the scheduler is torn down. `Wait::Normal` is not a
    /// scheduler wait and admits nothing.
    pub fn add_pending(&mut self, task: T, wait: Wait) -> io::Result<()> {
        let entry = match wait {
            Wait::Normal => return Ok(()),
            Wait::Io {
                fd,
                events,
                deadline,
            } => {
                if fd >= 0 {
                    self.backend.add(fd, events, fd as u64)?;
                }
                Entry {
                    task,
                    fd,
                    events,
                    deadline,
                    job: None,
                }
            }
            Wait::Sleep { deadline } => Entry {
                task,
                fd: -1,
                events: Events::NONE,
                deadline,
                job: None,
            },
            Wait::Job { task: job } => Entry {
                task,
                fd: -1,
                events: Events::NONE,
                deadline: 0.0,
                job: Some(job),
            },
        };
        self.pending.push_back(entry);
        Ok(())
    }

    /// One poll cycle. Returns the number of entries processed, or
    /// the error a resumed task raised in a previous cycle.
    pub fn poll(&mut self, timeout_ms: i32) -> Result<usize, SchedError> {
        if let Some(msg) = self.stored_error.take() {
            return Err(SchedError::Task(msg));
        }

        // Clip the wait to the earliest pending deadline.
        let mut effective = timeout_ms;
        let now = time::now();
        let earliest = self
            .pending
            .iter()
            .filter(|e| e.deadline > 0.0)
            .map(|e| e.deadline)
            .fold(None, |acc: Option<f64>, d| {
                Some(acc.map_or(d, |a| a.min(d)))
            });
        if let Some(deadline) = earliest {
            let ms = (((deadline - now) * 1000.0).ceil().max(0.0) as i64).min(i32::MAX as i64) as i32;
            effective = if effective < 0 { ms } else { effective.min(ms) };
        }
        // A job that completed before this entry was admitted has
        // already spent its pipe byte; its done flag must not wait
        // out the backend.
        let job_ready = self
            .pending
            .iter()
            .any(|e| e.job.as_ref().is_some_and(|job| job.is_done()));
        if job_ready {
            effective = 0;
        }

        let mut results = [EventResult::empty(); POLL_BATCH];
        let n = self.backend.wait(&mut results, effective)?;

        // Union readiness per fd so duplicate raw events collapse.
        let mut ready_fds: HashMap<RawFd, Events> = HashMap::new();
        for result in &results[..n] {
            if result.tag == NOTIFY_TAG {
                continue;
            }
            *ready_fds.entry(result.fd).or_insert(Events::NONE) |= result.events;
        }

        // Release completed handles the pool queued for us; the done
        // flag on each entry's own handle is the readiness signal.
        let mut drained = Vec::new();
        self.pool.poll(&mut drained, usize::MAX);
        drop(drained);

        let now = time::now();
        let mut remaining = VecDeque::with_capacity(self.pending.len());
        let mut ready = Vec::new();
        for entry in self.pending.drain(..) {
            match entry_wake(&entry, now, &ready_fds) {
                Some(wake) => ready.push((entry, wake)),
                None => remaining.push_back(entry),
            }
        }
        self.pending = remaining;

        let mut processed = 0;
        for (mut entry, wake) in ready {
            if entry.fd >= 0 {
                self.backend.remove(entry.fd)?;
            }
            processed += 1;
            if !entry.task.is_resumable() {
                continue; // skipped, still processed; entry released
            }
            match entry.task.resume(wake) {
                ResumeOutcome::Parked(wait) => {
                    // Re-admitted entries land behind the scanned set,
                    // so they run no earlier than the next cycle.
                    self.add_pending(entry.task, wait)?;
                }
                ResumeOutcome::Yielded | ResumeOutcome::Completed => {}
                ResumeOutcome::Failed(message) => {
                    self.stored_error = Some(message);
                }
            }
        }
        Ok(processed)
    }

    /// Release every pending entry and its fd registration. The
    /// backend and pool go down with the scheduler itself.
    pub fn teardown(&mut self) {
        for entry in self.pending.drain(..) {
            if entry.fd >= 0 {
                let _ = self.backend.remove(entry.fd);
            }
        }
    }
}

impl<T: DetachedTask> Drop for Scheduler<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn entry_wake<T>(entry: &Entry<T>, now: f64, ready_fds: &HashMap<RawFd, Events>) -> Option<WakeReason> {
    if entry.fd >= 0 {
        if let Some(&events) = ready_fds.get(&entry.fd) {
            return Some(WakeReason::Ready(events));
        }
    }
    if let Some(job) = &entry.job {
        if job.is_done() {
            return Some(WakeReason::JobDone);
        }
    }
    if entry.deadline > 0.0 && now >= entry.deadline {
        return Some(WakeReason::Timeout);
    }
    None
}

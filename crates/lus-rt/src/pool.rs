// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Thread pool for blocking work.
//!
//! Stdlib operations whose natural implementation would stall the
//! event loop (file syscalls, DNS) run here. Completion is published
//! two ways: the task's `done` flag, which is the authoritative
//! signal, and one best-effort byte on a non-blocking notify pipe so
//! the event backend can fold completions into its wait.

use std::any::Any;
use std::collections::VecDeque;
use std::io;
use std::os::unix::io::RawFd;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

/// Output of a pool work function: opaque to the pool itself.
pub type JobOutput = Box<dyn Any + Send>;

type WorkFn = Box<dyn FnOnce() -> Result<JobOutput, String> + Send>;

/// A unit of blocking work. The submitter keeps the handle; exactly
/// one pool thread takes and runs the closure. The work function runs
/// off the interpreter thread and must not touch interpreter state —
/// the `Send + 'static` bounds on the closure enforce that.
pub struct PoolTask {
    work: Mutex<Option<WorkFn>>,
    outcome: Mutex<Option<Result<JobOutput, String>>>,
    /// Monotonic: becomes true exactly once, after `outcome` is set.
    done: AtomicBool,
}

/// Shared handle to a pool task.
pub type TaskHandle = Arc<PoolTask>;

impl PoolTask {
    pub fn new<F>(work: F) -> TaskHandle
    where
        F: FnOnce() -> Result<JobOutput, String> + Send + 'static,
    {
        Arc::new(PoolTask {
            work: Mutex::new(Some(Box::new(work))),
            outcome: Mutex::new(None),
            done: AtomicBool::new(false),
        })
    }

    /// Authoritative completion signal.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Consume the result. Returns `None` until the task completes or
    /// if the outcome was already taken.
    pub fn take_outcome(&self) -> Option<Result<JobOutput, String>> {
        if !self.is_done() {
            return None;
        }
        self.outcome.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn run(&self) {
        let work = self.work.lock().unwrap_or_else(|e| e.into_inner()).take();
        let result = match work {
            Some(f) => match catch_unwind(AssertUnwindSafe(f)) {
                Ok(res) => res,
                Err(panic) => Err(panic_message(panic)),
            },
            None => Err("task already executed".to_string()),
        };
        *self.outcome.lock().unwrap_or_else(|e| e.into_inner()) = Some(result);
        self.done.store(true, Ordering::Release);
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "pool task panicked".to_string()
    }
}

struct Shared {
    /// Submitted but not yet claimed tasks, plus the shutdown flag the
    /// queue condvar also covers.
    pending: Mutex<PendingQueue>,
    queue_cond: Condvar,
    completed: Mutex<VecDeque<TaskHandle>>,
    /// Write end of the notify pipe, non-blocking.
    notify_write: RawFd,
}

struct PendingQueue {
    tasks: VecDeque<TaskHandle>,
    shutdown: bool,
}

/// The pool: `num_threads` workers, a pending queue, a completed
/// queue, and a notify pipe.
pub struct ThreadPool {
    shared: Arc<Shared>,
    threads: Vec<thread::JoinHandle<()>>,
    notify_read: RawFd,
}

fn make_notify_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0i32; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
        return Err(io::Error::last_os_error());
    }
    for fd in fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL, 0);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }
    Ok((fds[0], fds[1]))
}

impl ThreadPool {
    pub fn new(num_threads: usize) -> io::Result<Self> {
        let (notify_read, notify_write) = make_notify_pipe()?;
        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingQueue {
                tasks: VecDeque::new(),
                shutdown: false,
            }),
            queue_cond: Condvar::new(),
            completed: Mutex::new(VecDeque::new()),
            notify_write,
        });

        let mut threads = Vec::with_capacity(num_threads);
        for i in 0..num_threads.max(1) {
            let shared = shared.clone();
            threads.push(
                thread::Builder::new()
                    .name(format!("lus-pool-{i}"))
                    .spawn(move || worker_loop(&shared))?,
            );
        }

        Ok(ThreadPool {
            shared,
            threads,
            notify_read,
        })
    }

    /// Enqueue a task and wake one worker. O(1); the caller keeps its
    /// handle for completion polling.
    pub fn submit(&self, task: TaskHandle) {
        let mut q = self
            .shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        q.tasks.push_back(task);
        self.shared.queue_cond.notify_one();
    }

    /// Non-blocking drain of completed tasks, oldest first. Drains the
    /// notify pipe as a side effect.
    pub fn poll(&self, out: &mut Vec<TaskHandle>, max: usize) -> usize {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::read(
                    self.notify_read,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n <= 0 {
                break;
            }
        }

        let mut completed = self
            .shared
            .completed
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let mut count = 0;
        while count < max {
            match completed.pop_front() {
                Some(task) => {
                    out.push(task);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Read end of the completion pipe, for registration with the
    /// event backend. The byte count is not a semaphore; `is_done`
    /// on each task is the real signal.
    pub fn notify_fd(&self) -> RawFd {
        self.notify_read
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut q = self
                .shared
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            q.shutdown = true;
            self.shared.queue_cond.notify_all();
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        // Unclaimed and undrained tasks are released, not run.
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .tasks
            .clear();
        self.shared
            .completed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        unsafe {
            libc::close(self.notify_read);
            libc::close(self.shared.notify_write);
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut q = shared.pending.lock().unwrap_or_else(|e| e.into_inner());
            while q.tasks.is_empty() && !q.shutdown {
                q = shared.queue_cond.wait(q).unwrap_or_else(|e| e.into_inner());
            }
            if q.shutdown {
                return;
            }
            match q.tasks.pop_front() {
                Some(task) => task,
                None => return,
            }
        };

        task.run();

        shared
            .completed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(task);

        // Best effort: one byte is enough to wake the next wait, and a
        // full pipe already has a byte in it.
        let byte = 1u8;
        unsafe {
            libc::write(
                shared.notify_write,
                &byte as *const u8 as *const libc::c_void,
                1,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn runs_submitted_work() {
        let pool = ThreadPool::new(2).unwrap();
        let task = PoolTask::new(|| Ok(Box::new(41i64 + 1) as JobOutput));
        pool.submit(task.clone());

        while !task.is_done() {
            thread::sleep(Duration::from_millis(1));
        }
        let out = task.take_outcome().unwrap().unwrap();
        assert_eq!(*out.downcast::<i64>().unwrap(), 42);
    }

    #[test]
    fn poll_drains_completions_in_order() {
        let pool = ThreadPool::new(1).unwrap();
        let a = PoolTask::new(|| Ok(Box::new("a") as JobOutput));
        let b = PoolTask::new(|| Ok(Box::new("b") as JobOutput));
        pool.submit(a.clone());
        pool.submit(b.clone());

        while !a.is_done() || !b.is_done() {
            thread::sleep(Duration::from_millis(1));
        }
        let mut out = Vec::new();
        assert_eq!(pool.poll(&mut out, 16), 2);
        assert!(Arc::ptr_eq(&out[0], &a));
        assert!(Arc::ptr_eq(&out[1], &b));
    }

    #[test]
    fn notify_fd_becomes_readable_on_completion() {
        let pool = ThreadPool::new(1).unwrap();
        let task = PoolTask::new(|| Ok(Box::new(()) as JobOutput));
        pool.submit(task.clone());
        while !task.is_done() {
            thread::sleep(Duration::from_millis(1));
        }

        let fd = pool.notify_fd();
        let mut buf = [0u8; 8];
        // Completion already wrote its byte; the non-blocking read
        // must see at least one.
        let mut n = -1isize;
        for _ in 0..100 {
            n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) }
                as isize;
            if n > 0 {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert!(n > 0);
    }

    #[test]
    fn work_error_is_reported() {
        let pool = ThreadPool::new(1).unwrap();
        let task = PoolTask::new(|| Err("no such file".to_string()));
        pool.submit(task.clone());
        while !task.is_done() {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(task.take_outcome().unwrap().unwrap_err(), "no such file");
    }

    #[test]
    fn panic_in_work_becomes_error() {
        let pool = ThreadPool::new(1).unwrap();
        let task = PoolTask::new(|| panic!("boom"));
        pool.submit(task.clone());
        while !task.is_done() {
            thread::sleep(Duration::from_millis(1));
        }
        let err = task.take_outcome().unwrap().unwrap_err();
        assert!(err.contains("boom"));
    }

    #[test]
    fn shutdown_joins_workers() {
        let pool = ThreadPool::new(4).unwrap();
        for _ in 0..8 {
            pool.submit(PoolTask::new(|| Ok(Box::new(()) as JobOutput)));
        }
        drop(pool); // joins; must not hang or panic
    }
}
